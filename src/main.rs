use anyhow::Result;
use cadingest::{config::DataPaths, extract, process};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    // ─── 2) configure dirs ───────────────────────────────────────────
    let paths = DataPaths::rooted("data");

    // ─── 3) extract raw archives ─────────────────────────────────────
    let extracted = extract::extract_archives(&paths)?;
    info!("{} archives extracted", extracted.len());

    // ─── 4) load, merge and export ───────────────────────────────────
    process::load_and_merge(&paths)?;

    info!("all done");
    Ok(())
}
