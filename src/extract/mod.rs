// src/extract/mod.rs

use anyhow::{Context, Result};
use glob::glob;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::info;
use zip::ZipArchive;

use crate::config::DataPaths;

/// Expand every `*.zip` sitting directly in `raw_dir` into a folder named
/// after the archive stem inside `interim_dir`.
///
/// A pre-existing destination folder is cleared first, so re-running after a
/// raw archive changed never leaves stale files mixed in with fresh ones.
/// Returns the destination folder of each archive, in archive-name order.
pub fn extract_archives(paths: &DataPaths) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(&paths.interim_dir)
        .with_context(|| format!("creating interim dir {}", paths.interim_dir.display()))?;

    let pattern = paths.raw_dir.join("*.zip");
    let pattern = pattern.to_string_lossy();

    let mut dests = Vec::new();
    for entry in glob(&pattern).with_context(|| format!("globbing {}", pattern))? {
        let zip_path = entry.context("listing raw archive dir")?;
        if !zip_path.is_file() {
            continue;
        }
        dests.push(extract_one(&zip_path, &paths.interim_dir)?);
    }
    Ok(dests)
}

/// Expand a single archive into `interim_dir/<stem>/`.
fn extract_one(zip_path: &Path, interim_dir: &Path) -> Result<PathBuf> {
    let stem = zip_path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("archive {} has no usable file stem", zip_path.display()))?;
    let dest = interim_dir.join(stem);

    if dest.exists() {
        fs::remove_dir_all(&dest)
            .with_context(|| format!("clearing stale extraction dir {}", dest.display()))?;
    }
    fs::create_dir_all(&dest)
        .with_context(|| format!("creating extraction dir {}", dest.display()))?;

    let file = File::open(zip_path)
        .with_context(|| format!("opening archive {}", zip_path.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("reading archive {}", zip_path.display()))?;
    let entries = archive.len();
    archive
        .extract(&dest)
        .with_context(|| format!("extracting {} to {}", zip_path.display(), dest.display()))?;

    info!(archive = %zip_path.display(), dest = %dest.display(), entries, "extracted");
    Ok(dest)
}
