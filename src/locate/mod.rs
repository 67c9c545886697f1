// src/locate/mod.rs

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::DataPaths;

/// Folder-name prefix of the sales exports under the interim dir.
pub const SALES_PREFIX: &str = "allsales";
/// Folder-name prefix of the parcel exports under the interim dir.
pub const PARCEL_PREFIX: &str = "parcel";

/// Main attribute table inside the parcel folder.
pub const PARCEL_FILE: &str = "parcel.dbf";
/// Subdivision-name lookup inside the parcel folder.
pub const SUB_NAMES_FILE: &str = "parcel_sub_names.dbf";
/// Land-use-code-name lookup inside the parcel folder.
pub const DOR_NAMES_FILE: &str = "parcel_dor_names.dbf";

/// The four attribute tables a merge run reads, resolved and existence
/// checked up front so a missing input fails here instead of halfway
/// through the merge.
#[derive(Debug, Clone)]
pub struct DatasetFiles {
    pub sales_dbf: PathBuf,
    pub parcel_dbf: PathBuf,
    pub sub_names_dbf: PathBuf,
    pub dor_names_dbf: PathBuf,
}

impl DatasetFiles {
    /// Resolve the latest sales and parcel folders and check that every
    /// required table file is present.
    pub fn locate(paths: &DataPaths) -> Result<Self> {
        let sales_dir = latest_version(&paths.interim_dir, SALES_PREFIX)?;
        let parcel_dir = latest_version(&paths.interim_dir, PARCEL_PREFIX)?;
        debug!(
            sales = %sales_dir.display(),
            parcel = %parcel_dir.display(),
            "resolved latest dataset folders"
        );

        Ok(Self {
            sales_dbf: single_dbf(&sales_dir)?,
            parcel_dbf: required_file(&parcel_dir, PARCEL_FILE)?,
            sub_names_dbf: required_file(&parcel_dir, SUB_NAMES_FILE)?,
            dor_names_dbf: required_file(&parcel_dir, DOR_NAMES_FILE)?,
        })
    }
}

/// Pick the most recent extracted folder for a naming prefix.
///
/// Folders are named `<prefix>_<suffix>` and ranked by descending string
/// order, so the suffix has to be a zero-padded date or version token.
/// Suffixes of mixed width break that ordering; that case is logged as a
/// warning rather than treated as fatal.
pub fn latest_version(interim_dir: &Path, prefix: &str) -> Result<PathBuf> {
    let needle = format!("{prefix}_");
    let entries = fs::read_dir(interim_dir)
        .with_context(|| format!("listing interim dir {}", interim_dir.display()))?;

    let mut matches: Vec<(String, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?.to_string();
            name.starts_with(&needle).then_some((name, path))
        })
        .collect();

    if matches.is_empty() {
        bail!(
            "no {needle}* folder under {}; extract the raw archives first",
            interim_dir.display()
        );
    }
    matches.sort_by(|a, b| b.0.cmp(&a.0));

    let (latest_name, latest_path) = &matches[0];
    if matches.iter().any(|(name, _)| name.len() != latest_name.len()) {
        warn!(
            prefix,
            picked = %latest_name,
            "matching folder names differ in length, lexicographic latest may not be newest"
        );
    }
    Ok(latest_path.clone())
}

/// Find the one `.dbf` file directly inside a folder.
///
/// The sales export ships a single table whose name varies by vintage.
/// Zero matches is a missing input; more than one means the export layout
/// changed, and silently picking a winner would hide that.
pub fn single_dbf(dir: &Path) -> Result<PathBuf> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("listing folder {}", dir.display()))?;

    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("dbf"))
        })
        .collect();
    found.sort();

    match found.len() {
        0 => bail!("no .dbf file found in {}", dir.display()),
        1 => Ok(found.remove(0)),
        n => {
            let names: Vec<String> = found
                .iter()
                .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect();
            bail!(
                "{n} .dbf files found in {}, expected exactly one: {}",
                dir.display(),
                names.join(", ")
            )
        }
    }
}

/// Check that a fixed-name table file exists inside a folder.
pub fn required_file(dir: &Path, name: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    if !path.is_file() {
        bail!("required file {name} not found in {}", dir.display());
    }
    Ok(path)
}
