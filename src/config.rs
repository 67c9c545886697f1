// src/config.rs

use std::path::{Path, PathBuf};

/// Directory layout a run operates on.
///
/// Passed explicitly into each stage instead of living as module constants,
/// so tests can point a whole pipeline at a temporary directory.
#[derive(Debug, Clone)]
pub struct DataPaths {
    /// Where the downloaded `*.zip` archives sit.
    pub raw_dir: PathBuf,
    /// Where archives are expanded, one folder per archive stem.
    pub interim_dir: PathBuf,
    /// Where the final Parquet files are written.
    pub processed_dir: PathBuf,
}

impl DataPaths {
    /// The conventional `<root>/raw`, `<root>/interim`, `<root>/processed`
    /// layout.
    pub fn rooted(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            raw_dir: root.join("raw"),
            interim_dir: root.join("interim"),
            processed_dir: root.join("processed"),
        }
    }
}
