//! File locations inside a store directory.

use std::path::{Path, PathBuf};

const HEADER_FILENAME: &str = "store.header";
const RECORDS_FILENAME: &str = "store.records";
const LOCK_FILENAME: &str = "store.lock";
const DELETION_MARKER_FILENAME: &str = "store.deleting";
const TEMP_SUFFIX: &str = ".tmp";

/// Paths for the files that make up one encrypted store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    dir: PathBuf,
}

impl StorePaths {
    /// Builds store paths rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path to the store header.
    #[must_use]
    pub fn header_path(&self) -> PathBuf {
        self.dir.join(HEADER_FILENAME)
    }

    /// Returns the path to the sealed record snapshot.
    #[must_use]
    pub fn records_path(&self) -> PathBuf {
        self.dir.join(RECORDS_FILENAME)
    }

    /// Returns the path to the lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILENAME)
    }

    /// Returns the path of the marker written while a deletion runs.
    #[must_use]
    pub fn deletion_marker_path(&self) -> PathBuf {
        self.dir.join(DELETION_MARKER_FILENAME)
    }

    /// Returns the staging path used for an atomic replace of `target`.
    pub(crate) fn temp_path(target: &Path) -> PathBuf {
        let mut name = target.file_name().unwrap_or_default().to_os_string();
        name.push(TEMP_SUFFIX);
        target.with_file_name(name)
    }
}
