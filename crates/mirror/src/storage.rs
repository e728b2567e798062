//! # Storage Probe
//!
//! Filesystem helpers for the on-disk cache. The layout is a flat two-level
//! tree, `<root>/<name>/<name>@<version>`, holding raw tarball bytes with no
//! sidecar metadata. Only the final entry path counts as a cache hit; writers
//! fill a uniquely named, dot-prefixed `.part` file next to it and rename it
//! into place. Entry files in `<name>/` always start with `<name>@`, so no key
//! maps onto a partial file.

use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io;

use crate::key::CacheKey;

const PARTIAL_EXTENSION: &str = "part";

/// Whether a cache entry exists at `path`.
///
/// Never fails: any error, including not-found, reads as `false`.
pub async fn exists(path: &Path) -> bool {
    match fs::metadata(path).await {
        Ok(metadata) => metadata.is_file(),
        Err(_) => false,
    }
}

/// Create `path` and all missing ancestors.
///
/// Callers treat this as best effort: the error is reported so it can be
/// logged, but the following write is attempted regardless and fails on its
/// own if the directory really is missing.
pub async fn ensure_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path).await
}

/// Maps cache keys onto paths below the cache root
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final location of the entry for `key`
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    /// Directory holding every version of `key`'s crate
    pub fn crate_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.name())
    }

    /// A fresh temporary path in the entry's directory, unique per writer
    pub fn partial_path(&self, key: &CacheKey) -> PathBuf {
        let suffix = uuid::Uuid::new_v4().simple();
        self.crate_dir(key).join(format!(
            ".{}.{suffix}.{PARTIAL_EXTENSION}",
            key.file_name()
        ))
    }

    /// Open an existing entry for reading, returning the file and its length
    pub async fn open_entry(&self, key: &CacheKey) -> io::Result<(File, u64)> {
        let file = File::open(self.entry_path(key)).await?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }
}
