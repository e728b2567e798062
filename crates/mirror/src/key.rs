//! # Cache Keys
//!
//! A cache key is the `(name, version)` pair taken from the request path.
//! Both parts are used verbatim as path segments, so construction rejects
//! anything that could escape the cache root instead of rewriting it.

use std::fmt;
use std::path::PathBuf;

use crate::MirrorError;

/// Identifies one crate tarball
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    name: String,
    version: String,
}

impl CacheKey {
    /// Create a new cache key, rejecting segments that are not plain file names
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Result<Self, MirrorError> {
        let name = name.into();
        let version = version.into();
        validate_segment("name", &name)?;
        validate_segment("version", &version)?;
        Ok(Self { name, version })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// File name of the cache entry: `<name>@<version>`
    pub fn file_name(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// Entry path relative to the cache root: `<name>/<name>@<version>`
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.name).join(self.file_name())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

fn validate_segment(what: &str, value: &str) -> Result<(), MirrorError> {
    if value.is_empty() {
        return Err(MirrorError::InvalidKey(format!("{what} is empty")));
    }
    if value == "." || value == ".." {
        return Err(MirrorError::InvalidKey(format!(
            "{what} '{value}' is not a file name"
        )));
    }
    if value.contains(['/', '\\', '\0']) {
        return Err(MirrorError::InvalidKey(format!(
            "{what} '{}' contains a path separator",
            value.escape_debug()
        )));
    }
    Ok(())
}
