//! Loader configuration.
//!
//! Everything has a sensible default so `LoaderConfig::new(db_root)` is all
//! most callers need; a TOML file can override paths and policies.
//!
//! The default ephemeral root lives under the store root. That keeps
//! staging, backup, and foreground partitions on one filesystem, so the
//! publish step stays a single directory rename.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use krxdb_core::error::{KdbError, Result};
use krxdb_core::store::StoreLayout;

#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    /// Root of the persistent Parquet database.
    pub db_root: PathBuf,
    /// Root for the ephemeral cache, staging, and backup trees.
    /// Defaults to `<db_root>/temp`.
    #[serde(default)]
    pub ephemeral_root: Option<PathBuf>,
    /// Re-fetch and rewrite snapshot partitions even when present.
    #[serde(default)]
    pub force_refetch: bool,
    /// Optional TOML file extending the built-in field registry.
    #[serde(default)]
    pub fields_file: Option<PathBuf>,
}

impl LoaderConfig {
    pub fn new(db_root: impl Into<PathBuf>) -> Self {
        Self {
            db_root: db_root.into(),
            ephemeral_root: None,
            force_refetch: false,
            fields_file: None,
        }
    }

    pub fn with_ephemeral_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.ephemeral_root = Some(path.into());
        self
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| KdbError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| KdbError::Config(format!("config parse: {e}")))
    }

    pub fn ephemeral_root(&self) -> PathBuf {
        self.ephemeral_root
            .clone()
            .unwrap_or_else(|| self.db_root.join("temp"))
    }

    pub fn layout(&self) -> StoreLayout {
        StoreLayout::new(self.db_root.clone(), self.ephemeral_root())
    }
}
