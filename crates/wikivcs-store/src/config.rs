//! Store configuration: defaults plus `.toml` / `.json` files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};
use crate::history_cache::HistoryCacheConfig;

/// Settings for opening a [`WikiStorage`](crate::engine::WikiStorage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Working tree of the page repository.
    pub page_dir: PathBuf,
    /// Working tree of the attachment repository.
    pub attachment_dir: PathBuf,
    /// Initialize missing repositories instead of failing.
    pub create_if_missing: bool,
    /// Keep latest-revision metadata records next to each repository.
    pub sidecar_enabled: bool,
    /// Histories kept in memory per store. Zero disables the cache.
    pub history_cache_entries: usize,
    /// Report blob sizes in attachment histories.
    pub attachment_sizes: bool,
    /// Known authors: name to email.
    pub users: BTreeMap<String, String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_dir: PathBuf::from("./wiki/pages"),
            attachment_dir: PathBuf::from("./wiki/attachments"),
            create_if_missing: true,
            sidecar_enabled: true,
            history_cache_entries: HistoryCacheConfig::default().max_entries,
            attachment_sizes: true,
            users: BTreeMap::new(),
        }
    }
}

impl StoreConfig {
    /// Both repositories under one root: `<root>/pages` and `<root>/attachments`.
    pub fn under(root: &Path) -> Self {
        Self {
            page_dir: root.join("pages"),
            attachment_dir: root.join("attachments"),
            ..Self::default()
        }
    }

    /// Loads a `.toml` or `.json` file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> StoreResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| {
                StoreError::Configuration(format!("invalid {}: {}", path.display(), e))
            }),
            "json" => serde_json::from_str(&contents).map_err(|e| {
                StoreError::Configuration(format!("invalid {}: {}", path.display(), e))
            }),
            _ => Err(StoreError::Configuration(format!(
                "Unsupported config file extension: {}",
                ext
            ))),
        }
    }

    pub(crate) fn cache_config(&self) -> HistoryCacheConfig {
        HistoryCacheConfig {
            max_entries: self.history_cache_entries,
        }
    }
}
