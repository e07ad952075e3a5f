//! Caching configuration.
//!
//! # Example
//! ```ignore
//! use photonpipe_rs::config::CacheSettings;
//!
//! let settings = CacheSettings::new()
//!     .with_caching(true)
//!     .with_cache_folder("/tmp/photon_cache")
//!     .with_fold_id("outer_0_inner_2");
//! ```

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How per-item cache entries identify their item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKeying {
    /// Use the `sample_ids` label channel. Missing identifiers are a configuration error.
    #[default]
    SampleIds,
    /// Use a digest of the sample's feature row.
    RowContent,
}

/// Configuration of the memoization layer of a pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Master switch. Disabled caching never changes results, only speed.
    pub enabled: bool,
    /// Directory holding cache files. Required when `enabled`.
    pub cache_folder: Option<PathBuf>,
    /// Fold identifier namespacing every entry.
    pub fold_id: String,
    /// Cache one entry per sample instead of one per batch.
    pub single_item_caching: bool,
    /// Source of per-item identifiers.
    pub item_keying: ItemKeying,
    /// Recompute instead of failing when the cache directory cannot be read or written.
    pub fallback_on_io_error: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cache_folder: None,
            fold_id: "default".to_string(),
            single_item_caching: false,
            item_keying: ItemKeying::default(),
            fallback_on_io_error: false,
        }
    }
}

impl CacheSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_cache_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.cache_folder = Some(folder.into());
        self
    }

    pub fn with_fold_id(mut self, fold_id: impl Into<String>) -> Self {
        self.fold_id = fold_id.into();
        self
    }

    pub fn with_single_item_caching(mut self, single_item: bool) -> Self {
        self.single_item_caching = single_item;
        self
    }

    pub fn with_item_keying(mut self, keying: ItemKeying) -> Self {
        self.item_keying = keying;
        self
    }

    pub fn with_fallback_on_io_error(mut self, fallback: bool) -> Self {
        self.fallback_on_io_error = fallback;
        self
    }

    /// Load settings from a JSON file; absent fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!("cannot read cache settings {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            PipelineError::config(format!("invalid cache settings {}: {e}", path.display()))
        })
    }

    /// The cache folder, or a configuration error when caching is on without one.
    pub fn require_folder(&self) -> Result<&Path, PipelineError> {
        self.cache_folder
            .as_deref()
            .ok_or_else(|| PipelineError::config("caching is enabled but no cache_folder is set"))
    }
}
