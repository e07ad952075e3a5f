//! Disk-backed store of step outputs.
//!
//! One file per entry, named after its [`CacheKey`]. Writes go to a temporary file in
//! the cache directory and are renamed into place, so a reader never observes a partial
//! entry and two writers of the same key simply leave the last complete file.

use super::key::{CacheKey, ConfigFilter, CACHE_FILE_EXTENSION};
use crate::config::ItemKeying;
use crate::data::SampleBatch;
use crate::error::{CacheError, PipelineError, Result};
use crate::params::Configuration;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Counters describing cache usage since construction.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub saves: u64,
    /// Unreadable entries that were discarded and treated as misses.
    pub discarded: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// What the current run keys its entries on.
#[derive(Debug, Clone, Default)]
enum RunScope {
    #[default]
    Unprepared,
    /// Whole-batch entries, scoped by a fingerprint of the input data.
    Batch { data_fingerprint: Option<String> },
    /// One entry per item, scoped by the layout of the input data. The fingerprint
    /// identifies the whole input for fitted-state bookkeeping only.
    Items {
        item_ids: Vec<String>,
        layout: String,
        data_fingerprint: Option<String>,
    },
}

/// Maps (fold, relevant configuration, step[, item]) to persisted sample batches.
#[derive(Debug, Clone)]
pub struct CacheManager {
    fold_id: String,
    cache_folder: PathBuf,
    step_order: Vec<String>,
    config: Configuration,
    scope: RunScope,
    cache_index: BTreeMap<String, PathBuf>,
    stats: CacheStats,
}

impl CacheManager {
    pub fn new(fold_id: impl Into<String>, cache_folder: impl Into<PathBuf>) -> Self {
        Self {
            fold_id: fold_id.into(),
            cache_folder: cache_folder.into(),
            step_order: Vec::new(),
            config: Configuration::new(),
            scope: RunScope::Unprepared,
            cache_index: BTreeMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn fold_id(&self) -> &str {
        &self.fold_id
    }

    pub fn cache_folder(&self) -> &Path {
        &self.cache_folder
    }

    /// Entries written or read by this manager: key digest to file path.
    pub fn cache_index(&self) -> &BTreeMap<String, PathBuf> {
        &self.cache_index
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Record the step order and configuration of the current run.
    ///
    /// With `item_keying` set, entries are cached per item and `data` must provide the
    /// item identifiers; otherwise entries are per batch and scoped by a fingerprint of
    /// `data` when given.
    pub fn prepare(
        &mut self,
        step_names: &[String],
        config: &Configuration,
        data: Option<&SampleBatch>,
        item_keying: Option<ItemKeying>,
    ) -> Result<()> {
        self.step_order = step_names.to_vec();
        self.config = config.clone();
        self.scope = match item_keying {
            None => RunScope::Batch {
                data_fingerprint: data.map(SampleBatch::fingerprint),
            },
            Some(keying) => {
                let data = data.ok_or_else(|| {
                    PipelineError::config("single-item caching requires the input data to identify items")
                })?;
                RunScope::Items {
                    item_ids: item_identifiers(data, keying)?,
                    layout: data.layout_signature(),
                    data_fingerprint: Some(data.fingerprint()),
                }
            }
        };
        Ok(())
    }

    /// Number of items of a per-item run (0 for batch runs).
    pub fn n_items(&self) -> usize {
        match &self.scope {
            RunScope::Items { item_ids, .. } => item_ids.len(),
            _ => 0,
        }
    }

    fn relevant_digest(&self, step: &str) -> Result<String> {
        ConfigFilter::new(&self.step_order, &self.config).relevant_digest(step)
    }

    /// Key of the batch-level entry for `step` under the current run.
    pub fn generate_cache_key(&self, step: &str) -> Result<CacheKey> {
        let data_fingerprint = match &self.scope {
            RunScope::Batch { data_fingerprint } => data_fingerprint.clone(),
            RunScope::Items { .. } => {
                return Err(PipelineError::config(
                    "batch cache key requested during a single-item run",
                ))
            }
            RunScope::Unprepared => return Err(unprepared()),
        };
        Ok(CacheKey {
            fold_id: self.fold_id.clone(),
            data_fingerprint,
            config_digest: self.relevant_digest(step)?,
            step: step.to_string(),
            item: None,
        })
    }

    /// Key naming what `step` is fitted on under the current run: fold, input data and
    /// relevant configuration. Equal to the batch-level key in batch runs; also defined
    /// for single-item runs, where no batch entry is ever written under it.
    pub fn generate_fit_key(&self, step: &str) -> Result<CacheKey> {
        let data_fingerprint = match &self.scope {
            RunScope::Batch { data_fingerprint } | RunScope::Items { data_fingerprint, .. } => {
                data_fingerprint.clone()
            }
            RunScope::Unprepared => return Err(unprepared()),
        };
        Ok(CacheKey {
            fold_id: self.fold_id.clone(),
            data_fingerprint,
            config_digest: self.relevant_digest(step)?,
            step: step.to_string(),
            item: None,
        })
    }

    /// Key of the entry of item `index` for `step` under the current run.
    pub fn generate_item_key(&self, step: &str, index: usize) -> Result<CacheKey> {
        let (item, layout) = match &self.scope {
            RunScope::Items { item_ids, layout, .. } => {
                let item = item_ids.get(index).cloned().ok_or_else(|| {
                    PipelineError::config(format!(
                        "item index {index} out of range for {} items",
                        item_ids.len()
                    ))
                })?;
                (item, layout.clone())
            }
            RunScope::Batch { .. } => {
                return Err(PipelineError::config("item cache key requested during a batch run"))
            }
            RunScope::Unprepared => return Err(unprepared()),
        };
        Ok(CacheKey {
            fold_id: self.fold_id.clone(),
            data_fingerprint: Some(layout),
            config_digest: self.relevant_digest(step)?,
            step: step.to_string(),
            item: Some(item),
        })
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.cache_folder.join(key.file_name())
    }

    /// Whether an entry exists for `step`.
    pub fn check_cache(&self, step: &str) -> Result<bool> {
        let key = self.generate_cache_key(step)?;
        Ok(self.path_for(&key).is_file())
    }

    /// Whether an entry exists for item `index` of `step`.
    pub fn check_item(&self, step: &str, index: usize) -> Result<bool> {
        let key = self.generate_item_key(step, index)?;
        Ok(self.path_for(&key).is_file())
    }

    /// Cached output of `step`, or `None` on a miss.
    pub fn load_cached_data(&mut self, step: &str) -> Result<Option<SampleBatch>> {
        let key = self.generate_cache_key(step)?;
        self.load_key(&key)
    }

    /// Cached output of `step` for item `index`, or `None` on a miss.
    pub fn load_item(&mut self, step: &str, index: usize) -> Result<Option<SampleBatch>> {
        let key = self.generate_item_key(step, index)?;
        self.load_key(&key)
    }

    /// Persist the output of `step`, replacing any previous entry under the same key.
    pub fn save_data_to_cache(&mut self, step: &str, data: &SampleBatch) -> Result<()> {
        let key = self.generate_cache_key(step)?;
        self.save_key(&key, data)
    }

    /// Persist the output of `step` for item `index`.
    pub fn save_item(&mut self, step: &str, index: usize, data: &SampleBatch) -> Result<()> {
        let key = self.generate_item_key(step, index)?;
        self.save_key(&key, data)
    }

    /// Read the entry for `key`. Absent or undecodable files are misses.
    pub fn load_key(&mut self, key: &CacheKey) -> Result<Option<SampleBatch>> {
        let path = self.path_for(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.stats.misses += 1;
                debug!("cache miss for step '{}' ({})", key.step, short(&path));
                return Ok(None);
            }
            Err(e) => return Err(CacheError::io(path, e).into()),
        };

        let decoded = bincode::deserialize::<SampleBatch>(&bytes)
            .map_err(|e| e.to_string())
            .and_then(|batch| batch.validate().map(|_| batch).map_err(|e| e.to_string()));
        match decoded {
            Ok(batch) => {
                self.stats.hits += 1;
                debug!("cache hit for step '{}' ({})", key.step, short(&path));
                self.cache_index.insert(key.digest(), path);
                Ok(Some(batch))
            }
            Err(reason) => {
                warn!(
                    "discarding unreadable cache entry {} for step '{}': {}",
                    path.display(),
                    key.step,
                    reason
                );
                discard_entry(&path);
                self.stats.discarded += 1;
                self.stats.misses += 1;
                Ok(None)
            }
        }
    }

    /// Write the entry for `key` atomically.
    pub fn save_key(&mut self, key: &CacheKey, data: &SampleBatch) -> Result<()> {
        std::fs::create_dir_all(&self.cache_folder)
            .map_err(|e| CacheError::io(&self.cache_folder, e))?;
        let path = self.path_for(key);

        let tmp = tempfile::NamedTempFile::new_in(&self.cache_folder)
            .map_err(|e| CacheError::io(&self.cache_folder, e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            bincode::serialize_into(&mut writer, data).map_err(|e| CacheError::Serialization {
                path: path.clone(),
                message: e.to_string(),
            })?;
            writer.flush().map_err(|e| CacheError::io(&path, e))?;
        }
        tmp.persist(&path).map_err(|e| CacheError::io(&path, e.error))?;

        self.stats.saves += 1;
        debug!("cached output of step '{}' ({})", key.step, short(&path));
        self.cache_index.insert(key.digest(), path);
        Ok(())
    }

    /// Remove every entry of this manager's fold. Idempotent.
    pub fn clear_cache(&mut self) -> Result<usize> {
        let prefix = CacheKey::fold_prefix(&self.fold_id);
        let removed = remove_entries(&self.cache_folder, |name| name.starts_with(&prefix))?;
        self.cache_index.clear();
        info!(
            "cleared {} cache entries of fold '{}' in {}",
            removed,
            self.fold_id,
            self.cache_folder.display()
        );
        Ok(removed)
    }

    /// Remove every cache entry in `folder`, whatever its fold. A missing folder is a no-op.
    pub fn clear_cache_files<P: AsRef<Path>>(folder: P) -> Result<usize> {
        let folder = folder.as_ref();
        let removed = remove_entries(folder, |_| true)?;
        info!("cleared {} cache entries in {}", removed, folder.display());
        Ok(removed)
    }

    /// Number of cache entries currently on disk in `folder`.
    pub fn count_entries<P: AsRef<Path>>(folder: P) -> Result<usize> {
        Ok(list_entries(folder.as_ref())?.len())
    }
}

fn list_entries(folder: &Path) -> Result<Vec<PathBuf>> {
    let read_dir = match std::fs::read_dir(folder) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CacheError::io(folder, e).into()),
    };
    let mut entries = Vec::new();
    for entry in read_dir {
        let path = entry.map_err(|e| CacheError::io(folder, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == CACHE_FILE_EXTENSION) {
            entries.push(path);
        }
    }
    Ok(entries)
}

fn remove_entries(folder: &Path, keep_if: impl Fn(&str) -> bool) -> Result<usize> {
    let mut removed = 0;
    for path in list_entries(folder)? {
        let selected = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(&keep_if);
        if !selected {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            // a concurrent clear got there first
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(path, e).into()),
        }
    }
    Ok(removed)
}

/// Remove an unreadable entry; returns whether the file is gone.
fn discard_entry(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!("could not remove unreadable cache entry {}: {}", path.display(), e);
            false
        }
    }
}

fn item_identifiers(data: &SampleBatch, keying: ItemKeying) -> Result<Vec<String>> {
    match keying {
        ItemKeying::SampleIds => {
            let ids = data.sample_ids().ok_or_else(|| {
                PipelineError::config(format!(
                    "single-item caching requires a '{}' label channel",
                    crate::data::SAMPLE_IDS
                ))
            })?;
            Ok(ids.to_vec())
        }
        ItemKeying::RowContent => Ok((0..data.n_samples()).map(|i| data.row_digest(i)).collect()),
    }
}

fn unprepared() -> PipelineError {
    PipelineError::config("cache manager used before prepare()")
}

fn short(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
