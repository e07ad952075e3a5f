//! Cache key derivation.
//!
//! A step's output depends on the parameters of that step and of every step before it.
//! [`ConfigFilter`] cuts the full configuration down to exactly that subset, and
//! [`config_digest`] turns it into a stable SHA-256 hex digest. Two configurations
//! that differ only downstream of a step yield the same digest for that step.

use crate::error::{PipelineError, Result};
use crate::params::{split_key, Configuration, ParamValue};
use sha2::{Digest, Sha256};

/// Extension of every cache file.
pub const CACHE_FILE_EXTENSION: &str = "pcache";

/// Selects the relevant part of a configuration for a step.
#[derive(Debug, Clone, Copy)]
pub struct ConfigFilter<'a> {
    step_order: &'a [String],
    config: &'a Configuration,
}

impl<'a> ConfigFilter<'a> {
    pub fn new(step_order: &'a [String], config: &'a Configuration) -> Self {
        Self { step_order, config }
    }

    /// Names of `step` and every step before it, in execution order.
    pub fn upstream_of(&self, step: &str) -> Result<&'a [String]> {
        let pos = self
            .step_order
            .iter()
            .position(|s| s == step)
            .ok_or_else(|| PipelineError::config(format!("step '{step}' is not part of the pipeline")))?;
        Ok(&self.step_order[..=pos])
    }

    /// The sub-configuration whose first path segment names `step` or an upstream step.
    pub fn relevant(&self, step: &str) -> Result<Configuration> {
        let upstream = self.upstream_of(step)?;
        Ok(self
            .config
            .iter()
            .filter(|(k, _)| {
                let head = split_key(k).map_or(k.as_str(), |(h, _)| h);
                upstream.iter().any(|s| s == head)
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Digest of [`relevant`](Self::relevant).
    pub fn relevant_digest(&self, step: &str) -> Result<String> {
        Ok(config_digest(&self.relevant(step)?))
    }
}

/// Order-independent digest of a configuration. The empty configuration has a fixed digest.
pub fn config_digest(config: &Configuration) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"config");
    // BTreeMap iteration is sorted by key
    for (key, value) in config.as_map() {
        hasher.update((key.len() as u64).to_le_bytes());
        hasher.update(key.as_bytes());
        feed_value(&mut hasher, value);
    }
    format!("{:x}", hasher.finalize())
}

fn feed_value(hasher: &mut Sha256, value: &ParamValue) {
    match value {
        ParamValue::Bool(b) => {
            hasher.update(b"b");
            hasher.update([*b as u8]);
        }
        ParamValue::Int(i) => {
            hasher.update(b"i");
            hasher.update(i.to_le_bytes());
        }
        ParamValue::Float(f) => {
            hasher.update(b"f");
            hasher.update(f.to_bits().to_le_bytes());
        }
        ParamValue::Str(s) => {
            hasher.update(b"s");
            hasher.update((s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        ParamValue::IntList(l) => {
            hasher.update(b"l");
            hasher.update((l.len() as u64).to_le_bytes());
            l.iter().for_each(|i| hasher.update(i.to_le_bytes()));
        }
    }
}

/// Full identity of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Fold identifier.
    pub fold_id: String,
    /// Fingerprint of the data that entered the pipeline; layout signature for item entries.
    pub data_fingerprint: Option<String>,
    /// Digest of the relevant configuration.
    pub config_digest: String,
    /// Step name.
    pub step: String,
    /// Item identifier (per-item entries only).
    pub item: Option<String>,
}

impl CacheKey {
    /// Digest over every component of the key.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            Some(self.fold_id.as_str()),
            self.data_fingerprint.as_deref(),
            Some(self.config_digest.as_str()),
            Some(self.step.as_str()),
            self.item.as_deref(),
        ] {
            match part {
                Some(p) => {
                    hasher.update([1u8]);
                    hasher.update((p.len() as u64).to_le_bytes());
                    hasher.update(p.as_bytes());
                }
                None => hasher.update([0u8]),
            }
        }
        format!("{:x}", hasher.finalize())
    }

    /// File name of this entry: `<fold>.<step>.<digest>.pcache`.
    pub fn file_name(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            escape(&self.fold_id),
            escape(&self.step),
            &self.digest()[..40],
            CACHE_FILE_EXTENSION
        )
    }

    /// File-name prefix shared by every entry of `fold_id`.
    pub fn fold_prefix(fold_id: &str) -> String {
        format!("{}.", escape(fold_id))
    }
}

/// Injective, file-name safe form of a name. ASCII alphanumerics and `-` are kept, `_`
/// is doubled and any other character becomes `_<hex code point>_`, so the output never
/// contains the `.` separator.
fn escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            c if c.is_ascii_alphanumeric() || c == '-' => out.push(c),
            '_' => out.push_str("__"),
            c => out.push_str(&format!("_{:x}_", c as u32)),
        }
    }
    out
}
