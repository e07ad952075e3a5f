//! A named sub-pipeline usable as a single step.

use super::{ElementKind, Node};
use crate::config::CacheSettings;
use crate::data::SampleBatch;
use crate::error::Result;
use crate::params::{prefix_hyperparameters, Configuration, Hyperparameters};
use crate::pipeline::PhotonPipeline;
use std::path::Path;

/// Sub-pipeline addressed as `branch__innerStep__param`.
///
/// A branch may cache on its own (for example per item, see
/// [`CacheSettings::single_item_caching`]); its fold is derived from the enclosing run.
#[derive(Clone, Debug)]
pub struct Branch {
    name: String,
    pipeline: PhotonPipeline,
}

impl Branch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pipeline: PhotonPipeline::default(),
        }
    }

    /// Append a step to the inner pipeline.
    pub fn add(&mut self, node: impl Into<Node>) -> Result<()> {
        self.pipeline.add(node)
    }

    pub fn with(mut self, node: impl Into<Node>) -> Result<Self> {
        self.add(node)?;
        Ok(self)
    }

    /// Caching of the inner pipeline. The fold id is overwritten by the enclosing run.
    pub fn with_cache_settings(mut self, settings: CacheSettings) -> Self {
        self.pipeline.set_cache_settings(settings);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipeline(&self) -> &PhotonPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut PhotonPipeline {
        &mut self.pipeline
    }

    pub fn kind(&self) -> ElementKind {
        if self.pipeline.has_estimator() {
            ElementKind::Estimator
        } else {
            ElementKind::Transformer
        }
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        prefix_hyperparameters(&self.name, &self.pipeline.hyperparameters())
    }

    pub fn set_params(&mut self, config: &Configuration) -> Result<()> {
        self.pipeline.apply_params(config)
    }

    pub fn reset_params(&mut self) -> Result<()> {
        self.pipeline.reset_params()
    }

    pub(crate) fn inherit_cache_scope(&mut self, fold_id: &str, folder: Option<&Path>) {
        let fold = format!("{fold_id}-{}", self.name);
        self.pipeline.set_fold_id(fold);
        if self.pipeline.cache_folder().is_none() {
            if let Some(folder) = folder {
                self.pipeline.set_cache_folder(folder);
            }
        }
    }

    pub fn fit(&mut self, batch: &SampleBatch) -> Result<()> {
        self.pipeline.fit(batch)
    }

    pub fn transform(&mut self, batch: SampleBatch) -> Result<SampleBatch> {
        self.pipeline.transform(batch)
    }
}
