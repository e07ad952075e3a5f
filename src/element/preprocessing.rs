//! Fixed preprocessing applied before every other step.

use super::{Node, PipelineElement};
use crate::data::SampleBatch;
use crate::error::{PipelineError, Result};
use crate::params::Configuration;
use crate::pipeline::PhotonPipeline;

/// Step name under which preprocessing is inserted.
pub const PREPROCESSING: &str = "Preprocessing";

/// A sub-pipeline outside the hyperparameter search, always placed first.
#[derive(Clone, Debug, Default)]
pub struct Preprocessing {
    pipeline: PhotonPipeline,
}

impl Preprocessing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an element. Elements with a search space are rejected.
    pub fn add(&mut self, element: PipelineElement) -> Result<()> {
        if !element.hyperparameters().is_empty() {
            return Err(PipelineError::config(format!(
                "preprocessing element '{}' must not carry hyperparameters",
                element.name()
            )));
        }
        self.pipeline.add(Node::Element(element))
    }

    pub fn with(mut self, element: PipelineElement) -> Result<Self> {
        self.add(element)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        PREPROCESSING
    }

    pub fn pipeline(&self) -> &PhotonPipeline {
        &self.pipeline
    }

    pub fn set_params(&mut self, config: &Configuration) -> Result<()> {
        match config.iter().next() {
            Some((key, _)) => Err(PipelineError::config(format!(
                "preprocessing is not tunable, got '{key}'"
            ))),
            None => Ok(()),
        }
    }

    pub fn fit(&mut self, batch: &SampleBatch) -> Result<()> {
        self.pipeline.fit(batch)
    }

    pub fn transform(&mut self, batch: SampleBatch) -> Result<SampleBatch> {
        self.pipeline.transform(batch)
    }

    pub fn inverse_transform(&mut self, batch: SampleBatch) -> Result<SampleBatch> {
        self.pipeline.inverse_transform(batch)
    }
}
