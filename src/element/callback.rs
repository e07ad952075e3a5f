//! Observation hook inside a pipeline.

use crate::data::SampleBatch;
use crate::error::{PipelineError, Result};
use crate::params::Configuration;
use std::fmt;
use std::sync::Arc;

/// Function invoked with the data flowing past a [`CallbackElement`].
pub type CallbackFn = Arc<dyn Fn(&SampleBatch) + Send + Sync>;

/// Calls a function with the current batch and passes the batch on unchanged.
/// Copies of the element share the function.
#[derive(Clone)]
pub struct CallbackElement {
    name: String,
    delegate: CallbackFn,
}

impl CallbackElement {
    pub fn new<F>(name: impl Into<String>, delegate: F) -> Self
    where
        F: Fn(&SampleBatch) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            delegate: Arc::new(delegate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn delegate_function(&self) -> &CallbackFn {
        &self.delegate
    }

    /// Callbacks take no parameters.
    pub fn set_params(&mut self, config: &Configuration) -> Result<()> {
        match config.iter().next() {
            Some((key, _)) => Err(PipelineError::config(format!(
                "callback '{}' has no parameter '{key}'",
                self.name
            ))),
            None => Ok(()),
        }
    }

    pub fn transform(&self, batch: SampleBatch) -> SampleBatch {
        (self.delegate)(&batch);
        batch
    }
}

impl fmt::Debug for CallbackElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackElement").field("name", &self.name).finish()
    }
}
