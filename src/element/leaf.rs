//! Leaf pipeline element wrapping a single algorithm.
//!
//! # Example
//! ```ignore
//! use photonpipe_rs::element::PipelineElement;
//! use photonpipe_rs::estimators::Pca;
//!
//! let pca = PipelineElement::new("PCA", Pca::new())
//!     .with_hyperparameters([("n_components", vec![3.into(), 10.into()])])?
//!     .test_disabled(true);
//! ```

use super::registry::ElementRegistry;
use super::{BaseEstimator, ElementKind, Transform};
use crate::data::SampleBatch;
use crate::error::{ElementError, PipelineError, Result};
use crate::params::{join_key, Configuration, Hyperparameters, ParamValue, Params};
use log::debug;
use ndarray::{Array1, Array2};

/// Name of the pseudo-parameter switching an element off.
pub const DISABLED: &str = "disabled";

/// Name of the parameter seeded from the pipeline random state.
pub const RANDOM_STATE: &str = "random_state";

/// A named, configurable wrapper around one [`BaseEstimator`].
#[derive(Clone, Debug)]
pub struct PipelineElement {
    name: String,
    base: Box<dyn BaseEstimator>,
    kind: ElementKind,
    hyperparameters: Hyperparameters,
    defaults: Params,
    disabled: bool,
    batch_size: usize,
    n_workers: usize,
}

impl PipelineElement {
    /// Wrap `base` under `name`. The element kind follows the declared capabilities.
    pub fn new(name: impl Into<String>, base: impl BaseEstimator + 'static) -> Self {
        Self::from_boxed(name, Box::new(base))
    }

    pub fn from_boxed(name: impl Into<String>, base: Box<dyn BaseEstimator>) -> Self {
        let kind = base.kind();
        let defaults = base.get_params();
        Self {
            name: name.into(),
            base,
            kind,
            hyperparameters: Hyperparameters::new(),
            defaults,
            disabled: false,
            batch_size: 0,
            n_workers: 1,
        }
    }

    /// Instantiate `name` through `registry` and attach a hyperparameter grid.
    ///
    /// The registry tag decides the element kind; a tag the object cannot honour
    /// (an estimator without `predict`, a transformer without `transform`) is rejected.
    pub fn from_registry<'a, I>(registry: &ElementRegistry, name: &str, hyperparameters: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, Vec<ParamValue>)>,
    {
        let entry = registry
            .get(name)
            .ok_or_else(|| PipelineError::config(format!("element '{name}' is not registered")))?;
        let base = entry.create();
        let offers = match entry.kind {
            ElementKind::Estimator => base.as_predictor().is_some(),
            ElementKind::Transformer => base.as_transformer().is_some(),
        };
        if !offers {
            return Err(PipelineError::config(format!(
                "element '{name}' is registered as {:?} but lacks that capability",
                entry.kind
            )));
        }
        let mut element = Self::from_boxed(name, base);
        element.kind = entry.kind;
        element.with_hyperparameters(hyperparameters)
    }

    /// Attach a search space keyed by plain parameter names.
    pub fn with_hyperparameters<'a, I>(mut self, grid: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, Vec<ParamValue>)>,
    {
        for (param, values) in grid {
            if param != DISABLED && !self.base.param_names().contains(&param) {
                return Err(self.unknown_param(param));
            }
            if values.is_empty() {
                return Err(PipelineError::config(format!(
                    "hyperparameter '{param}' of '{}' has no candidate values",
                    self.name
                )));
            }
            self.hyperparameters.insert(join_key(&self.name, param), values);
        }
        Ok(self)
    }

    /// Fix a parameter outside the search space. The value becomes the element default.
    pub fn with_param(mut self, param: &str, value: impl Into<ParamValue>) -> Result<Self> {
        self.set_param(param, &value.into())?;
        self.defaults = self.base.get_params();
        Ok(self)
    }

    /// Let the search also try the pipeline without this element.
    pub fn test_disabled(mut self, test: bool) -> Self {
        let key = join_key(&self.name, DISABLED);
        if test {
            self.hyperparameters
                .insert(key, vec![ParamValue::Bool(false), ParamValue::Bool(true)]);
        } else {
            self.hyperparameters.remove(&key);
        }
        self
    }

    /// Transform in chunks of `batch_size` rows (0 disables batching).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Number of worker threads for batched transforms.
    pub fn with_workers(mut self, n_workers: usize) -> Self {
        self.n_workers = n_workers.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn base_element(&self) -> &dyn BaseEstimator {
        self.base.as_ref()
    }

    pub fn base_element_mut(&mut self) -> &mut dyn BaseEstimator {
        self.base.as_mut()
    }

    /// Search space with fully-qualified keys.
    pub fn hyperparameters(&self) -> &Hyperparameters {
        &self.hyperparameters
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn declares_random_state(&self) -> bool {
        self.base.param_names().contains(&RANDOM_STATE)
    }

    /// Set one parameter by plain name, rejecting names outside the element schema.
    pub fn set_param(&mut self, param: &str, value: &ParamValue) -> Result<()> {
        if param == DISABLED {
            self.disabled = value.expect_bool(DISABLED)?;
            return Ok(());
        }
        if !self.base.param_names().contains(&param) {
            return Err(self.unknown_param(param));
        }
        self.base.set_param(param, value)?;
        Ok(())
    }

    /// Apply a configuration scoped to this element (plain parameter names).
    pub fn set_params(&mut self, config: &Configuration) -> Result<()> {
        for (param, value) in config {
            self.set_param(param, value)?;
        }
        Ok(())
    }

    /// Restore the construction-time parameters.
    pub fn reset_params(&mut self) -> Result<()> {
        for (param, value) in &self.defaults {
            self.base.set_param(param, value)?;
        }
        self.disabled = false;
        Ok(())
    }

    pub fn fit(&mut self, batch: &SampleBatch) -> std::result::Result<(), ElementError> {
        if self.disabled {
            debug!("'{}' is disabled, skipping fit", self.name);
            return Ok(());
        }
        self.base.fit(batch)
    }

    pub fn can_transform(&self) -> bool {
        self.disabled || self.base.as_transformer().is_some()
    }

    pub fn transform(&self, batch: SampleBatch) -> std::result::Result<SampleBatch, ElementError> {
        if self.disabled {
            return Ok(batch);
        }
        let transformer = self.base.as_transformer().ok_or_else(|| {
            ElementError::Unsupported(format!("'{}' cannot transform", self.name))
        })?;
        if transformer.needs_y() && batch.y.is_none() {
            debug!("'{}' transforms targets but y is absent, passing through", self.name);
            return Ok(batch);
        }
        self.transform_batched(transformer, batch)
    }

    pub fn predict(&self, batch: &SampleBatch) -> std::result::Result<Array1<f64>, ElementError> {
        self.base
            .as_predictor()
            .ok_or_else(|| ElementError::Unsupported(format!("'{}' cannot predict", self.name)))?
            .predict(&batch.x, &batch.kwargs)
    }

    pub fn predict_proba(&self, batch: &SampleBatch) -> std::result::Result<Array2<f64>, ElementError> {
        self.base
            .as_proba_predictor()
            .ok_or_else(|| {
                ElementError::Unsupported(format!("'{}' cannot predict probabilities", self.name))
            })?
            .predict_proba(&batch.x, &batch.kwargs)
    }

    pub fn has_inverse(&self) -> bool {
        self.disabled || self.base.as_inverse().is_some()
    }

    pub fn inverse_transform(&self, batch: SampleBatch) -> std::result::Result<SampleBatch, ElementError> {
        if self.disabled {
            return Ok(batch);
        }
        self.base
            .as_inverse()
            .ok_or_else(|| ElementError::Unsupported(format!("'{}' has no inverse transform", self.name)))?
            .inverse_transform(batch)
    }

    fn transform_batched(
        &self,
        transformer: &dyn Transform,
        batch: SampleBatch,
    ) -> std::result::Result<SampleBatch, ElementError> {
        let n = batch.n_samples();
        if self.batch_size == 0 || n <= self.batch_size {
            return transformer.transform(batch);
        }
        let chunks: Vec<SampleBatch> = (0..n)
            .step_by(self.batch_size)
            .map(|start| {
                let rows: Vec<usize> = (start..(start + self.batch_size).min(n)).collect();
                batch.select_rows(&rows)
            })
            .collect();
        debug!("'{}' transforming {} rows in {} chunks", self.name, n, chunks.len());
        let outputs = self.map_chunks(transformer, chunks)?;
        SampleBatch::concat_rows(&outputs)
    }

    #[cfg(feature = "parallel")]
    fn map_chunks(
        &self,
        transformer: &dyn Transform,
        chunks: Vec<SampleBatch>,
    ) -> std::result::Result<Vec<SampleBatch>, ElementError> {
        use rayon::prelude::*;

        if self.n_workers > 1 {
            match rayon::ThreadPoolBuilder::new().num_threads(self.n_workers).build() {
                Ok(pool) => {
                    return pool.install(|| {
                        chunks
                            .into_par_iter()
                            .map(|chunk| transformer.transform(chunk))
                            .collect()
                    })
                }
                Err(e) => log::warn!(
                    "'{}' could not start {} workers ({}), transforming sequentially",
                    self.name,
                    self.n_workers,
                    e
                ),
            }
        }
        chunks.into_iter().map(|chunk| transformer.transform(chunk)).collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn map_chunks(
        &self,
        transformer: &dyn Transform,
        chunks: Vec<SampleBatch>,
    ) -> std::result::Result<Vec<SampleBatch>, ElementError> {
        chunks.into_iter().map(|chunk| transformer.transform(chunk)).collect()
    }

    fn unknown_param(&self, param: &str) -> PipelineError {
        PipelineError::config(format!(
            "'{}' ({}) has no parameter '{}'; valid parameters: {}",
            self.name,
            self.base.type_name(),
            param,
            self.base.param_names().join(", ")
        ))
    }
}
