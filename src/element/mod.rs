//! Pipeline elements: the capability interface every wrapped algorithm implements, the
//! leaf wrapper [`PipelineElement`], and the composite nodes built from them.
//!
//! # Capabilities
//!
//! A wrapped object implements [`BaseEstimator`] (fit + parameters) and declares which of
//! the optional capabilities it offers by returning `Some` from the matching accessor:
//!
//! | Capability | Accessor |
//! |---|---|
//! | [`Transform`] | [`BaseEstimator::as_transformer`] |
//! | [`Predict`] | [`BaseEstimator::as_predictor`] |
//! | [`PredictProba`] | [`BaseEstimator::as_proba_predictor`] |
//! | [`InverseTransform`] | [`BaseEstimator::as_inverse`] |
//!
//! The pipeline dispatches on these accessors only; it never inspects concrete types.

pub mod branch;
pub mod callback;
pub mod leaf;
pub mod node;
pub mod preprocessing;
pub mod registry;
pub mod stack;
pub mod switch;

pub use branch::Branch;
pub use callback::CallbackElement;
pub use leaf::PipelineElement;
pub use node::Node;
pub use preprocessing::Preprocessing;
pub use registry::{ElementRegistry, RegistryEntry};
pub use stack::Stack;
pub use switch::Switch;

use crate::data::{Kwargs, SampleBatch};
use crate::error::ElementError;
use crate::params::{ParamValue, Params};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Role of an element when it is the last step of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    /// Maps data to data; every step of a pipeline without estimator transforms.
    Transformer,
    /// Offers predictions; only fitted (never transformed) as terminal step.
    Estimator,
}

/// Maps a batch to a new batch.
pub trait Transform: Send + Sync {
    fn transform(&self, batch: SampleBatch) -> Result<SampleBatch, ElementError>;

    /// Whether this transformer rewrites targets or side channels and therefore needs `y`.
    /// Such transformers are skipped (pass-through) when the batch carries no targets.
    fn needs_y(&self) -> bool {
        false
    }
}

/// Produces one prediction per sample.
pub trait Predict: Send + Sync {
    fn predict(&self, x: &Array2<f64>, kwargs: &Kwargs) -> Result<Array1<f64>, ElementError>;
}

/// Produces class membership probabilities, one row per sample.
pub trait PredictProba: Send + Sync {
    fn predict_proba(&self, x: &Array2<f64>, kwargs: &Kwargs) -> Result<Array2<f64>, ElementError>;
}

/// Maps transformed data back into the input space.
pub trait InverseTransform: Send + Sync {
    fn inverse_transform(&self, batch: SampleBatch) -> Result<SampleBatch, ElementError>;
}

/// Uniform interface over any wrapped transformer or estimator.
pub trait BaseEstimator: Send + Sync {
    /// Short type name, e.g. `"PCA"`.
    fn type_name(&self) -> &'static str;

    /// Names of the parameters accepted by [`set_param`](Self::set_param).
    fn param_names(&self) -> &'static [&'static str];

    /// Set one parameter. Only called with names from [`param_names`](Self::param_names).
    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<(), ElementError>;

    /// Current parameter values.
    fn get_params(&self) -> Params;

    /// Learn from a batch.
    fn fit(&mut self, batch: &SampleBatch) -> Result<(), ElementError>;

    fn as_transformer(&self) -> Option<&dyn Transform> {
        None
    }

    fn as_predictor(&self) -> Option<&dyn Predict> {
        None
    }

    fn as_proba_predictor(&self) -> Option<&dyn PredictProba> {
        None
    }

    fn as_inverse(&self) -> Option<&dyn InverseTransform> {
        None
    }

    /// Role implied by the declared capabilities.
    fn kind(&self) -> ElementKind {
        if self.as_predictor().is_some() {
            ElementKind::Estimator
        } else {
            ElementKind::Transformer
        }
    }

    /// Deep copy behind a fresh box.
    fn clone_box(&self) -> Box<dyn BaseEstimator>;
}

impl Clone for Box<dyn BaseEstimator> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl std::fmt::Debug for dyn BaseEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.type_name())
            .field("params", &self.get_params())
            .finish()
    }
}
