//! # photonpipe-rs
//!
//! A pipeline executor for hyperparameter search over machine learning pipelines, with
//! on-disk memoization of intermediate step outputs.
//!
//! ## Core Design Principles
//!
//! - **Configuration determines state**: every trial starts from construction-time
//!   parameters, so a fitted pipeline depends only on its configuration and its data.
//! - **Upstream reuse**: a step's cache key covers only the parameters of that step and
//!   the steps before it, so trials that differ downstream share upstream work.
//! - **Transparent caching**: loading a cached output never changes results.
//! - **Capabilities as traits**: elements opt into `transform`, `predict`,
//!   `predict_proba` and `inverse_transform` through separate traits.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use photonpipe_rs::prelude::*;
//!
//! # fn main() -> photonpipe_rs::Result<()> {
//! # let train = SampleBatch::from_x(ndarray::Array2::zeros((4, 2)));
//! let mut pipe = PhotonPipeline::new(vec![
//!     Node::from(PipelineElement::new("StandardScaler", StandardScaler::new())),
//!     PipelineElement::new("PCA", Pca::new())
//!         .with_hyperparameters([("n_components", vec![1.into(), 2.into()])])?
//!         .into(),
//! ])?
//! .with_cache_settings(
//!     CacheSettings::new()
//!         .with_caching(true)
//!         .with_cache_folder("/tmp/photon_cache")
//!         .with_fold_id("fold_0"),
//! );
//!
//! pipe.set_params(&Configuration::new().with("PCA__n_components", 1))?;
//! pipe.fit(&train)?;
//! let reduced = pipe.transform(train.clone())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Structure
//!
//! - `data`: `SampleBatch` with features, optional targets and named side channels
//! - `params`: parameter values, configurations and search spaces
//! - `element`: the capability traits, leaf elements and composites (branch, stack, switch)
//! - `estimators`: built-in transformers and estimators
//! - `cache`: cache keys and the on-disk cache manager
//! - `pipeline`: the executor itself
//! - `config`: cache settings

/// Error types for elements, the cache and pipelines.
pub mod error;

/// Sample data passed between steps.
pub mod data;

/// Parameter values, configurations and hyperparameter grids.
pub mod params;

/// Cache settings.
pub mod config;

/// Cache keys and the on-disk cache manager.
pub mod cache;

/// Pipeline elements and composites.
pub mod element;

/// Built-in transformers and estimators.
pub mod estimators;

/// The caching pipeline executor.
pub mod pipeline;

pub use cache::{CacheKey, CacheManager, CacheStats};
pub use config::{CacheSettings, ItemKeying};
pub use data::{Channel, SampleBatch, SAMPLE_IDS};
pub use element::{
    BaseEstimator, Branch, CallbackElement, ElementKind, ElementRegistry, Node, PipelineElement,
    Preprocessing, Stack, Switch,
};
pub use error::{CacheError, ElementError, PipelineError, Result};
pub use params::{Configuration, Hyperparameters, ParamValue, Params};
pub use pipeline::PhotonPipeline;

/// Everything needed to build and run a pipeline.
pub mod prelude {
    pub use crate::cache::{CacheManager, CacheStats};
    pub use crate::config::{CacheSettings, ItemKeying};
    pub use crate::data::{Channel, SampleBatch, SAMPLE_IDS};
    pub use crate::element::{
        BaseEstimator, Branch, CallbackElement, ElementKind, ElementRegistry, InverseTransform,
        Node, PipelineElement, Predict, PredictProba, Preprocessing, Stack, Switch, Transform,
    };
    pub use crate::error::{ElementError, PipelineError};
    pub use crate::estimators::{
        LinearRegression, LogisticRegression, MinMaxScaler, Pca, RowPooling, StandardScaler,
    };
    pub use crate::params::{Configuration, Hyperparameters, ParamValue, Params};
    pub use crate::pipeline::PhotonPipeline;
}
