//! Error types for pipeline execution, caching and wrapped elements.
//!
//! Three layers:
//! - [`ElementError`]: raised by a wrapped transformer/estimator. The pipeline never
//!   recovers from these; they reach the caller unchanged.
//! - [`CacheError`]: disk I/O or encoding failure while writing (or reading) a cache entry.
//!   A cache *miss* is not an error and is expressed as `Ok(None)`.
//! - [`PipelineError`]: what every public pipeline operation returns.

use std::path::PathBuf;
use thiserror::Error;

/// Error raised by a wrapped algorithm during fit/transform/predict.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ElementError {
    /// Shape mismatch between expected and actual array dimensions.
    #[error("Invalid shape: expected {expected}, got {got}")]
    InvalidShape { expected: String, got: String },

    /// Feature dimension mismatch.
    #[error("Feature mismatch: expected {expected_features} features, got {got_features}")]
    FeatureMismatch {
        expected_features: usize,
        got_features: usize,
    },

    /// Empty data provided where non-empty was required.
    #[error("Empty data: {0}")]
    EmptyData(String),

    /// Transform or predict called before fit.
    #[error("Not fitted: {0}")]
    NotFitted(String),

    /// Invalid hyperparameter value.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Numerical computation error (overflow, singular matrix, ...).
    #[error("Numerical error: {0}")]
    NumericalError(String),

    /// The element does not offer the requested capability.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Failure while persisting or reading a cache entry.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache serialization error at {path}: {message}")]
    Serialization { path: PathBuf, message: String },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Error type returned by pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Unknown parameter key, absent step, missing item identifiers, predict without
    /// estimator, ...
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Element(#[from] ElementError),
}

impl PipelineError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        PipelineError::Configuration(msg.into())
    }

    /// Whether this error came from the cache layer rather than from the computation.
    pub fn is_cache_error(&self) -> bool {
        matches!(self, PipelineError::Cache(_))
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_shape() {
        let err = ElementError::InvalidShape {
            expected: "(2, 3)".to_string(),
            got: "(3, 2)".to_string(),
        };
        assert!(err.to_string().contains("Invalid shape"));
    }

    #[test]
    fn test_error_display_feature_mismatch() {
        let err = ElementError::FeatureMismatch {
            expected_features: 5,
            got_features: 3,
        };
        assert!(err.to_string().contains("expected 5 features, got 3"));
    }

    #[test]
    fn test_element_error_passes_through_unchanged() {
        let inner = ElementError::NotFitted("PCA".to_string());
        let err: PipelineError = inner.clone().into();
        match err {
            PipelineError::Element(e) => assert_eq!(e, inner),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_cache_error_is_distinguishable() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: PipelineError = CacheError::io("/tmp/x.p", io).into();
        assert!(err.is_cache_error());
        assert!(err.to_string().contains("/tmp/x.p"));

        let cfg = PipelineError::config("unknown step 'foo'");
        assert!(!cfg.is_cache_error());
        assert!(cfg.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_is_std_error() {
        let err = PipelineError::config("test");
        let _: &dyn std::error::Error = &err;
    }
}
