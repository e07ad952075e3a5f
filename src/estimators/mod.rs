//! Built-in elements.
//!
//! | Element | Capabilities |
//! |---------|--------------|
//! | [`StandardScaler`] | transform, inverse |
//! | [`MinMaxScaler`] | transform, inverse |
//! | [`Pca`] | transform, inverse |
//! | [`RowPooling`] | transform (row-wise, safe for per-item caching) |
//! | [`LinearRegression`] | predict |
//! | [`LogisticRegression`] | predict, predict_proba |

pub mod linear;
pub mod pca;
pub mod pooling;
pub mod scaling;

pub use linear::{GradientConfig, LinearRegression, LogisticRegression};
pub use pca::Pca;
pub use pooling::RowPooling;
pub use scaling::{MinMaxScaler, StandardScaler};

use crate::error::ElementError;

pub(crate) fn check_features(expected: usize, got: usize) -> Result<(), ElementError> {
    if expected != got {
        return Err(ElementError::FeatureMismatch {
            expected_features: expected,
            got_features: got,
        });
    }
    Ok(())
}
