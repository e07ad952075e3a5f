//! Feature scalers.
//!
//! - [`StandardScaler`]: `z = (x - u) / s` with `u` the column mean and `s` the population
//!   standard deviation of the training samples.
//! - [`MinMaxScaler`]: maps every column linearly onto `[feature_min, feature_max]`.
//!
//! Constant columns get a unit scale instead of a division by zero.

use super::check_features;
use crate::data::SampleBatch;
use crate::element::{BaseEstimator, InverseTransform, Transform};
use crate::error::ElementError;
use crate::params::{ParamValue, Params};
use ndarray::{Array1, Axis};
use serde::{Deserialize, Serialize};

/// Configuration for StandardScaler.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StandardScalerConfig {
    /// Center the data before scaling.
    pub with_mean: bool,
    /// Scale the data to unit variance.
    pub with_std: bool,
}

impl Default for StandardScalerConfig {
    fn default() -> Self {
        Self {
            with_mean: true,
            with_std: true,
        }
    }
}

/// Parameters learned by StandardScaler.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StandardScalerParams {
    /// Mean of each feature (zeros if `with_mean` is off).
    pub mean: Array1<f64>,
    /// Standard deviation of each feature (ones if `with_std` is off).
    pub std: Array1<f64>,
    /// Number of features seen during fit.
    pub n_features: usize,
}

/// Removes the mean and scales to unit variance.
#[derive(Clone, Debug, Default)]
pub struct StandardScaler {
    config: StandardScalerConfig,
    fitted: Option<StandardScalerParams>,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to center data by mean.
    pub fn with_mean(mut self, with_mean: bool) -> Self {
        self.config.with_mean = with_mean;
        self
    }

    /// Set whether to scale data to unit variance.
    pub fn with_std(mut self, with_std: bool) -> Self {
        self.config.with_std = with_std;
        self
    }

    pub fn params(&self) -> Option<&StandardScalerParams> {
        self.fitted.as_ref()
    }

    fn fitted(&self) -> Result<&StandardScalerParams, ElementError> {
        self.fitted
            .as_ref()
            .ok_or_else(|| ElementError::NotFitted("StandardScaler".to_string()))
    }
}

impl BaseEstimator for StandardScaler {
    fn type_name(&self) -> &'static str {
        "StandardScaler"
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["with_mean", "with_std"]
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<(), ElementError> {
        match name {
            "with_mean" => self.config.with_mean = value.expect_bool(name)?,
            "with_std" => self.config.with_std = value.expect_bool(name)?,
            _ => return Err(ElementError::InvalidParameter(format!("unknown parameter {name}"))),
        }
        Ok(())
    }

    fn get_params(&self) -> Params {
        Params::from([
            ("with_mean".to_string(), ParamValue::Bool(self.config.with_mean)),
            ("with_std".to_string(), ParamValue::Bool(self.config.with_std)),
        ])
    }

    fn fit(&mut self, batch: &SampleBatch) -> Result<(), ElementError> {
        let x = &batch.x;
        let (rows, cols) = x.dim();
        if rows == 0 {
            return Err(ElementError::EmptyData(
                "Cannot fit StandardScaler on empty data".to_string(),
            ));
        }

        let mean = if self.config.with_mean {
            x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(cols))
        } else {
            Array1::zeros(cols)
        };
        let std = if self.config.with_std {
            // population std (ddof=0); constant features keep their scale
            x.std_axis(Axis(0), 0.0).mapv(|s| if s == 0.0 { 1.0 } else { s })
        } else {
            Array1::ones(cols)
        };

        self.fitted = Some(StandardScalerParams {
            mean,
            std,
            n_features: cols,
        });
        Ok(())
    }

    fn as_transformer(&self) -> Option<&dyn Transform> {
        Some(self)
    }

    fn as_inverse(&self) -> Option<&dyn InverseTransform> {
        Some(self)
    }

    fn clone_box(&self) -> Box<dyn BaseEstimator> {
        Box::new(self.clone())
    }
}

impl Transform for StandardScaler {
    fn transform(&self, mut batch: SampleBatch) -> Result<SampleBatch, ElementError> {
        let params = self.fitted()?;
        check_features(params.n_features, batch.n_features())?;
        batch.x = (&batch.x - &params.mean) / &params.std;
        Ok(batch)
    }
}

impl InverseTransform for StandardScaler {
    fn inverse_transform(&self, mut batch: SampleBatch) -> Result<SampleBatch, ElementError> {
        let params = self.fitted()?;
        check_features(params.n_features, batch.n_features())?;
        batch.x = &batch.x * &params.std + &params.mean;
        Ok(batch)
    }
}

/// Configuration for MinMaxScaler.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MinMaxScalerConfig {
    pub feature_min: f64,
    pub feature_max: f64,
}

impl Default for MinMaxScalerConfig {
    fn default() -> Self {
        Self {
            feature_min: 0.0,
            feature_max: 1.0,
        }
    }
}

/// Parameters learned by MinMaxScaler.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MinMaxScalerParams {
    pub data_min: Array1<f64>,
    /// `max - min` per feature, 1 for constant features.
    pub data_range: Array1<f64>,
    pub n_features: usize,
}

/// Scales each feature to a given range.
#[derive(Clone, Debug, Default)]
pub struct MinMaxScaler {
    config: MinMaxScalerConfig,
    fitted: Option<MinMaxScalerParams>,
}

impl MinMaxScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.config.feature_min = min;
        self.config.feature_max = max;
        self
    }

    fn fitted(&self) -> Result<&MinMaxScalerParams, ElementError> {
        self.fitted
            .as_ref()
            .ok_or_else(|| ElementError::NotFitted("MinMaxScaler".to_string()))
    }

    fn span(&self) -> f64 {
        self.config.feature_max - self.config.feature_min
    }
}

impl BaseEstimator for MinMaxScaler {
    fn type_name(&self) -> &'static str {
        "MinMaxScaler"
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["feature_min", "feature_max"]
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<(), ElementError> {
        match name {
            "feature_min" => self.config.feature_min = value.expect_f64(name)?,
            "feature_max" => self.config.feature_max = value.expect_f64(name)?,
            _ => return Err(ElementError::InvalidParameter(format!("unknown parameter {name}"))),
        }
        Ok(())
    }

    fn get_params(&self) -> Params {
        Params::from([
            ("feature_min".to_string(), ParamValue::Float(self.config.feature_min)),
            ("feature_max".to_string(), ParamValue::Float(self.config.feature_max)),
        ])
    }

    fn fit(&mut self, batch: &SampleBatch) -> Result<(), ElementError> {
        if self.config.feature_min >= self.config.feature_max {
            return Err(ElementError::InvalidParameter(format!(
                "feature range [{}, {}] is empty",
                self.config.feature_min, self.config.feature_max
            )));
        }
        let x = &batch.x;
        if x.nrows() == 0 {
            return Err(ElementError::EmptyData(
                "Cannot fit MinMaxScaler on empty data".to_string(),
            ));
        }
        let data_min = x.fold_axis(Axis(0), f64::INFINITY, |&acc, &v| acc.min(v));
        let data_max = x.fold_axis(Axis(0), f64::NEG_INFINITY, |&acc, &v| acc.max(v));
        let data_range = (&data_max - &data_min).mapv(|r| if r == 0.0 { 1.0 } else { r });

        self.fitted = Some(MinMaxScalerParams {
            data_min,
            data_range,
            n_features: x.ncols(),
        });
        Ok(())
    }

    fn as_transformer(&self) -> Option<&dyn Transform> {
        Some(self)
    }

    fn as_inverse(&self) -> Option<&dyn InverseTransform> {
        Some(self)
    }

    fn clone_box(&self) -> Box<dyn BaseEstimator> {
        Box::new(self.clone())
    }
}

impl Transform for MinMaxScaler {
    fn transform(&self, mut batch: SampleBatch) -> Result<SampleBatch, ElementError> {
        let params = self.fitted()?;
        check_features(params.n_features, batch.n_features())?;
        let unit = (&batch.x - &params.data_min) / &params.data_range;
        batch.x = unit * self.span() + self.config.feature_min;
        Ok(batch)
    }
}

impl InverseTransform for MinMaxScaler {
    fn inverse_transform(&self, mut batch: SampleBatch) -> Result<SampleBatch, ElementError> {
        let params = self.fitted()?;
        check_features(params.n_features, batch.n_features())?;
        let unit = (&batch.x - self.config.feature_min) / self.span();
        batch.x = unit * &params.data_range + &params.data_min;
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn create_test_data() -> SampleBatch {
        SampleBatch::from_x(array![[1.0, 2.0, 5.0], [3.0, 4.0, 5.0], [5.0, 6.0, 5.0]])
    }

    #[test]
    fn test_standard_scaler_basic() {
        let data = create_test_data();
        let mut scaler = StandardScaler::new();
        scaler.fit(&data).unwrap();

        let params = scaler.params().unwrap();
        assert_eq!(params.mean, array![3.0, 4.0, 5.0]);
        // constant column keeps unit scale
        assert_eq!(params.std[2], 1.0);

        let out = scaler.transform(data).unwrap();
        let col0_mean = out.x.column(0).sum() / 3.0;
        assert!(col0_mean.abs() < 1e-12);
        assert!((out.x[[2, 0]] - 1.224744871391589).abs() < 1e-9);
        assert_eq!(out.x.column(2), array![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_standard_scaler_inverse() {
        let data = create_test_data();
        let mut scaler = StandardScaler::new();
        scaler.fit(&data).unwrap();
        let restored = scaler
            .inverse_transform(scaler.transform(data.clone()).unwrap())
            .unwrap();
        for (a, b) in restored.x.iter().zip(data.x.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_standard_scaler_without_mean() {
        let data = create_test_data();
        let mut scaler = StandardScaler::new();
        scaler.set_param("with_mean", &ParamValue::Bool(false)).unwrap();
        scaler.fit(&data).unwrap();
        assert_eq!(scaler.params().unwrap().mean, array![0.0, 0.0, 0.0]);
        assert!(scaler.set_param("with_mean", &ParamValue::Int(1)).is_err());
    }

    #[test]
    fn test_standard_scaler_empty_and_unfitted() {
        let mut scaler = StandardScaler::new();
        assert!(scaler.transform(create_test_data()).is_err());
        let empty = SampleBatch::from_x(ndarray::Array2::zeros((0, 2)));
        assert!(matches!(scaler.fit(&empty), Err(ElementError::EmptyData(_))));
    }

    #[test]
    fn test_feature_mismatch() {
        let mut scaler = StandardScaler::new();
        scaler.fit(&create_test_data()).unwrap();
        let narrow = SampleBatch::from_x(array![[1.0, 2.0]]);
        assert!(matches!(
            scaler.transform(narrow),
            Err(ElementError::FeatureMismatch { .. })
        ));
    }

    #[test]
    fn test_minmax_scaler_range() {
        let data = create_test_data();
        let mut scaler = MinMaxScaler::new().with_range(-1.0, 1.0);
        scaler.fit(&data).unwrap();
        let out = scaler.transform(data.clone()).unwrap();
        assert_eq!(out.x.column(0), array![-1.0, 0.0, 1.0]);
        assert_eq!(out.x.column(2), array![-1.0, -1.0, -1.0]);

        let restored = scaler.inverse_transform(out).unwrap();
        assert_eq!(restored.x, data.x);
    }

    #[test]
    fn test_minmax_rejects_empty_range() {
        let mut scaler = MinMaxScaler::new().with_range(1.0, 1.0);
        assert!(matches!(
            scaler.fit(&create_test_data()),
            Err(ElementError::InvalidParameter(_))
        ));
    }
}
