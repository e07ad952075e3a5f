//! Linear models trained by full-batch gradient descent with optional L2 penalty.
//!
//! - [`LinearRegression`]: mean squared error, `y = w^T x + b`.
//! - [`LogisticRegression`]: binary log loss, `p = sigmoid(w^T x + b)`.
//!
//! Both expect roughly standardized features; a diverging fit is reported as a numerical
//! error instead of producing non-finite weights.

use super::check_features;
use crate::data::{Kwargs, SampleBatch};
use crate::element::{BaseEstimator, Predict, PredictProba};
use crate::error::ElementError;
use crate::params::{ParamValue, Params};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Training hyperparameters shared by the linear models.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GradientConfig {
    pub learning_rate: f64,
    pub max_epochs: usize,
    /// L2 penalty strength.
    pub alpha: f64,
    /// Stop once the largest weight update falls below this.
    pub tol: f64,
}

impl Default for GradientConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            max_epochs: 1000,
            alpha: 0.0,
            tol: 1e-9,
        }
    }
}

const PARAM_NAMES: &[&str] = &["learning_rate", "max_epochs", "alpha", "tol"];

impl GradientConfig {
    fn set(&mut self, name: &str, value: &ParamValue) -> Result<(), ElementError> {
        match name {
            "learning_rate" => self.learning_rate = positive(name, value.expect_f64(name)?)?,
            "max_epochs" => self.max_epochs = value.expect_usize(name)?,
            "alpha" => self.alpha = value.expect_f64(name)?.max(0.0),
            "tol" => self.tol = value.expect_f64(name)?,
            _ => return Err(ElementError::InvalidParameter(format!("unknown parameter {name}"))),
        }
        Ok(())
    }

    fn params(&self) -> Params {
        Params::from([
            ("learning_rate".to_string(), ParamValue::Float(self.learning_rate)),
            ("max_epochs".to_string(), ParamValue::from(self.max_epochs)),
            ("alpha".to_string(), ParamValue::Float(self.alpha)),
            ("tol".to_string(), ParamValue::Float(self.tol)),
        ])
    }

    /// Minimise `loss(w, b)` given a function returning the per-sample residual
    /// `d loss / d z` for the linear scores `z`.
    fn descend<F>(&self, x: &Array2<f64>, residual: F) -> Result<LinearParams, ElementError>
    where
        F: Fn(&Array1<f64>) -> Array1<f64>,
    {
        let (n, d) = x.dim();
        let mut weights = Array1::<f64>::zeros(d);
        let mut bias = 0.0;
        for _ in 0..self.max_epochs {
            let scores = x.dot(&weights) + bias;
            let r = residual(&scores);
            let grad_w = x.t().dot(&r) / n as f64 + &weights * self.alpha;
            let grad_b = r.sum() / n as f64;

            weights.scaled_add(-self.learning_rate, &grad_w);
            bias -= self.learning_rate * grad_b;

            if !bias.is_finite() || weights.iter().any(|w| !w.is_finite()) {
                return Err(ElementError::NumericalError(format!(
                    "gradient descent diverged with learning_rate={}",
                    self.learning_rate
                )));
            }
            let step = grad_w.iter().fold(grad_b.abs(), |m, g| m.max(g.abs())) * self.learning_rate;
            if step < self.tol {
                break;
            }
        }
        Ok(LinearParams {
            weights,
            bias,
            n_features: d,
        })
    }
}

fn positive(name: &str, v: f64) -> Result<f64, ElementError> {
    if v > 0.0 {
        Ok(v)
    } else {
        Err(ElementError::InvalidParameter(format!("{name} must be positive, got {v}")))
    }
}

/// Learned weights and bias.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinearParams {
    pub weights: Array1<f64>,
    pub bias: f64,
    pub n_features: usize,
}

impl LinearParams {
    fn scores(&self, x: &Array2<f64>) -> Result<Array1<f64>, ElementError> {
        check_features(self.n_features, x.ncols())?;
        Ok(x.dot(&self.weights) + self.bias)
    }
}

fn require_y(batch: &SampleBatch, model: &str) -> Result<Array1<f64>, ElementError> {
    if batch.n_samples() == 0 {
        return Err(ElementError::EmptyData(format!("Cannot fit {model} on empty data")));
    }
    batch
        .y
        .clone()
        .ok_or_else(|| ElementError::InvalidParameter(format!("{model} requires targets")))
}

#[derive(Clone, Debug, Default)]
pub struct LinearRegression {
    config: GradientConfig,
    fitted: Option<LinearParams>,
}

impl LinearRegression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.config.learning_rate = lr;
        self
    }

    pub fn params(&self) -> Option<&LinearParams> {
        self.fitted.as_ref()
    }
}

impl BaseEstimator for LinearRegression {
    fn type_name(&self) -> &'static str {
        "LinearRegression"
    }

    fn param_names(&self) -> &'static [&'static str] {
        PARAM_NAMES
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<(), ElementError> {
        self.config.set(name, value)
    }

    fn get_params(&self) -> Params {
        self.config.params()
    }

    fn fit(&mut self, batch: &SampleBatch) -> Result<(), ElementError> {
        let y = require_y(batch, "LinearRegression")?;
        // d/dz of 0.5 * (z - y)^2
        self.fitted = Some(self.config.descend(&batch.x, |z| z - &y)?);
        Ok(())
    }

    fn as_predictor(&self) -> Option<&dyn Predict> {
        Some(self)
    }

    fn clone_box(&self) -> Box<dyn BaseEstimator> {
        Box::new(self.clone())
    }
}

impl Predict for LinearRegression {
    fn predict(&self, x: &Array2<f64>, _kwargs: &Kwargs) -> Result<Array1<f64>, ElementError> {
        self.fitted
            .as_ref()
            .ok_or_else(|| ElementError::NotFitted("LinearRegression".to_string()))?
            .scores(x)
    }
}

/// Fitted binary classifier: weights plus the two class labels.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogisticParams {
    pub linear: LinearParams,
    /// `[negative, positive]` labels as seen in `y`.
    pub classes: [f64; 2],
}

#[derive(Clone, Debug, Default)]
pub struct LogisticRegression {
    config: GradientConfig,
    fitted: Option<LogisticParams>,
}

impl LogisticRegression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params(&self) -> Option<&LogisticParams> {
        self.fitted.as_ref()
    }

    fn fitted(&self) -> Result<&LogisticParams, ElementError> {
        self.fitted
            .as_ref()
            .ok_or_else(|| ElementError::NotFitted("LogisticRegression".to_string()))
    }

    fn positive_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>, ElementError> {
        Ok(self.fitted()?.linear.scores(x)?.mapv(sigmoid))
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl BaseEstimator for LogisticRegression {
    fn type_name(&self) -> &'static str {
        "LogisticRegression"
    }

    fn param_names(&self) -> &'static [&'static str] {
        PARAM_NAMES
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<(), ElementError> {
        self.config.set(name, value)
    }

    fn get_params(&self) -> Params {
        self.config.params()
    }

    fn fit(&mut self, batch: &SampleBatch) -> Result<(), ElementError> {
        let y = require_y(batch, "LogisticRegression")?;
        let mut classes: Vec<f64> = Vec::new();
        for &label in &y {
            if !classes.contains(&label) {
                classes.push(label);
            }
        }
        classes.sort_by(f64::total_cmp);
        let classes: [f64; 2] = classes.try_into().map_err(|found: Vec<f64>| {
            ElementError::InvalidParameter(format!(
                "LogisticRegression needs exactly two classes, got {}",
                found.len()
            ))
        })?;

        let targets = y.mapv(|label| if label == classes[1] { 1.0 } else { 0.0 });
        // d/dz of the log loss
        let linear = self.config.descend(&batch.x, |z| z.mapv(sigmoid) - &targets)?;
        self.fitted = Some(LogisticParams { linear, classes });
        Ok(())
    }

    fn as_predictor(&self) -> Option<&dyn Predict> {
        Some(self)
    }

    fn as_proba_predictor(&self) -> Option<&dyn PredictProba> {
        Some(self)
    }

    fn clone_box(&self) -> Box<dyn BaseEstimator> {
        Box::new(self.clone())
    }
}

impl Predict for LogisticRegression {
    fn predict(&self, x: &Array2<f64>, _kwargs: &Kwargs) -> Result<Array1<f64>, ElementError> {
        let classes = self.fitted()?.classes;
        Ok(self
            .positive_proba(x)?
            .mapv(|p| if p >= 0.5 { classes[1] } else { classes[0] }))
    }
}

impl PredictProba for LogisticRegression {
    fn predict_proba(&self, x: &Array2<f64>, _kwargs: &Kwargs) -> Result<Array2<f64>, ElementError> {
        let p = self.positive_proba(x)?;
        let mut proba = Array2::<f64>::zeros((p.len(), 2));
        proba.index_axis_mut(Axis(1), 0).assign(&p.mapv(|v| 1.0 - v));
        proba.index_axis_mut(Axis(1), 1).assign(&p);
        Ok(proba)
    }
}
