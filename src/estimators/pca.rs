//! Principal component analysis by power iteration with deflation.
//!
//! Components are the leading eigenvectors of the sample covariance matrix. Each one is
//! found by power iteration started from a seeded random vector, kept orthogonal to the
//! previously found components; its eigenvalue is then removed from the covariance.

use super::check_features;
use crate::data::SampleBatch;
use crate::element::{BaseEstimator, InverseTransform, Transform};
use crate::error::ElementError;
use crate::params::{ParamValue, Params};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

const MAX_ITER: usize = 1000;
const TOLERANCE: f64 = 1e-12;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PcaConfig {
    /// Number of components to keep; 0 keeps all of them.
    pub n_components: usize,
    /// Seed of the power-iteration start vectors.
    pub random_state: u64,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            n_components: 0,
            random_state: 0,
        }
    }
}

/// Parameters learned by PCA.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PcaParams {
    pub mean: Array1<f64>,
    /// One component per row, `(n_components, n_features)`.
    pub components: Array2<f64>,
    pub explained_variance: Array1<f64>,
    pub n_features: usize,
}

#[derive(Clone, Debug, Default)]
pub struct Pca {
    config: PcaConfig,
    fitted: Option<PcaParams>,
}

impl Pca {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_n_components(mut self, n_components: usize) -> Self {
        self.config.n_components = n_components;
        self
    }

    pub fn params(&self) -> Option<&PcaParams> {
        self.fitted.as_ref()
    }

    fn fitted(&self) -> Result<&PcaParams, ElementError> {
        self.fitted
            .as_ref()
            .ok_or_else(|| ElementError::NotFitted("PCA".to_string()))
    }
}

impl BaseEstimator for Pca {
    fn type_name(&self) -> &'static str {
        "PCA"
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["n_components", "random_state"]
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<(), ElementError> {
        match name {
            "n_components" => self.config.n_components = value.expect_usize(name)?,
            "random_state" => self.config.random_state = value.expect_usize(name)? as u64,
            _ => return Err(ElementError::InvalidParameter(format!("unknown parameter {name}"))),
        }
        Ok(())
    }

    fn get_params(&self) -> Params {
        Params::from([
            ("n_components".to_string(), ParamValue::from(self.config.n_components)),
            (
                "random_state".to_string(),
                ParamValue::Int(self.config.random_state as i64),
            ),
        ])
    }

    fn fit(&mut self, batch: &SampleBatch) -> Result<(), ElementError> {
        let x = &batch.x;
        let (rows, cols) = x.dim();
        if rows < 2 {
            return Err(ElementError::EmptyData(
                "PCA needs at least two samples".to_string(),
            ));
        }
        let k = match self.config.n_components {
            0 => cols,
            k if k > cols => {
                return Err(ElementError::InvalidParameter(format!(
                    "n_components={k} exceeds the {cols} available features"
                )))
            }
            k => k,
        };

        let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(cols));
        let centered = x - &mean;
        let mut cov = centered.t().dot(&centered) / (rows as f64 - 1.0);

        let mut rng = fastrand::Rng::with_seed(self.config.random_state);
        let mut components = Array2::<f64>::zeros((k, cols));
        let mut explained_variance = Array1::<f64>::zeros(k);

        for c in 0..k {
            let mut v: Array1<f64> = (0..cols).map(|_| rng.f64() - 0.5).collect();
            orthogonalize(&mut v, &components, c);
            normalize(&mut v)?;

            for _ in 0..MAX_ITER {
                let mut next = cov.dot(&v);
                orthogonalize(&mut next, &components, c);
                if next.dot(&next).sqrt() < TOLERANCE {
                    // remaining variance is zero; any orthogonal direction will do
                    break;
                }
                normalize(&mut next)?;
                let delta = (&next - &v).mapv(f64::abs).sum();
                v = next;
                if delta < TOLERANCE {
                    break;
                }
            }

            // deterministic sign: largest entry positive
            let pivot = v
                .iter()
                .copied()
                .fold(0.0_f64, |best, e| if e.abs() > best.abs() { e } else { best });
            if pivot < 0.0 {
                v.mapv_inplace(|e| -e);
            }

            let lambda = v.dot(&cov.dot(&v));
            explained_variance[c] = lambda.max(0.0);
            let outer = v
                .view()
                .insert_axis(Axis(1))
                .dot(&v.view().insert_axis(Axis(0)));
            cov = cov - outer * lambda;
            components.row_mut(c).assign(&v);
        }

        self.fitted = Some(PcaParams {
            mean,
            components,
            explained_variance,
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

fn orthogonalize(v: &mut Array1<f64>, components: &Array2<f64>, found: usize) {
    for row in components.outer_iter().take(found) {
        let proj = row.dot(&*v);
        v.scaled_add(-proj, &row);
    }
}

fn normalize(v: &mut Array1<f64>) -> Result<(), ElementError> {
    let norm = v.iter().map(|e| e * e).sum::<f64>().sqrt();
    if !norm.is_finite() || norm == 0.0 {
        return Err(ElementError::NumericalError(
            "degenerate power-iteration vector".to_string(),
        ));
    }
    v.mapv_inplace(|e| e / norm);
    Ok(())
}

impl Transform for Pca {
    fn transform(&self, mut batch: SampleBatch) -> Result<SampleBatch, ElementError> {
        let params = self.fitted()?;
        check_features(params.n_features, batch.n_features())?;
        batch.x = (&batch.x - &params.mean).dot(&params.components.t());
        Ok(batch)
    }
}

impl InverseTransform for Pca {
    fn inverse_transform(&self, mut batch: SampleBatch) -> Result<SampleBatch, ElementError> {
        let params = self.fitted()?;
        check_features(params.components.nrows(), batch.n_features())?;
        batch.x = batch.x.dot(&params.components) + &params.mean;
        Ok(batch)
    }
}
