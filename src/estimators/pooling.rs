//! Per-sample average pooling over adjacent features.
//!
//! Each sample is downsampled on its own, so the transform can run on any subset of rows
//! (chunks, single items) and give the same per-row result.

use crate::data::SampleBatch;
use crate::element::{BaseEstimator, Transform};
use crate::error::ElementError;
use crate::params::{ParamValue, Params};
use ndarray::{s, Array2};

/// Replaces every window of `pool_size` adjacent features by its mean. A trailing partial
/// window is averaged over the features it has.
#[derive(Clone, Debug)]
pub struct RowPooling {
    pool_size: usize,
}

impl Default for RowPooling {
    fn default() -> Self {
        Self { pool_size: 2 }
    }
}

impl RowPooling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }
}

impl BaseEstimator for RowPooling {
    fn type_name(&self) -> &'static str {
        "RowPooling"
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["pool_size"]
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<(), ElementError> {
        match name {
            "pool_size" => {
                let size = value.expect_usize(name)?;
                if size == 0 {
                    return Err(ElementError::InvalidParameter("pool_size must be at least 1".into()));
                }
                self.pool_size = size;
            }
            _ => return Err(ElementError::InvalidParameter(format!("unknown parameter {name}"))),
        }
        Ok(())
    }

    fn get_params(&self) -> Params {
        Params::from([("pool_size".to_string(), ParamValue::from(self.pool_size))])
    }

    /// Stateless.
    fn fit(&mut self, _batch: &SampleBatch) -> Result<(), ElementError> {
        Ok(())
    }

    fn as_transformer(&self) -> Option<&dyn Transform> {
        Some(self)
    }

    fn clone_box(&self) -> Box<dyn BaseEstimator> {
        Box::new(self.clone())
    }
}

impl Transform for RowPooling {
    fn transform(&self, mut batch: SampleBatch) -> Result<SampleBatch, ElementError> {
        let (rows, cols) = batch.x.dim();
        let out_cols = cols.div_ceil(self.pool_size);
        let mut pooled = Array2::<f64>::zeros((rows, out_cols));
        for j in 0..out_cols {
            let start = j * self.pool_size;
            let end = (start + self.pool_size).min(cols);
            let window = batch.x.slice(s![.., start..end]);
            pooled.column_mut(j).assign(&window.sum_axis(ndarray::Axis(1)));
            pooled.column_mut(j).mapv_inplace(|v| v / (end - start) as f64);
        }
        batch.x = pooled;
        Ok(batch)
    }
}
