//! The sample batch that flows through a pipeline: features, optional targets and
//! side-channel arrays aligned with the samples.

use crate::error::ElementError;
use ndarray::{concatenate, Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Name of the label channel holding per-sample identifiers.
pub const SAMPLE_IDS: &str = "sample_ids";

/// A side-channel array aligned 1:1 with the samples of a batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Channel {
    /// One row per sample.
    Matrix(Array2<f64>),
    /// One value per sample.
    Vector(Array1<f64>),
    /// One string per sample (identifiers, file names, group labels).
    Labels(Vec<String>),
}

impl Channel {
    /// Number of samples covered by this channel.
    pub fn len(&self) -> usize {
        match self {
            Channel::Matrix(m) => m.nrows(),
            Channel::Vector(v) => v.len(),
            Channel::Labels(l) => l.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep only the samples at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Channel {
        match self {
            Channel::Matrix(m) => Channel::Matrix(m.select(Axis(0), indices)),
            Channel::Vector(v) => Channel::Vector(v.select(Axis(0), indices)),
            Channel::Labels(l) => Channel::Labels(indices.iter().map(|&i| l[i].clone()).collect()),
        }
    }

    fn concat(parts: &[&Channel]) -> Result<Channel, ElementError> {
        let first = parts
            .first()
            .ok_or_else(|| ElementError::EmptyData("no channel parts to concatenate".into()))?;
        match first {
            Channel::Matrix(_) => {
                let views = parts
                    .iter()
                    .map(|c| match c {
                        Channel::Matrix(m) => Ok(m.view()),
                        _ => Err(mixed_channel_kinds()),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                concatenate(Axis(0), &views)
                    .map(Channel::Matrix)
                    .map_err(|e| shape_error("matrix channel", e))
            }
            Channel::Vector(_) => {
                let views = parts
                    .iter()
                    .map(|c| match c {
                        Channel::Vector(v) => Ok(v.view()),
                        _ => Err(mixed_channel_kinds()),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                concatenate(Axis(0), &views)
                    .map(Channel::Vector)
                    .map_err(|e| shape_error("vector channel", e))
            }
            Channel::Labels(_) => {
                let mut out = Vec::new();
                for c in parts {
                    match c {
                        Channel::Labels(l) => out.extend(l.iter().cloned()),
                        _ => return Err(mixed_channel_kinds()),
                    }
                }
                Ok(Channel::Labels(out))
            }
        }
    }

    fn feed(&self, hasher: &mut Sha256) {
        match self {
            Channel::Matrix(m) => {
                hasher.update(b"M");
                feed_matrix(hasher, m.view());
            }
            Channel::Vector(v) => {
                hasher.update(b"V");
                hasher.update((v.len() as u64).to_le_bytes());
                v.iter().for_each(|x| hasher.update(x.to_bits().to_le_bytes()));
            }
            Channel::Labels(l) => {
                hasher.update(b"L");
                hasher.update((l.len() as u64).to_le_bytes());
                for s in l {
                    hasher.update((s.len() as u64).to_le_bytes());
                    hasher.update(s.as_bytes());
                }
            }
        }
    }
}

/// Ordered mapping from channel name to side-channel array.
pub type Kwargs = BTreeMap<String, Channel>;

/// Features `x`, optional targets `y` and side channels `kwargs`.
///
/// Invariant: `y` (if present) and every kwargs channel have exactly `x.nrows()` entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleBatch {
    pub x: Array2<f64>,
    pub y: Option<Array1<f64>>,
    pub kwargs: Kwargs,
}

impl SampleBatch {
    /// Build a batch, checking that targets and channels are aligned with `x`.
    pub fn new(x: Array2<f64>, y: Option<Array1<f64>>, kwargs: Kwargs) -> Result<Self, ElementError> {
        let batch = Self { x, y, kwargs };
        batch.validate()?;
        Ok(batch)
    }

    /// A batch with features only.
    pub fn from_x(x: Array2<f64>) -> Self {
        Self {
            x,
            y: None,
            kwargs: Kwargs::new(),
        }
    }

    /// Attach targets.
    pub fn with_y(mut self, y: Array1<f64>) -> Result<Self, ElementError> {
        self.y = Some(y);
        self.validate()?;
        Ok(self)
    }

    /// Attach a side channel.
    pub fn with_channel(mut self, name: impl Into<String>, channel: Channel) -> Result<Self, ElementError> {
        self.kwargs.insert(name.into(), channel);
        self.validate()?;
        Ok(self)
    }

    /// Check the alignment invariant.
    pub fn validate(&self) -> Result<(), ElementError> {
        let n = self.x.nrows();
        if let Some(y) = &self.y {
            if y.len() != n {
                return Err(ElementError::InvalidShape {
                    expected: format!("y of length {n}"),
                    got: format!("y of length {}", y.len()),
                });
            }
        }
        for (name, channel) in &self.kwargs {
            if channel.len() != n {
                return Err(ElementError::InvalidShape {
                    expected: format!("channel '{name}' of length {n}"),
                    got: format!("length {}", channel.len()),
                });
            }
        }
        Ok(())
    }

    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    /// Identifiers from the [`SAMPLE_IDS`] label channel, if present.
    pub fn sample_ids(&self) -> Option<&[String]> {
        match self.kwargs.get(SAMPLE_IDS) {
            Some(Channel::Labels(ids)) => Some(ids),
            _ => None,
        }
    }

    /// Keep only the samples at `indices`, in that order, across x, y and all channels.
    pub fn select_rows(&self, indices: &[usize]) -> SampleBatch {
        SampleBatch {
            x: self.x.select(Axis(0), indices),
            y: self.y.as_ref().map(|y| y.select(Axis(0), indices)),
            kwargs: self
                .kwargs
                .iter()
                .map(|(k, c)| (k.clone(), c.select(indices)))
                .collect(),
        }
    }

    /// Stack batches vertically. All parts must agree on feature width, presence of `y`
    /// and channel names.
    pub fn concat_rows(parts: &[SampleBatch]) -> Result<SampleBatch, ElementError> {
        let first = parts
            .first()
            .ok_or_else(|| ElementError::EmptyData("no batches to concatenate".into()))?;
        if parts.len() == 1 {
            return Ok(first.clone());
        }

        for (pos, part) in parts.iter().enumerate().skip(1) {
            if part.y.is_some() != first.y.is_some() || !part.kwargs.keys().eq(first.kwargs.keys()) {
                return Err(ElementError::InvalidShape {
                    expected: format!("every batch laid out like the first ({})", describe_layout(first)),
                    got: format!("batch {pos} with {}", describe_layout(part)),
                });
            }
        }

        let xs: Vec<ArrayView2<f64>> = parts.iter().map(|p| p.x.view()).collect();
        let x = concatenate(Axis(0), &xs).map_err(|e| shape_error("x", e))?;

        let y = if first.y.is_some() {
            let ys: Vec<_> = parts.iter().filter_map(|p| p.y.as_ref().map(|y| y.view())).collect();
            Some(concatenate(Axis(0), &ys).map_err(|e| shape_error("y", e))?)
        } else {
            None
        };

        let mut kwargs = Kwargs::new();
        for name in first.kwargs.keys() {
            let channels: Vec<&Channel> = parts.iter().filter_map(|p| p.kwargs.get(name)).collect();
            kwargs.insert(name.clone(), Channel::concat(&channels)?);
        }

        SampleBatch::new(x, y, kwargs)
    }

    /// Concatenate feature matrices column-wise, left to right.
    pub fn hstack(xs: &[Array2<f64>]) -> Result<Array2<f64>, ElementError> {
        if xs.is_empty() {
            return Err(ElementError::EmptyData("nothing to stack".into()));
        }
        let views: Vec<ArrayView2<f64>> = xs.iter().map(|x| x.view()).collect();
        concatenate(Axis(1), &views).map_err(|e| shape_error("stacked x", e))
    }

    /// Stable content digest (hex SHA-256) of the whole batch.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        feed_matrix(&mut hasher, self.x.view());
        match &self.y {
            Some(y) => Channel::Vector(y.clone()).feed(&mut hasher),
            None => hasher.update(b"no-y"),
        }
        for (name, channel) in &self.kwargs {
            hasher.update(name.as_bytes());
            channel.feed(&mut hasher);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Digest of the batch layout: feature width, presence of `y` and channel names.
    pub fn layout_signature(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.n_features() as u64).to_le_bytes());
        hasher.update([self.y.is_some() as u8]);
        for name in self.kwargs.keys() {
            hasher.update((name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Stable content digest of a single sample's feature row.
    pub fn row_digest(&self, row: usize) -> String {
        let mut hasher = Sha256::new();
        let r = self.x.row(row);
        hasher.update((r.len() as u64).to_le_bytes());
        r.iter().for_each(|v| hasher.update(v.to_bits().to_le_bytes()));
        format!("{:x}", hasher.finalize())
    }
}

fn feed_matrix(hasher: &mut Sha256, m: ArrayView2<f64>) {
    hasher.update((m.nrows() as u64).to_le_bytes());
    hasher.update((m.ncols() as u64).to_le_bytes());
    m.iter().for_each(|v| hasher.update(v.to_bits().to_le_bytes()));
}

fn shape_error(what: &str, err: ndarray::ShapeError) -> ElementError {
    ElementError::InvalidShape {
        expected: format!("compatible {what} shapes"),
        got: err.to_string(),
    }
}

fn describe_layout(batch: &SampleBatch) -> String {
    let channels: Vec<&str> = batch.kwargs.keys().map(String::as_str).collect();
    format!(
        "{} y, channels [{}]",
        if batch.y.is_some() { "with" } else { "without" },
        channels.join(", ")
    )
}

fn mixed_channel_kinds() -> ElementError {
    ElementError::InvalidShape {
        expected: "channels of the same kind".into(),
        got: "mixed channel kinds".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn create_test_batch() -> SampleBatch {
        SampleBatch::new(
            array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]],
            Some(array![0.0, 1.0, 0.0]),
            Kwargs::from([
                ("covariates".to_string(), Channel::Vector(array![9.0, 8.0, 7.0])),
                (
                    SAMPLE_IDS.to_string(),
                    Channel::Labels(vec!["a".into(), "b".into(), "c".into()]),
                ),
            ]),
        )
        .unwrap()
    }

    #[test]
    fn test_misaligned_y_is_rejected() {
        let result = SampleBatch::new(array![[1.0], [2.0]], Some(array![1.0]), Kwargs::new());
        assert!(matches!(result, Err(ElementError::InvalidShape { .. })));
    }

    #[test]
    fn test_misaligned_channel_is_rejected() {
        let result = SampleBatch::from_x(array![[1.0], [2.0]])
            .with_channel("covariates", Channel::Vector(array![1.0, 2.0, 3.0]));
        assert!(result.is_err());
    }

    #[test]
    fn test_select_rows_keeps_alignment() {
        let batch = create_test_batch();
        let picked = batch.select_rows(&[2, 0]);
        assert_eq!(picked.x, array![[5.0, 6.0], [1.0, 2.0]]);
        assert_eq!(picked.y, Some(array![0.0, 0.0]));
        assert_eq!(picked.sample_ids().unwrap(), &["c".to_string(), "a".to_string()]);
        assert!(picked.validate().is_ok());
    }

    #[test]
    fn test_concat_rows_restores_split() {
        let batch = create_test_batch();
        let parts = vec![batch.select_rows(&[0]), batch.select_rows(&[1, 2])];
        let joined = SampleBatch::concat_rows(&parts).unwrap();
        assert_eq!(joined, batch);
    }

    #[test]
    fn test_concat_rows_rejects_layout_mismatch() {
        let batch = create_test_batch();
        let without_y = SampleBatch::from_x(batch.x.clone());
        for parts in [
            vec![without_y.select_rows(&[0]), batch.select_rows(&[1])],
            vec![batch.select_rows(&[0]), without_y.select_rows(&[1])],
        ] {
            assert!(matches!(
                SampleBatch::concat_rows(&parts),
                Err(ElementError::InvalidShape { .. })
            ));
        }

        let extra = batch
            .select_rows(&[1])
            .with_channel("site", Channel::Vector(array![3.0]))
            .unwrap();
        let result = SampleBatch::concat_rows(&[batch.select_rows(&[0]), extra]);
        assert!(matches!(result, Err(ElementError::InvalidShape { .. })));
    }

    #[test]
    fn test_hstack_left_to_right() {
        let a = array![[1.0], [2.0]];
        let b = array![[3.0, 4.0], [5.0, 6.0]];
        let stacked = SampleBatch::hstack(&[a, b]).unwrap();
        assert_eq!(stacked, array![[1.0, 3.0, 4.0], [2.0, 5.0, 6.0]]);
    }

    #[test]
    fn test_fingerprint_is_content_based() {
        let a = create_test_batch();
        let b = create_test_batch();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = create_test_batch();
        c.x[[0, 0]] = 42.0;
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.row_digest(1), c.row_digest(1));
        assert_ne!(a.row_digest(0), c.row_digest(0));
    }

    #[test]
    fn test_layout_signature_ignores_values() {
        let a = create_test_batch();
        let mut b = create_test_batch();
        b.x[[1, 1]] = -3.0;
        assert_eq!(a.layout_signature(), b.layout_signature());

        b.y = None;
        assert_ne!(a.layout_signature(), b.layout_signature());
    }
}
