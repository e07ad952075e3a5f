use csv::ReaderBuilder;
use ndarray::{Array1, Array2};
use photonpipe_rs::{Channel, ElementError, SampleBatch, SAMPLE_IDS};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

/// Binary classification data with `n_informative` useful features out of `n_features`.
///
/// Rows carry sample ids `sample_00000`, `sample_00001`, ... so the batch can be used
/// with per-item caching.
pub fn synthetic_classification(
    n_samples: usize,
    n_features: usize,
    n_informative: usize,
    seed: u64,
) -> Result<SampleBatch, ElementError> {
    let mut rng = fastrand::Rng::with_seed(seed);
    let x = Array2::from_shape_fn((n_samples, n_features), |_| rng.f64() * 2.0 - 1.0);
    let weights: Vec<f64> = (0..n_informative.min(n_features))
        .map(|_| rng.f64() * 2.0 - 1.0)
        .collect();
    let y = Array1::from_shape_fn(n_samples, |i| {
        let score: f64 = weights.iter().enumerate().map(|(j, w)| w * x[[i, j]]).sum();
        if score > 0.0 {
            1.0
        } else {
            0.0
        }
    });
    let ids = (0..n_samples).map(|i| format!("sample_{i:05}")).collect();
    SampleBatch::from_x(x)
        .with_y(y)?
        .with_channel(SAMPLE_IDS, Channel::Labels(ids))
}

/// Load a numeric CSV file with a header row. Column `target` becomes `y`, every other
/// column a feature. Unparsable cells are read as 0.
pub fn load_csv<P: AsRef<Path>>(path: P, target: &str) -> io::Result<SampleBatch> {
    let file = File::open(path.as_ref())?;
    let mut rdr = ReaderBuilder::new().from_reader(BufReader::new(file));

    let headers = rdr.headers()?.clone();
    let target_idx = headers.iter().position(|h| h == target).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, format!("no column named '{target}'"))
    })?;
    let n_features = headers.len() - 1;

    let mut values = Vec::new();
    let mut y = Vec::new();
    for record in rdr.records() {
        let record = record?;
        for (j, cell) in record.iter().enumerate() {
            let v: f64 = cell.trim().parse().unwrap_or(0.0);
            if j == target_idx {
                y.push(v);
            } else {
                values.push(v);
            }
        }
    }

    let x = Array2::from_shape_vec((y.len(), n_features), values)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    SampleBatch::from_x(x)
        .with_y(Array1::from(y))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
