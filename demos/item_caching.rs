//! Per-Item Caching Example
//!
//! Caches a row-wise feature extraction branch per subject. Evaluating a new subset of
//! subjects only computes the subjects that were never seen before.
//!
//! Run with: RUST_LOG=debug cargo run --example item_caching

use ndarray::{Array1, Array2};
use photonpipe_rs::prelude::*;
use std::error::Error;

const N_SUBJECTS: usize = 50;
const N_VOXELS: usize = 256;

fn subjects() -> Result<SampleBatch, ElementError> {
    let mut rng = fastrand::Rng::with_seed(3);
    let x = Array2::from_shape_fn((N_SUBJECTS, N_VOXELS), |_| rng.f64());
    let y = Array1::from_shape_fn(N_SUBJECTS, |i| x.row(i).sum() / N_VOXELS as f64);
    let ids = (0..N_SUBJECTS).map(|i| format!("subject_{i:03}")).collect();
    SampleBatch::from_x(x)
        .with_y(y)?
        .with_channel(SAMPLE_IDS, Channel::Labels(ids))
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    println!("=== Per-Item Caching ===\n");

    let cache_dir = tempfile::tempdir()?;
    let extraction = Branch::new("neuro")
        .with(
            PipelineElement::new("pool", RowPooling::new())
                .with_hyperparameters([("pool_size", vec![4.into(), 8.into()])])?
                .with_batch_size(10)
                .with_workers(4),
        )?
        .with_cache_settings(
            CacheSettings::new()
                .with_caching(true)
                .with_cache_folder(cache_dir.path())
                .with_single_item_caching(true),
        );

    let mut pipe = PhotonPipeline::new(vec![
        Node::from(extraction),
        PipelineElement::new("StandardScaler", StandardScaler::new()).into(),
        PipelineElement::new("LinReg", LinearRegression::new()).into(),
    ])?;
    pipe.set_params(&Configuration::new().with("neuro__pool__pool_size", 8))?;

    let data = subjects()?;
    let first: Vec<usize> = (0..30).collect();
    let second: Vec<usize> = (20..50).collect();

    pipe.fit(&data.select_rows(&first))?;
    println!(
        "after subjects 0-29:  {} cached items",
        CacheManager::count_entries(cache_dir.path())?
    );

    pipe.fit(&data.select_rows(&second))?;
    println!(
        "after subjects 20-49: {} cached items",
        CacheManager::count_entries(cache_dir.path())?
    );

    let predictions = pipe.predict(data.clone())?;
    let y = data.y.as_ref().ok_or("subjects have no targets")?;
    let mse = (&predictions - y).mapv(|d| d * d).mean().unwrap_or(f64::NAN);
    println!("mse on all subjects: {mse:.6}");
    println!(
        "after predicting all: {} cached items",
        CacheManager::count_entries(cache_dir.path())?
    );
    Ok(())
}
