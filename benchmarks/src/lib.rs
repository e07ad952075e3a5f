//! Benchmark utilities for photonpipe-rs.
//!
//! - Data generation and CSV loading into [`SampleBatch`](photonpipe_rs::SampleBatch)
//! - Grid enumeration and a cross-validated search driver
//! - Timing helpers

pub mod data;
pub mod search;
pub mod utils;

pub use data::{load_csv, synthetic_classification};
pub use search::{grid, run_search, SearchReport};
pub use utils::{time_fn, BenchmarkStats, Timer};
