use std::time::{Duration, Instant};

/// Accumulating stopwatch.
#[derive(Debug, Default)]
pub struct Timer {
    start: Option<Instant>,
    laps: Vec<Duration>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.start = Some(Instant::now());
    }

    /// Stop the running lap and record it. Returns zero if the timer was not running.
    pub fn stop(&mut self) -> Duration {
        match self.start.take() {
            Some(start) => {
                let lap = start.elapsed();
                self.laps.push(lap);
                lap
            }
            None => Duration::ZERO,
        }
    }

    pub fn total(&self) -> Duration {
        self.laps.iter().sum()
    }

    pub fn total_ms(&self) -> f64 {
        self.total().as_secs_f64() * 1000.0
    }

    pub fn laps_ms(&self) -> Vec<f64> {
        self.laps.iter().map(|d| d.as_secs_f64() * 1000.0).collect()
    }

    /// Statistics over the recorded laps.
    pub fn stats(&self) -> BenchmarkStats {
        BenchmarkStats::from_times(self.laps_ms())
    }
}

/// Run `f` once and measure it.
pub fn time_fn<F, R>(f: F) -> (R, Duration)
where
    F: FnOnce() -> R,
{
    let start = Instant::now();
    let result = f();
    (result, start.elapsed())
}

/// Summary of a set of timings in milliseconds.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkStats {
    pub count: usize,
    pub mean_ms: f64,
    pub std_dev_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub median_ms: f64,
}

impl BenchmarkStats {
    pub fn from_times(mut times: Vec<f64>) -> Self {
        if times.is_empty() {
            return Self::default();
        }
        times.sort_by(f64::total_cmp);

        let n = times.len();
        let mean = times.iter().sum::<f64>() / n as f64;
        let variance = times.iter().map(|&t| (t - mean).powi(2)).sum::<f64>() / n as f64;
        let median = if n % 2 == 0 {
            (times[n / 2 - 1] + times[n / 2]) / 2.0
        } else {
            times[n / 2]
        };

        Self {
            count: n,
            mean_ms: mean,
            std_dev_ms: variance.sqrt(),
            min_ms: times[0],
            max_ms: times[n - 1],
            median_ms: median,
        }
    }
}

impl std::fmt::Display for BenchmarkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} runs, mean {:.2} ms (sd {:.2}), median {:.2} ms, range {:.2}..{:.2} ms",
            self.count, self.mean_ms, self.std_dev_ms, self.median_ms, self.min_ms, self.max_ms
        )
    }
}
