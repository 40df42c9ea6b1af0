use serde::Serialize;

use crate::types::ExecResult;

/// Results of all runs of one experiment together with the timeout they ran under.
///
/// Failed and timed-out runs are censored: they count as exactly one timeout's
/// worth of time. A timeout of `0` means the runs were unbounded, in which case
/// nothing is clamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    timeout: u32,
    results: Vec<ExecResult>,
}

/// All statistics of a dataset at once, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub timeout: u32,
    pub runs: usize,
    pub successful_runs: usize,
    pub median_all: u32,
    pub mad_all: u32,
    pub median_successful: u32,
    pub mad_successful: u32,
}

impl Dataset {
    pub fn new(timeout: u32, results: Vec<ExecResult>) -> Self {
        Self { timeout, results }
    }

    pub fn timeout(&self) -> u32 {
        self.timeout
    }

    pub fn results(&self) -> &[ExecResult] {
        &self.results
    }

    /// Median runtime of all runs; unsuccessful runs count as the timeout.
    /// Zero when nothing ran.
    pub fn median_runtime_of_all_runs(&self) -> u32 {
        median(&self.runtimes_of_all_runs())
    }

    /// Median absolute deviation of all runs, censored like the median.
    pub fn mad_runtime_of_all_runs(&self) -> u32 {
        median_absolute_deviation(&self.runtimes_of_all_runs())
    }

    /// Median runtime of successful runs; zero when none succeeded.
    pub fn median_runtime_of_successful_runs(&self) -> u32 {
        median(&self.runtimes_of_successful_runs())
    }

    /// Median absolute deviation of successful runs; zero when none succeeded.
    pub fn mad_runtime_of_successful_runs(&self) -> u32 {
        median_absolute_deviation(&self.runtimes_of_successful_runs())
    }

    /// Runs that exited with 0 within the timeout.
    pub fn number_of_successful_runs(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.is_success() && self.within_timeout(r.runtime()))
            .count()
    }

    pub fn summary(&self) -> Summary {
        Summary {
            timeout: self.timeout,
            runs: self.results.len(),
            successful_runs: self.number_of_successful_runs(),
            median_all: self.median_runtime_of_all_runs(),
            mad_all: self.mad_runtime_of_all_runs(),
            median_successful: self.median_runtime_of_successful_runs(),
            mad_successful: self.mad_runtime_of_successful_runs(),
        }
    }

    fn runtimes_of_all_runs(&self) -> Vec<u32> {
        if self.results.is_empty() {
            return vec![0];
        }

        self.results
            .iter()
            .map(|r| {
                if self.timeout == 0 || (r.is_success() && r.runtime() < self.timeout) {
                    r.runtime()
                } else {
                    self.timeout
                }
            })
            .collect()
    }

    fn runtimes_of_successful_runs(&self) -> Vec<u32> {
        let runtimes: Vec<u32> = self
            .results
            .iter()
            .filter(|r| r.is_success())
            .map(|r| self.clamp(r.runtime()))
            .collect();

        if runtimes.is_empty() {
            vec![0]
        } else {
            runtimes
        }
    }

    fn within_timeout(&self, runtime: u32) -> bool {
        self.timeout == 0 || runtime <= self.timeout
    }

    fn clamp(&self, runtime: u32) -> u32 {
        if self.within_timeout(runtime) {
            runtime
        } else {
            self.timeout
        }
    }
}

/// Median of `values`; an even count takes the rounded-up mean of the middle
/// pair. Zero for an empty slice.
pub fn median(values: &[u32]) -> u32 {
    if values.is_empty() {
        return 0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let n = sorted.len();
    if n % 2 == 1 {
        return sorted[n / 2];
    }

    let sum = u64::from(sorted[n / 2 - 1]) + u64::from(sorted[n / 2]);
    sum.div_ceil(2) as u32
}

/// Median of the absolute differences from the median.
pub fn median_absolute_deviation(values: &[u32]) -> u32 {
    let med = median(values);
    let deviations: Vec<u32> = values.iter().map(|v| v.abs_diff(med)).collect();
    median(&deviations)
}
