//! Descriptive statistics over delay samples.
//!
//! Thin wrappers around `statrs` that return 0.0 for empty input instead of
//! NaN. Standard deviations are population deviations (divide by n).

use serde::Serialize;
use statrs::statistics::{Data, OrderStatistics, Statistics};

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Statistics::mean(values)
}

pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Statistics::population_std_dev(values)
}

pub fn min(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Statistics::min(values)
}

pub fn max(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    Statistics::max(values)
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut data = Data::new(values.to_vec());
    data.median()
}

/// Summary of a set of delay samples (seconds).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DelayStats {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl DelayStats {
    pub fn from_samples(values: &[f64]) -> Self {
        Self {
            mean: mean(values),
            median: median(values),
            std_dev: std_dev(values),
            min: min(values),
            max: max(values),
            count: values.len(),
        }
    }

    /// Coefficient of variation (σ / μ), infinite for a zero mean.
    pub fn cv(&self) -> f64 {
        if self.mean > 0.0 {
            self.std_dev / self.mean
        } else {
            f64::INFINITY
        }
    }
}

/// Trailing-window mean and standard deviation for every position.
///
/// Position `i` covers `values[i + 1 - window ..= i]`, truncated at the
/// start. Windows holding a single sample have a deviation of 0.
pub fn rolling_mean_std(values: &[f64], window: usize) -> (Vec<f64>, Vec<f64>) {
    let window = window.max(1);
    let mut means = Vec::with_capacity(values.len());
    let mut stds = Vec::with_capacity(values.len());

    for i in 0..values.len() {
        let start = (i + 1).saturating_sub(window);
        let slice = &values[start..=i];
        means.push(mean(slice));
        stds.push(if slice.len() > 1 { std_dev(slice) } else { 0.0 });
    }

    (means, stds)
}

/// Absolute differences of consecutive values, |xᵢ − xᵢ₋₁|.
pub fn abs_diffs(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| (w[1] - w[0]).abs()).collect()
}
