use ndarray::ArrayView1;
use serde::Deserialize;
use std::fmt;

/// Scoring function used to rank configurations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Rmse,
    Mae,
    RSquared,
}

impl Metric {
    pub fn compute(&self, actual: ArrayView1<'_, f64>, predicted: ArrayView1<'_, f64>) -> f64 {
        match self {
            Metric::Rmse => rmse(actual, predicted),
            Metric::Mae => mae(actual, predicted),
            Metric::RSquared => r_squared(actual, predicted),
        }
    }

    /// Whether lower values are better.
    pub fn minimize(&self) -> bool {
        !matches!(self, Metric::RSquared)
    }

    /// `true` when `a` is a strictly better score than `b`.
    pub fn is_better(&self, a: f64, b: f64) -> bool {
        if self.minimize() {
            a < b
        } else {
            a > b
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Rmse => "rmse",
            Metric::Mae => "mae",
            Metric::RSquared => "rsq",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub r_squared: f64,
    pub n: usize,
}

impl ModelMetrics {
    pub fn compute(actual: ArrayView1<'_, f64>, predicted: ArrayView1<'_, f64>) -> Self {
        Self {
            rmse: rmse(actual, predicted),
            mae: mae(actual, predicted),
            r_squared: r_squared(actual, predicted),
            n: actual.len(),
        }
    }
}

fn mean_of(values: impl Iterator<Item = f64>, n: usize) -> f64 {
    if n == 0 {
        return f64::NAN;
    }
    values.sum::<f64>() / n as f64
}

pub fn rmse(actual: ArrayView1<'_, f64>, predicted: ArrayView1<'_, f64>) -> f64 {
    let squared = actual.iter().zip(predicted.iter()).map(|(a, p)| (a - p).powi(2));
    mean_of(squared, actual.len()).sqrt()
}

pub fn mae(actual: ArrayView1<'_, f64>, predicted: ArrayView1<'_, f64>) -> f64 {
    let absolute = actual.iter().zip(predicted.iter()).map(|(a, p)| (a - p).abs());
    mean_of(absolute, actual.len())
}

/// Squared correlation between actual and predicted values. Constant
/// predictions explain none of the variance and score 0; `NaN` when the
/// actual values are constant.
pub fn r_squared(actual: ArrayView1<'_, f64>, predicted: ArrayView1<'_, f64>) -> f64 {
    let n = actual.len();
    let mean_a = mean_of(actual.iter().copied(), n);
    let mean_p = mean_of(predicted.iter().copied(), n);
    let (mut cov, mut var_a, mut var_p) = (0.0, 0.0, 0.0);
    for (a, p) in actual.iter().zip(predicted.iter()) {
        cov += (a - mean_a) * (p - mean_p);
        var_a += (a - mean_a).powi(2);
        var_p += (p - mean_p).powi(2);
    }
    if var_a == 0.0 {
        return f64::NAN;
    }
    if var_p == 0.0 {
        return 0.0;
    }
    cov * cov / (var_a * var_p)
}
