//! L1-penalised linear regression fitted by coordinate descent.

use super::traits::{check_schema, require_rows, FittedModel, ModelFamily};
use crate::dataset::Dataset;
use crate::error::Result;
use crate::grid::{Grid, Hyperparameters, Levels, ParamSpec, Simpler};
use ndarray::{Array1, Axis};
use tracing::debug;

pub const PENALTY: ParamSpec = ParamSpec::non_negative("penalty", Simpler::Larger);

/// Columns whose standard deviation falls below this are treated as constant.
const CONSTANT_SD: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct LassoFamily {
    penalty: Levels,
    max_iter: usize,
    tol: f64,
}

impl Default for LassoFamily {
    fn default() -> Self {
        Self::new(Levels::log10(-10.0, 0.0, 50))
    }
}

impl LassoFamily {
    pub fn new(penalty: Levels) -> Self {
        Self {
            penalty,
            max_iter: 10_000,
            tol: 1e-9,
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

pub struct LassoModel {
    feature_names: Vec<String>,
    coefficients: Array1<f64>,
    intercept: f64,
}

impl LassoModel {
    /// Coefficients on the original (unstandardised) feature scale.
    pub fn coefficients(&self) -> &Array1<f64> {
        &self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

impl FittedModel for LassoModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, data: &Dataset) -> Result<Array1<f64>> {
        check_schema(&self.feature_names, data)?;
        Ok(data.features().dot(&self.coefficients) + self.intercept)
    }
}

impl ModelFamily for LassoFamily {
    fn name(&self) -> &'static str {
        "lasso"
    }

    fn hyperparameter_space(&self) -> Result<Grid> {
        Grid::regular(vec![(PENALTY, self.penalty.clone())])
    }

    fn fit(&self, train: &Dataset, params: &Hyperparameters, _seed: u64) -> Result<Box<dyn FittedModel>> {
        let penalty = params.value(&PENALTY)?;
        Ok(Box::new(self.fit_penalty(train, penalty)?))
    }
}

impl LassoFamily {
    /// Minimises `(1/2n)·||y − Xβ||² + penalty·||β||₁` on standardised
    /// predictors, then maps the coefficients back to the raw scale.
    pub fn fit_penalty(&self, train: &Dataset, penalty: f64) -> Result<LassoModel> {
        PENALTY.check(penalty)?;
        require_rows("lasso", train)?;

        let x = train.features();
        let y = train.target();
        let n = x.nrows() as f64;
        let n_features = x.ncols();

        let x_mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(n_features));
        let y_mean = y.mean().unwrap_or(0.0);
        let mut z = x - &x_mean.clone().insert_axis(Axis(0));
        let x_sd: Vec<f64> = (0..n_features)
            .map(|j| (z.column(j).mapv(|v| v * v).sum() / n).sqrt())
            .collect();
        for (j, &sd) in x_sd.iter().enumerate() {
            if sd > CONSTANT_SD {
                z.column_mut(j).mapv_inplace(|v| v / sd);
            }
        }

        let mut beta = Array1::<f64>::zeros(n_features);
        let mut residual = y.mapv(|v| v - y_mean);
        let mut iterations = 0;
        for _ in 0..self.max_iter {
            iterations += 1;
            let mut max_delta = 0.0f64;
            for j in 0..n_features {
                if x_sd[j] <= CONSTANT_SD {
                    continue;
                }
                let column = z.column(j);
                let rho = column.dot(&residual) / n + beta[j];
                let updated = soft_threshold(rho, penalty);
                let delta = updated - beta[j];
                if delta != 0.0 {
                    residual.scaled_add(-delta, &column);
                    beta[j] = updated;
                    max_delta = max_delta.max(delta.abs());
                }
            }
            if max_delta < self.tol {
                break;
            }
        }

        let coefficients: Array1<f64> = beta
            .iter()
            .zip(&x_sd)
            .map(|(&b, &sd)| if sd > CONSTANT_SD { b / sd } else { 0.0 })
            .collect();
        let intercept = y_mean - coefficients.dot(&x_mean);
        debug!(
            penalty,
            iterations,
            non_zero = coefficients.iter().filter(|c| **c != 0.0).count(),
            "Fitted lasso"
        );

        Ok(LassoModel {
            feature_names: train.feature_names().to_vec(),
            coefficients,
            intercept,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::testing;
    use crate::error::ModelSelectionError;

    #[test]
    fn test_unpenalised_fit_recovers_slope() {
        let data = testing::linear(200, 4);
        let model = LassoFamily::default().fit_penalty(&data, 0.0).unwrap();
        assert!((model.coefficients()[0] - 2.0).abs() < 0.05);
        assert!(model.intercept().abs() < 0.3);
    }

    #[test]
    fn test_large_penalty_predicts_mean() {
        let data = testing::linear(50, 2);
        let params = Hyperparameters::new().with("penalty", 1e6);
        let model = LassoFamily::default().fit(&data, &params, 0).unwrap();
        let predictions = model.predict(&data).unwrap();
        let mean = data.target().mean().unwrap();
        assert!(predictions.iter().all(|&p| (p - mean).abs() < 1e-9));
    }

    #[test]
    fn test_penalty_zeroes_noise_feature() {
        let data = testing::friedman_like(300, 6);
        let model = LassoFamily::default().fit_penalty(&data, 0.5).unwrap();
        assert_eq!(model.coefficients()[2], 0.0);
        assert!(model.coefficients()[1] > 0.0);
    }

    #[test]
    fn test_rejects_negative_penalty() {
        let data = testing::linear(20, 1);
        let params = Hyperparameters::new().with("penalty", -1.0);
        let err = LassoFamily::default().fit(&data, &params, 0).err().unwrap();
        assert!(matches!(err, ModelSelectionError::InvalidHyperparameter { .. }));
    }

    #[test]
    fn test_soft_threshold() {
        assert_eq!(soft_threshold(3.0, 1.0), 2.0);
        assert_eq!(soft_threshold(-3.0, 1.0), -2.0);
        assert_eq!(soft_threshold(0.5, 1.0), 0.0);
    }
}
