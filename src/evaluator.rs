//! Final refit, holdout scoring and cross-family promotion.

use crate::dataset::Dataset;
use crate::error::{ModelSelectionError, Result};
use crate::grid::Hyperparameters;
use crate::metrics::{Metric, ModelMetrics};
use crate::models::{FittedModel, ModelFamily, NullFamily};
use crate::tuner::{GridPointSummary, TuningResult};
use ndarray::Array1;
use tracing::{info, instrument};

/// Predicted against actual values for one set of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Predictions {
    pub actual: Array1<f64>,
    pub predicted: Array1<f64>,
    /// `actual - predicted`, row by row.
    pub residuals: Array1<f64>,
}

impl Predictions {
    pub fn new(actual: Array1<f64>, predicted: Array1<f64>) -> Self {
        let residuals = &actual - &predicted;
        Self {
            actual,
            predicted,
            residuals,
        }
    }

    pub fn len(&self) -> usize {
        self.actual.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actual.is_empty()
    }

    pub fn metrics(&self) -> ModelMetrics {
        ModelMetrics::compute(self.actual.view(), self.predicted.view())
    }
}

pub struct Evaluation {
    pub family: String,
    pub params: Hyperparameters,
    pub model: Box<dyn FittedModel>,
    pub metric: Metric,
    /// `metric` on the holdout rows.
    pub metric_value: f64,
    pub holdout: ModelMetrics,
    pub train: Predictions,
    pub test: Predictions,
}

/// Refits `family` once on all of `train` and scores it on `test`. This is
/// the only step of a run that reads the holdout rows.
#[instrument(skip_all, fields(family = family.name(), params = %params))]
pub fn evaluate(
    family: &dyn ModelFamily,
    params: &Hyperparameters,
    train: &Dataset,
    test: &Dataset,
    metric: Metric,
    seed: u64,
) -> Result<Evaluation> {
    if !train.same_schema(test) {
        return Err(ModelSelectionError::SchemaMismatch {
            expected: train.feature_names().to_vec(),
            found: test.feature_names().to_vec(),
        });
    }

    let model = family.fit(train, params, seed)?;
    let train_predictions = Predictions::new(train.target().clone(), model.predict(train)?);
    let test_predictions = Predictions::new(test.target().clone(), model.predict(test)?);
    let metric_value = metric.compute(test_predictions.actual.view(), test_predictions.predicted.view());
    let holdout = test_predictions.metrics();

    info!(
        %metric,
        value = metric_value,
        rmse = holdout.rmse,
        rsq = holdout.r_squared,
        n_test = test.n_rows(),
        "Holdout evaluation"
    );

    Ok(Evaluation {
        family: family.name().to_string(),
        params: params.clone(),
        model,
        metric,
        metric_value,
        holdout,
        train: train_predictions,
        test: test_predictions,
    })
}

/// Outcome of comparing the tuned families against each other.
#[derive(Debug, Clone, PartialEq)]
pub struct Promotion {
    pub family: String,
    pub best: GridPointSummary,
    pub metric: Metric,
    /// Best cross-validated score of the intercept-only family, when tuned.
    pub baseline: Option<f64>,
    /// Whether the promoted family strictly beats the baseline. False when
    /// the baseline itself is promoted or was not tuned.
    pub beats_baseline: bool,
}

/// Promotes the family with the best tuning-phase mean. Between families with
/// identical means the earlier one in `results` wins.
pub fn compare_families(results: &[TuningResult]) -> Result<Promotion> {
    let first = results.first().ok_or_else(|| {
        ModelSelectionError::InvalidInput("no tuning results to compare".to_string())
    })?;
    let metric = first.metric();
    if let Some(other) = results.iter().find(|result| result.metric() != metric) {
        return Err(ModelSelectionError::InvalidInput(format!(
            "cannot compare {} scored by {} with {} scored by {}",
            first.family(),
            metric,
            other.family(),
            other.metric()
        )));
    }

    let mut winner = first;
    for result in &results[1..] {
        let candidate = result.select_best().mean;
        let current = winner.select_best().mean;
        if current.is_nan() && !candidate.is_nan() || metric.is_better(candidate, current) {
            winner = result;
        }
    }

    let null_name = NullFamily.name();
    let baseline = results
        .iter()
        .find(|result| result.family() == null_name)
        .map(|result| result.select_best().mean);
    let best = winner.select_best().clone();
    let beats_baseline = match baseline {
        Some(_) if winner.family() == null_name => false,
        Some(baseline) if baseline.is_nan() => !best.mean.is_nan(),
        Some(baseline) => metric.is_better(best.mean, baseline),
        None => false,
    };

    info!(
        family = winner.family(),
        mean = best.mean,
        ?baseline,
        beats_baseline,
        "Promoted family"
    );

    Ok(Promotion {
        family: winner.family().to_string(),
        best,
        metric,
        baseline,
        beats_baseline,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::testing;
    use crate::grid::{Grid, Levels};
    use crate::models::{LassoFamily, TreeFamily};
    use crate::split::{make_folds, split};
    use crate::tuner::{tune, TuneOptions};
    use ndarray::Array2;

    #[test]
    fn test_residuals_are_actual_minus_predicted() {
        let data = testing::linear(80, 2);
        let parts = split(&data, 0.7, "y", 4, 2).unwrap();
        let train = data.subset(&parts.train);
        let test = data.subset(&parts.test);
        let params = Hyperparameters::new().with("cost_complexity", 0.01).with("tree_depth", 3.0);

        let evaluation = evaluate(&TreeFamily::default(), &params, &train, &test, Metric::Rmse, 0).unwrap();
        for predictions in [&evaluation.train, &evaluation.test] {
            for i in 0..predictions.len() {
                let expected = predictions.actual[i] - predictions.predicted[i];
                assert!((predictions.residuals[i] - expected).abs() < 1e-12);
            }
        }
        assert_eq!(evaluation.test.len(), test.n_rows());
        assert_eq!(evaluation.train.len(), train.n_rows());
        assert!((evaluation.metric_value - evaluation.holdout.rmse).abs() < 1e-12);
    }

    #[test]
    fn test_null_has_zero_rmse_on_constant_target() {
        let features = Array2::from_shape_fn((10, 1), |(i, _)| i as f64);
        let constant = Dataset::new(vec!["x".to_string()], features, "y", Array1::from_elem(10, 4.0)).unwrap();
        let train = constant.subset(&[0, 1, 2, 3, 4, 5, 6]);
        let test = constant.subset(&[7, 8, 9]);

        let evaluation = evaluate(&NullFamily, &Hyperparameters::new(), &train, &test, Metric::Rmse, 0).unwrap();
        assert_eq!(evaluation.metric_value, 0.0);
        assert!(evaluation.test.predicted.iter().all(|&p| p == 4.0));
    }

    #[test]
    fn test_holdout_rows_never_influence_selection() {
        let data = testing::linear(100, 8);
        let parts = split(&data, 0.7, "y", 4, 8).unwrap();

        let mut features = data.features().clone();
        let mut target = data.target().clone();
        for &row in &parts.test {
            features[[row, 0]] = -features[[row, 0]] * 50.0;
            target[row] = 1e6;
        }
        let altered = Dataset::new(data.feature_names().to_vec(), features, "y", target).unwrap();

        let lasso = LassoFamily::new(Levels::log10(-3.0, 1.0, 9));
        let grid = lasso.hyperparameter_space().unwrap();
        let selections: Vec<Hyperparameters> = [&data, &altered]
            .iter()
            .map(|dataset| {
                let train = dataset.subset(&parts.train);
                let folds = make_folds(&train, 5, 2, "y", 4, 8).unwrap();
                let result = tune(&lasso, &train, &folds, &grid, Metric::Rmse, &TuneOptions::default()).unwrap();
                result.select_best().params.clone()
            })
            .collect();
        assert_eq!(selections[0], selections[1]);

        let original = evaluate(&lasso, &selections[0], &data.subset(&parts.train), &data.subset(&parts.test), Metric::Rmse, 0).unwrap();
        let shifted = evaluate(&lasso, &selections[1], &altered.subset(&parts.train), &altered.subset(&parts.test), Metric::Rmse, 0).unwrap();
        assert_eq!(original.train, shifted.train);
        assert_ne!(original.metric_value, shifted.metric_value);
    }

    #[test]
    fn test_compare_families_promotes_and_flags() {
        let data = testing::linear(100, 3);
        let parts = split(&data, 0.7, "y", 4, 3).unwrap();
        let train = data.subset(&parts.train);
        let folds = make_folds(&train, 5, 1, "y", 4, 3).unwrap();
        let options = TuneOptions::default();

        let null = tune(&NullFamily, &train, &folds, &Grid::empty(), Metric::Rmse, &options).unwrap();
        let lasso = LassoFamily::new(Levels::Values(vec![0.001, 0.01]));
        let good = tune(&lasso, &train, &folds, &lasso.hyperparameter_space().unwrap(), Metric::Rmse, &options).unwrap();
        let useless = LassoFamily::new(Levels::Values(vec![1e4]));
        let bad = tune(&useless, &train, &folds, &useless.hyperparameter_space().unwrap(), Metric::Rmse, &options).unwrap();

        let promotion = compare_families(&[null.clone(), good.clone()]).unwrap();
        assert_eq!(promotion.family, "lasso");
        assert!(promotion.beats_baseline);
        assert_eq!(promotion.baseline, Some(null.select_best().mean));

        // an all-zero lasso ties the baseline exactly; the earlier entry wins and is flagged
        let promotion = compare_families(&[null.clone(), bad.clone()]).unwrap();
        assert_eq!(promotion.family, "null");
        assert!(!promotion.beats_baseline);

        let promotion = compare_families(&[bad, null]).unwrap();
        assert_eq!(promotion.family, "lasso");
        assert!(!promotion.beats_baseline);
    }

    #[test]
    fn test_missing_baseline_is_never_beaten() {
        let data = testing::linear(100, 3);
        let parts = split(&data, 0.7, "y", 4, 3).unwrap();
        let train = data.subset(&parts.train);
        let folds = make_folds(&train, 5, 1, "y", 4, 3).unwrap();
        let useless = LassoFamily::new(Levels::Values(vec![1e4]));
        let grid = useless.hyperparameter_space().unwrap();
        let bad = tune(&useless, &train, &folds, &grid, Metric::Rmse, &TuneOptions::default()).unwrap();

        let promotion = compare_families(&[bad]).unwrap();
        assert_eq!(promotion.family, "lasso");
        assert_eq!(promotion.baseline, None);
        assert!(!promotion.beats_baseline);
    }

    #[test]
    fn test_r_squared_baseline_is_comparable() {
        let data = testing::linear(100, 4);
        let parts = split(&data, 0.7, "y", 4, 4).unwrap();
        let train = data.subset(&parts.train);
        let folds = make_folds(&train, 5, 1, "y", 4, 4).unwrap();
        let options = TuneOptions::default();

        let null = tune(&NullFamily, &train, &folds, &Grid::empty(), Metric::RSquared, &options).unwrap();
        let lasso = LassoFamily::new(Levels::Values(vec![0.001, 0.01]));
        let grid = lasso.hyperparameter_space().unwrap();
        let good = tune(&lasso, &train, &folds, &grid, Metric::RSquared, &options).unwrap();

        let promotion = compare_families(&[null, good]).unwrap();
        assert_eq!(promotion.baseline, Some(0.0));
        assert_eq!(promotion.family, "lasso");
        assert!(promotion.best.mean > 0.9);
        assert!(promotion.beats_baseline);
    }

    #[test]
    fn test_compare_families_requires_results() {
        assert!(matches!(compare_families(&[]), Err(ModelSelectionError::InvalidInput(_))));
    }

    #[test]
    fn test_evaluate_rejects_schema_mismatch() {
        let train = testing::linear(20, 1);
        let test = testing::friedman_like(10, 1);
        let result = evaluate(&NullFamily, &Hyperparameters::new(), &train, &test, Metric::Rmse, 0);
        assert!(matches!(result, Err(ModelSelectionError::SchemaMismatch { .. })));
    }
}
