//! Cross-validated grid search over one model family.

use crate::dataset::Dataset;
use crate::error::{ModelSelectionError, Result};
use crate::grid::{Grid, Hyperparameters};
use crate::metrics::Metric;
use crate::models::ModelFamily;
use crate::split::FoldAssignment;
use rayon::prelude::*;
use std::cmp::Ordering;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy)]
pub struct TuneOptions {
    /// Worker threads for the evaluation pool; 0 uses one per core.
    pub workers: usize,
    /// Base seed handed to stochastic families.
    pub seed: u64,
}

impl Default for TuneOptions {
    fn default() -> Self {
        Self { workers: 0, seed: 42 }
    }
}

/// Aggregate cross-validation score of one grid point.
#[derive(Debug, Clone, PartialEq)]
pub struct GridPointSummary {
    pub params: Hyperparameters,
    pub mean: f64,
    pub std_err: f64,
    pub n: usize,
    /// One score per (repeat, fold), repeat-major.
    pub scores: Vec<f64>,
}

impl GridPointSummary {
    fn from_scores(params: Hyperparameters, scores: Vec<f64>) -> Self {
        let n = scores.len();
        let mean = scores.iter().sum::<f64>() / n as f64;
        let std_err = if n < 2 {
            0.0
        } else {
            let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            (variance / n as f64).sqrt()
        };
        Self {
            params,
            mean,
            std_err,
            n,
            scores,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TuningResult {
    family: String,
    metric: Metric,
    grid: Grid,
    points: Vec<GridPointSummary>,
}

impl TuningResult {
    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Summaries in grid order.
    pub fn points(&self) -> &[GridPointSummary] {
        &self.points
    }

    /// The point with the best mean score. Points whose means agree with the
    /// best to within a relative `1e-12` are ties; the tie goes to the
    /// simplest configuration (see [`Grid::simplicity_cmp`]), then to the
    /// earliest grid position.
    pub fn select_best(&self) -> &GridPointSummary {
        let Some(best_mean) = self.best_mean() else {
            return &self.points[0];
        };
        let tolerance = 1e-12 * best_mean.abs().max(1.0);
        self.simplest_where(|point| (point.mean - best_mean).abs() <= tolerance)
    }

    /// The simplest point whose mean lies within one standard error of the
    /// best point's mean.
    pub fn select_by_one_std_err(&self) -> &GridPointSummary {
        let best = self.select_best();
        if best.mean.is_nan() {
            return best;
        }
        let limit = if self.metric.minimize() {
            best.mean + best.std_err
        } else {
            best.mean - best.std_err
        };
        let metric = self.metric;
        self.simplest_where(|point| !point.mean.is_nan() && !metric.is_better(limit, point.mean))
    }

    /// The `n` best points, best first. Equal means keep grid order.
    pub fn show_best(&self, n: usize) -> Vec<&GridPointSummary> {
        let mut ranked: Vec<&GridPointSummary> = self.points.iter().collect();
        let metric = self.metric;
        ranked.sort_by(|a, b| rank_cmp(metric, a.mean, b.mean));
        ranked.truncate(n);
        ranked
    }

    fn best_mean(&self) -> Option<f64> {
        self.points
            .iter()
            .map(|point| point.mean)
            .filter(|mean| !mean.is_nan())
            .reduce(|best, mean| if self.metric.is_better(mean, best) { mean } else { best })
    }

    fn simplest_where(&self, eligible: impl Fn(&GridPointSummary) -> bool) -> &GridPointSummary {
        self.points
            .iter()
            .enumerate()
            .filter(|(_, point)| eligible(point))
            .min_by(|(i, a), (j, b)| self.grid.simplicity_cmp(&a.params, &b.params).then(i.cmp(j)))
            .map(|(_, point)| point)
            .unwrap_or(&self.points[0])
    }
}

/// Orders scores best first; `NaN` sorts last.
fn rank_cmp(metric: Metric, a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) if metric.minimize() => a.total_cmp(&b),
        (false, false) => b.total_cmp(&a),
    }
}

/// Resamples held for the duration of one `tune` call.
struct Resample {
    repeat: usize,
    fold: usize,
    analysis: Dataset,
    assessment: Dataset,
}

/// Scores every grid point on every (repeat, fold) resample of `train`.
///
/// Evaluations run on a thread pool that lives only for this call. The first
/// failing evaluation aborts the whole family; the error names the grid point
/// and resample that failed.
#[instrument(skip_all, fields(family = family.name(), grid_points = grid.len()))]
pub fn tune(
    family: &dyn ModelFamily,
    train: &Dataset,
    folds: &FoldAssignment,
    grid: &Grid,
    metric: Metric,
    options: &TuneOptions,
) -> Result<TuningResult> {
    if folds.n_rows() != train.n_rows() {
        return Err(ModelSelectionError::InvalidInput(format!(
            "fold assignment covers {} rows but the training set has {}",
            folds.n_rows(),
            train.n_rows()
        )));
    }
    if grid.is_empty() {
        return Err(ModelSelectionError::InvalidInput(format!(
            "empty hyperparameter grid for {}",
            family.name()
        )));
    }

    let resamples: Vec<Resample> = (0..folds.repeats())
        .flat_map(|repeat| (0..folds.k()).map(move |fold| (repeat, fold)))
        .map(|(repeat, fold)| Resample {
            repeat,
            fold,
            analysis: train.subset(&folds.analysis(repeat, fold)),
            assessment: train.subset(&folds.assessment(repeat, fold)),
        })
        .collect();
    let units: Vec<(usize, usize)> = (0..grid.len())
        .flat_map(|point| (0..resamples.len()).map(move |resample| (point, resample)))
        .collect();
    debug!(
        resamples = resamples.len(),
        units = units.len(),
        workers = options.workers,
        "Evaluating grid"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers)
        .build()?;
    let scores: Vec<Result<f64>> = pool.install(|| {
        units
            .par_iter()
            .map(|&(point, resample)| {
                evaluate_unit(
                    family,
                    &grid.points()[point],
                    &resamples[resample],
                    resample,
                    metric,
                    options.seed,
                )
            })
            .collect::<Vec<Result<f64>>>()
    });
    drop(pool);
    // results keep unit order; the earliest failure is reported
    let scores = scores.into_iter().collect::<Result<Vec<f64>>>()?;

    let points: Vec<GridPointSummary> = grid
        .points()
        .iter()
        .zip(scores.chunks(resamples.len()))
        .map(|(params, chunk)| GridPointSummary::from_scores(params.clone(), chunk.to_vec()))
        .collect();

    let result = TuningResult {
        family: family.name().to_string(),
        metric,
        grid: grid.clone(),
        points,
    };
    let best = result.select_best();
    info!(
        family = family.name(),
        best = %best.params,
        mean = best.mean,
        std_err = best.std_err,
        "Tuning complete"
    );
    Ok(result)
}

fn evaluate_unit(
    family: &dyn ModelFamily,
    params: &Hyperparameters,
    resample: &Resample,
    resample_idx: usize,
    metric: Metric,
    seed: u64,
) -> Result<f64> {
    let wrap = |source: ModelSelectionError| ModelSelectionError::Evaluation {
        family: family.name().to_string(),
        params: params.to_string(),
        repeat: resample.repeat,
        fold: resample.fold,
        source: Box::new(source),
    };
    let model = family
        .fit(&resample.analysis, params, seed.wrapping_add(resample_idx as u64))
        .map_err(wrap)?;
    let predictions = model.predict(&resample.assessment).map_err(wrap)?;
    Ok(metric.compute(resample.assessment.target().view(), predictions.view()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::testing;
    use crate::grid::{Levels, ParamSpec, Simpler};
    use crate::models::{LassoFamily, NullFamily, RandomForestFamily, TreeFamily};
    use crate::split::{make_folds, split};

    fn prepared(n: usize, seed: u64) -> (Dataset, FoldAssignment) {
        let data = testing::linear(n, seed);
        let parts = split(&data, 0.7, "y", 4, seed).unwrap();
        let train = data.subset(&parts.train);
        let folds = make_folds(&train, 5, 1, "y", 4, seed).unwrap();
        (train, folds)
    }

    fn options(workers: usize) -> TuneOptions {
        TuneOptions { workers, seed: 7 }
    }

    #[test]
    fn test_lasso_beats_null_on_linear_data() {
        let (train, folds) = prepared(100, 1);
        let null = tune(&NullFamily, &train, &folds, &Grid::empty(), Metric::Rmse, &options(2)).unwrap();

        let lasso = LassoFamily::new(Levels::log10(-4.0, 0.0, 5));
        let grid = lasso.hyperparameter_space().unwrap();
        let tuned = tune(&lasso, &train, &folds, &grid, Metric::Rmse, &options(2)).unwrap();

        assert_eq!(tuned.points().len(), 5);
        assert!(tuned.points().iter().all(|point| point.n == 5));
        assert!(tuned.select_best().mean < null.select_best().mean);
    }

    #[test]
    fn test_tuning_is_reproducible() {
        let data = testing::friedman_like(90, 4);
        let folds = make_folds(&data, 3, 2, "y", 4, 5).unwrap();

        let tree = TreeFamily::default().with_min_split(4).with_min_leaf(2);
        let tree_grid = Grid::regular(vec![
            (crate::models::tree::COST_COMPLEXITY, Levels::Values(vec![0.0, 0.01])),
            (crate::models::tree::TREE_DEPTH, Levels::Values(vec![2.0, 4.0])),
        ])
        .unwrap();
        let a = tune(&tree, &data, &folds, &tree_grid, Metric::Rmse, &options(3)).unwrap();
        let b = tune(&tree, &data, &folds, &tree_grid, Metric::Rmse, &options(1)).unwrap();
        assert_eq!(a, b);

        let forest = RandomForestFamily::new(
            Some(Levels::Values(vec![1.0, 2.0])),
            Levels::Values(vec![15.0]),
            Levels::Values(vec![5.0]),
        );
        let forest_grid = forest.finalize(&data).unwrap();
        let a = tune(&forest, &data, &folds, &forest_grid, Metric::Rmse, &options(4)).unwrap();
        let b = tune(&forest, &data, &folds, &forest_grid, Metric::Rmse, &options(2)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.points()[0].scores.len(), 6);
    }

    #[test]
    fn test_invalid_grid_point_aborts_family() {
        let (train, folds) = prepared(60, 2);
        let spec = ParamSpec::non_negative("penalty", Simpler::Larger);
        let grid = Grid::explicit(
            vec![spec],
            vec![
                Hyperparameters::new().with("penalty", 0.1),
                Hyperparameters::new().with("penalty", -1.0),
            ],
        )
        .unwrap();

        let err = tune(&LassoFamily::default(), &train, &folds, &grid, Metric::Rmse, &options(2)).unwrap_err();
        match &err {
            ModelSelectionError::Evaluation { family, params, .. } => {
                assert_eq!(family, "lasso");
                assert_eq!(params, "penalty=-1");
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(matches!(err.root_cause(), ModelSelectionError::InvalidHyperparameter { .. }));
    }

    #[test]
    fn test_first_failing_point_is_reported() {
        let (train, folds) = prepared(60, 2);
        let spec = ParamSpec::non_negative("penalty", Simpler::Larger);
        let grid = Grid::explicit(
            vec![spec],
            vec![
                Hyperparameters::new().with("penalty", 0.1),
                Hyperparameters::new().with("penalty", -1.0),
                Hyperparameters::new().with("penalty", -2.0),
                Hyperparameters::new().with("penalty", -3.0),
            ],
        )
        .unwrap();

        for _ in 0..5 {
            let err = tune(&LassoFamily::default(), &train, &folds, &grid, Metric::Rmse, &options(4)).unwrap_err();
            match err {
                ModelSelectionError::Evaluation { params, repeat, fold, .. } => {
                    assert_eq!(params, "penalty=-1");
                    assert_eq!((repeat, fold), (0, 0));
                }
                other => panic!("unexpected error {other}"),
            }
        }
    }

    #[test]
    fn test_ties_go_to_simplest_configuration() {
        let (train, folds) = prepared(60, 3);
        // every penalty here zeroes the slope, so all scores coincide
        let lasso = LassoFamily::new(Levels::Values(vec![1e3, 1e5, 1e4]));
        let grid = lasso.hyperparameter_space().unwrap();
        let result = tune(&lasso, &train, &folds, &grid, Metric::Rmse, &options(2)).unwrap();

        assert_eq!(result.points()[0].mean, result.points()[1].mean);
        assert_eq!(result.select_best().params.get("penalty"), Some(1e5));
    }

    #[test]
    fn test_one_std_err_rule_prefers_simpler() {
        let (train, folds) = prepared(100, 4);
        let lasso = LassoFamily::new(Levels::log10(-4.0, 1.0, 11));
        let grid = lasso.hyperparameter_space().unwrap();
        let result = tune(&lasso, &train, &folds, &grid, Metric::Rmse, &options(0)).unwrap();

        let best = result.select_best();
        let relaxed = result.select_by_one_std_err();
        assert!(relaxed.params.get("penalty").unwrap() >= best.params.get("penalty").unwrap());
        assert!(relaxed.mean <= best.mean + best.std_err);
    }

    #[test]
    fn test_show_best_orders_by_metric() {
        let (train, folds) = prepared(80, 5);
        let lasso = LassoFamily::new(Levels::log10(-3.0, 1.0, 5));
        let grid = lasso.hyperparameter_space().unwrap();
        let result = tune(&lasso, &train, &folds, &grid, Metric::Rmse, &options(2)).unwrap();

        let top = result.show_best(3);
        assert_eq!(top.len(), 3);
        assert!(top[0].mean <= top[1].mean && top[1].mean <= top[2].mean);

        let rsq = tune(&lasso, &train, &folds, &grid, Metric::RSquared, &options(2)).unwrap();
        let top = rsq.show_best(2);
        assert!(top[0].mean.is_nan() || top[1].mean.is_nan() || top[0].mean >= top[1].mean);
    }

    #[test]
    fn test_rejects_mismatched_folds() {
        let (train, folds) = prepared(60, 6);
        let smaller = train.subset(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let err = tune(&NullFamily, &smaller, &folds, &Grid::empty(), Metric::Rmse, &options(1)).unwrap_err();
        assert!(matches!(err, ModelSelectionError::InvalidInput(_)));
    }

    #[test]
    fn test_standard_error() {
        let summary = GridPointSummary::from_scores(Hyperparameters::new(), vec![1.0, 2.0, 3.0, 4.0]);
        assert!((summary.mean - 2.5).abs() < 1e-12);
        let expected = (5.0f64 / 3.0 / 4.0).sqrt();
        assert!((summary.std_err - expected).abs() < 1e-12);
    }
}
