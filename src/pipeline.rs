//! One end-to-end model-selection run.

use crate::config::Config;
use crate::data_loader::DataLoader;
use crate::dataset::Dataset;
use crate::evaluator::{compare_families, evaluate};
use crate::models::{ModelFamily, NullFamily};
use crate::preprocess::Preprocessor;
use crate::report::Report;
use crate::split::{make_folds, split};
use crate::tuner::{tune, TuneOptions};
use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

/// Load, preprocess, split, tune every configured family, promote one and
/// score it on the holdout set.
#[instrument(skip_all, fields(data = %config.data_path, target = %config.target))]
pub fn run(config: &Config) -> Result<Report> {
    let raw = DataLoader::new(&config.data_path)?
        .with_null_values(config.null_values.clone())
        .load()?;
    let policy = config.columns.clone().retaining(&config.target);
    let frame = Preprocessor::new(policy)
        .apply(&raw)
        .context("Failed to preprocess input")?;
    let dataset = Dataset::from_frame(&frame, &config.target).context("Failed to build dataset")?;
    info!(
        rows = dataset.n_rows(),
        features = dataset.n_features(),
        "Prepared dataset"
    );

    run_on(config, &dataset)
}

/// Everything after loading, on an in-memory dataset.
pub fn run_on(config: &Config, dataset: &Dataset) -> Result<Report> {
    let stratify = config.stratify_column();
    let bins = config.cv.strata_bins;
    let parts = split(dataset, config.train_fraction, stratify, bins, config.seed)
        .context("Failed to split train and test sets")?;
    let train = dataset.subset(&parts.train);
    let test = dataset.subset(&parts.test);
    let folds = make_folds(&train, config.cv.folds, config.cv.repeats, stratify, bins, config.seed)
        .context("Failed to assign folds")?;
    info!(
        n_train = train.n_rows(),
        n_test = test.n_rows(),
        folds = config.cv.folds,
        repeats = config.cv.repeats,
        "Split data"
    );

    let mut families = config.models.families()?;
    let null_name = NullFamily.name();
    if !families.iter().any(|family| family.name() == null_name) {
        debug!("Adding the intercept-only baseline to the compared families");
        families.insert(0, Box::new(NullFamily));
    }
    let options = TuneOptions {
        workers: config.cv.workers,
        seed: config.seed,
    };
    let mut tuning = Vec::with_capacity(families.len());
    for family in &families {
        let grid = family.finalize(&train)?;
        let result = tune(family.as_ref(), &train, &folds, &grid, config.cv.metric, &options)
            .with_context(|| format!("Tuning {} failed", family.name()))?;
        tuning.push(result);
    }

    let promotion = compare_families(&tuning)?;
    if !promotion.beats_baseline {
        warn!(
            family = %promotion.family,
            mean = promotion.best.mean,
            baseline = ?promotion.baseline,
            "Promoted family does not beat the intercept-only baseline"
        );
    }

    let family = families
        .iter()
        .find(|family| family.name() == promotion.family)
        .context("Promoted family is not configured")?;
    // the final refit honours the worker limit too
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.cv.workers)
        .build()?;
    let evaluation = pool.install(|| {
        evaluate(
            family.as_ref(),
            &promotion.best.params,
            &train,
            &test,
            config.cv.metric,
            config.seed,
        )
    })?;

    Ok(Report {
        tuning,
        promotion,
        evaluation,
    })
}
