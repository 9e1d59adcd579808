//! Tabular outputs of a run, written as CSV for downstream plotting.

use crate::error::Result;
use crate::evaluator::{Evaluation, Predictions, Promotion};
use crate::tuner::TuningResult;
use polars::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::info;

pub struct Report {
    /// One result per tuned family, in comparison order.
    pub tuning: Vec<TuningResult>,
    pub promotion: Promotion,
    pub evaluation: Evaluation,
}

impl Report {
    /// One row per grid point: a column per hyperparameter, then `mean`,
    /// `std_err` and `n`.
    pub fn tuning_frame(result: &TuningResult) -> Result<DataFrame> {
        let points = result.points();
        let mut columns: Vec<Column> = result
            .grid()
            .specs()
            .iter()
            .map(|spec| {
                let values: Vec<Option<f64>> = points.iter().map(|point| point.params.get(spec.name)).collect();
                Column::new(spec.name.into(), values)
            })
            .collect();
        columns.push(Column::new(
            "mean".into(),
            points.iter().map(|point| point.mean).collect::<Vec<f64>>(),
        ));
        columns.push(Column::new(
            "std_err".into(),
            points.iter().map(|point| point.std_err).collect::<Vec<f64>>(),
        ));
        columns.push(Column::new(
            "n".into(),
            points.iter().map(|point| point.n as u64).collect::<Vec<u64>>(),
        ));
        Ok(DataFrame::new(columns)?)
    }

    pub fn predictions_frame(predictions: &Predictions) -> Result<DataFrame> {
        Ok(DataFrame::new(vec![
            Column::new("actual".into(), predictions.actual.to_vec()),
            Column::new("predicted".into(), predictions.predicted.to_vec()),
            Column::new("residual".into(), predictions.residuals.to_vec()),
        ])?)
    }

    /// Single-row overview of the promoted family.
    pub fn summary_frame(&self) -> Result<DataFrame> {
        let evaluation = &self.evaluation;
        Ok(DataFrame::new(vec![
            Column::new("family".into(), vec![self.promotion.family.clone()]),
            Column::new("params".into(), vec![evaluation.params.to_string()]),
            Column::new("metric".into(), vec![evaluation.metric.name().to_string()]),
            Column::new("cv_mean".into(), vec![self.promotion.best.mean]),
            Column::new("cv_std_err".into(), vec![self.promotion.best.std_err]),
            Column::new("holdout".into(), vec![evaluation.metric_value]),
            Column::new("holdout_rmse".into(), vec![evaluation.holdout.rmse]),
            Column::new("holdout_rsq".into(), vec![evaluation.holdout.r_squared]),
            Column::new("baseline".into(), vec![self.promotion.baseline]),
            Column::new("beats_baseline".into(), vec![self.promotion.beats_baseline]),
        ])?)
    }

    /// Writes every table under `dir`, creating it if needed, and returns the
    /// paths written.
    pub fn write(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let mut tables = Vec::with_capacity(self.tuning.len() + 3);
        for result in &self.tuning {
            tables.push((format!("tuning_{}.csv", result.family()), Self::tuning_frame(result)?));
        }
        tables.push((
            "predictions_train.csv".to_string(),
            Self::predictions_frame(&self.evaluation.train)?,
        ));
        tables.push((
            "predictions_test.csv".to_string(),
            Self::predictions_frame(&self.evaluation.test)?,
        ));
        tables.push(("summary.csv".to_string(), self.summary_frame()?));

        let mut written = Vec::with_capacity(tables.len());
        for (name, mut df) in tables {
            let path = dir.join(name);
            let mut file = File::create(&path)?;
            CsvWriter::new(&mut file).finish(&mut df)?;
            written.push(path);
        }
        info!(dir = %dir.display(), files = written.len(), "Wrote report");
        Ok(written)
    }
}
