use crate::dataset::Dataset;
use crate::error::{ModelSelectionError, Result};
use crate::grid::{Grid, Hyperparameters};
use ndarray::Array1;

/// A trained estimator bound to one configuration and one training set.
pub trait FittedModel: Send + Sync {
    /// Predictor columns seen at fit time, in order.
    fn feature_names(&self) -> &[String];

    /// One prediction per row of `data`, in row order.
    fn predict(&self, data: &Dataset) -> Result<Array1<f64>>;
}

/// A regression model family with a declared hyperparameter space.
pub trait ModelFamily: Send + Sync {
    fn name(&self) -> &'static str;

    fn hyperparameter_space(&self) -> Result<Grid>;

    /// Grid with data-dependent ranges resolved against the training set.
    fn finalize(&self, _train: &Dataset) -> Result<Grid> {
        self.hyperparameter_space()
    }

    /// Fits on `train`. `seed` drives every random choice the family makes,
    /// so identical inputs give identical models.
    fn fit(
        &self,
        train: &Dataset,
        params: &Hyperparameters,
        seed: u64,
    ) -> Result<Box<dyn FittedModel>>;
}

pub(crate) fn check_schema(expected: &[String], data: &Dataset) -> Result<()> {
    if expected != data.feature_names() {
        return Err(ModelSelectionError::SchemaMismatch {
            expected: expected.to_vec(),
            found: data.feature_names().to_vec(),
        });
    }
    Ok(())
}

pub(crate) fn require_rows(family: &str, train: &Dataset) -> Result<()> {
    if train.n_rows() == 0 {
        return Err(ModelSelectionError::InsufficientData(format!(
            "{family} cannot be fitted on an empty training set"
        )));
    }
    Ok(())
}
