use super::traits::{check_schema, require_rows, FittedModel, ModelFamily};
use crate::dataset::Dataset;
use crate::error::Result;
use crate::grid::{Grid, Hyperparameters};
use ndarray::Array1;

/// Intercept-only baseline: predicts the training mean for every row.
#[derive(Debug, Clone, Default)]
pub struct NullFamily;

pub struct NullModel {
    feature_names: Vec<String>,
    mean: f64,
}

impl NullModel {
    pub fn mean(&self) -> f64 {
        self.mean
    }
}

impl FittedModel for NullModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, data: &Dataset) -> Result<Array1<f64>> {
        check_schema(&self.feature_names, data)?;
        Ok(Array1::from_elem(data.n_rows(), self.mean))
    }
}

impl ModelFamily for NullFamily {
    fn name(&self) -> &'static str {
        "null"
    }

    fn hyperparameter_space(&self) -> Result<Grid> {
        Ok(Grid::empty())
    }

    fn fit(&self, train: &Dataset, _params: &Hyperparameters, _seed: u64) -> Result<Box<dyn FittedModel>> {
        require_rows(self.name(), train)?;
        let mean = train.target().mean().unwrap_or(0.0);
        Ok(Box::new(NullModel {
            feature_names: train.feature_names().to_vec(),
            mean,
        }))
    }
}
