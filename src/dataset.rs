use crate::error::{ModelSelectionError, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use polars::prelude::*;

/// A fully numeric table: named predictor columns plus one numeric target.
///
/// Rows are immutable once built; splitting and fold extraction go through
/// [`Dataset::subset`], which always produces a new copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    feature_names: Vec<String>,
    features: Array2<f64>,
    target_name: String,
    target: Array1<f64>,
}

impl Dataset {
    pub fn new(
        feature_names: Vec<String>,
        features: Array2<f64>,
        target_name: impl Into<String>,
        target: Array1<f64>,
    ) -> Result<Self> {
        let target_name = target_name.into();
        if features.ncols() != feature_names.len() {
            return Err(ModelSelectionError::Schema(format!(
                "{} feature names for {} feature columns",
                feature_names.len(),
                features.ncols()
            )));
        }
        if features.nrows() != target.len() {
            return Err(ModelSelectionError::Schema(format!(
                "{} feature rows but {} target values",
                features.nrows(),
                target.len()
            )));
        }
        let mut seen = std::collections::BTreeSet::new();
        for name in feature_names.iter().chain(std::iter::once(&target_name)) {
            if !seen.insert(name.as_str()) {
                return Err(ModelSelectionError::Schema(format!(
                    "duplicate column name `{name}`"
                )));
            }
        }
        Ok(Self {
            feature_names,
            features,
            target_name,
            target,
        })
    }

    /// Builds a dataset from a preprocessed frame. Every column must be numeric
    /// and free of missing values; `target` becomes the response and every
    /// other column a predictor, in frame order.
    pub fn from_frame(df: &DataFrame, target: &str) -> Result<Self> {
        let names: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        if !names.iter().any(|name| name == target) {
            return Err(ModelSelectionError::Schema(format!(
                "target column `{target}` not found in {names:?}"
            )));
        }

        let target_values = numeric_values(df, target)?;
        let feature_names: Vec<String> = names.into_iter().filter(|name| name != target).collect();
        let mut features = Array2::zeros((df.height(), feature_names.len()));
        for (j, name) in feature_names.iter().enumerate() {
            let values = numeric_values(df, name)?;
            features.column_mut(j).assign(&Array1::from_vec(values));
        }

        Self::new(feature_names, features, target, Array1::from_vec(target_values))
    }

    pub fn n_rows(&self) -> usize {
        self.target.len()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn target(&self) -> &Array1<f64> {
        &self.target
    }

    /// Looks up a column by name, the target included.
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        if name == self.target_name {
            return Some(self.target.view());
        }
        self.feature_names
            .iter()
            .position(|feature| feature == name)
            .map(|j| self.features.column(j))
    }

    pub fn require_column(&self, name: &str) -> Result<ArrayView1<'_, f64>> {
        self.column(name).ok_or_else(|| {
            ModelSelectionError::Schema(format!(
                "column `{name}` not found (target `{}`, features {:?})",
                self.target_name, self.feature_names
            ))
        })
    }

    /// Rows at `indices`, in that order.
    pub fn subset(&self, indices: &[usize]) -> Dataset {
        Dataset {
            feature_names: self.feature_names.clone(),
            features: self.features.select(Axis(0), indices),
            target_name: self.target_name.clone(),
            target: self.target.select(Axis(0), indices),
        }
    }

    pub fn same_schema(&self, other: &Dataset) -> bool {
        self.feature_names == other.feature_names && self.target_name == other.target_name
    }
}

pub(crate) fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Boolean
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::Float32
            | DataType::Float64
    )
}

fn numeric_values(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let column = df.column(name)?;
    if !is_numeric(column.dtype()) {
        return Err(ModelSelectionError::Schema(format!(
            "column `{name}` has non-numeric type {}",
            column.dtype()
        )));
    }
    let series = column.as_materialized_series().cast(&DataType::Float64)?;
    let values = series
        .f64()?
        .into_iter()
        .map(|value| {
            value.ok_or_else(|| {
                ModelSelectionError::Schema(format!("column `{name}` contains missing values"))
            })
        })
        .collect::<Result<Vec<f64>>>()?;
    Ok(values)
}

/// Synthetic data shared by the unit tests of several modules.
#[cfg(test)]
pub(crate) mod testing {
    use super::Dataset;
    use ndarray::{Array1, Array2};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// `y = 2x + noise` with `x` uniform on [0, 10) and noise uniform on [-1, 1).
    pub fn linear(n: usize, seed: u64) -> Dataset {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let x: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..10.0)).collect();
        let y: Vec<f64> = x.iter().map(|&x| 2.0 * x + rng.gen_range(-1.0..1.0)).collect();
        let features = Array2::from_shape_vec((n, 1), x).unwrap();
        Dataset::new(vec!["x".to_string()], features, "y", Array1::from_vec(y)).unwrap()
    }

    /// Two informative predictors and one pure-noise predictor.
    pub fn friedman_like(n: usize, seed: u64) -> Dataset {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut features = Array2::zeros((n, 3));
        let mut target = Array1::zeros(n);
        for i in 0..n {
            let a: f64 = rng.gen_range(0.0..1.0);
            let b: f64 = rng.gen_range(0.0..1.0);
            let c: f64 = rng.gen_range(0.0..1.0);
            features[[i, 0]] = a;
            features[[i, 1]] = b;
            features[[i, 2]] = c;
            target[i] = 10.0 * (a > 0.5) as u8 as f64 + 5.0 * b + rng.gen_range(-0.5..0.5);
        }
        Dataset::new(
            vec!["a".to_string(), "b".to_string(), "noise".to_string()],
            features,
            "y",
            target,
        )
        .unwrap()
    }
}
