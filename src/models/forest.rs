//! Bagged regression trees with per-node feature sampling.

use super::traits::{check_schema, require_rows, FittedModel, ModelFamily};
use super::tree::{grow, GrowthParams, TreeNode};
use crate::dataset::Dataset;
use crate::error::{ModelSelectionError, Result};
use crate::grid::{Grid, Hyperparameters, Levels, ParamSpec, Simpler};
use ndarray::Array1;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

pub const MTRY: ParamSpec = ParamSpec::count("mtry", 1, Simpler::Smaller);
pub const TREES: ParamSpec = ParamSpec::count("trees", 1, Simpler::Smaller);
pub const MIN_N: ParamSpec = ParamSpec::count("min_n", 1, Simpler::Larger);

/// Random forest tuned over `mtry`, `trees` and `min_n`.
///
/// When no `mtry` levels are configured the grid is finalised against the
/// training data to cover `1..=n_features` (at most three levels).
#[derive(Debug, Clone)]
pub struct RandomForestFamily {
    mtry: Option<Levels>,
    trees: Levels,
    min_n: Levels,
}

impl Default for RandomForestFamily {
    fn default() -> Self {
        Self::new(None, Levels::Values(vec![100.0]), Levels::regular(2.0, 40.0, 3))
    }
}

impl RandomForestFamily {
    pub fn new(mtry: Option<Levels>, trees: Levels, min_n: Levels) -> Self {
        Self { mtry, trees, min_n }
    }

    pub fn trees(&self) -> &Levels {
        &self.trees
    }

    pub fn min_n(&self) -> &Levels {
        &self.min_n
    }

    fn grid_with(&self, mtry: Levels) -> Result<Grid> {
        Grid::regular(vec![
            (MTRY, mtry),
            (TREES, self.trees.clone()),
            (MIN_N, self.min_n.clone()),
        ])
    }
}

pub struct RandomForestModel {
    feature_names: Vec<String>,
    trees: Vec<TreeNode>,
}

impl RandomForestModel {
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl FittedModel for RandomForestModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, data: &Dataset) -> Result<Array1<f64>> {
        check_schema(&self.feature_names, data)?;
        let n_trees = self.trees.len() as f64;
        Ok(data
            .features()
            .rows()
            .into_iter()
            .map(|row| self.trees.iter().map(|tree| tree.predict_row(row)).sum::<f64>() / n_trees)
            .collect())
    }
}

impl ModelFamily for RandomForestFamily {
    fn name(&self) -> &'static str {
        "random_forest"
    }

    fn hyperparameter_space(&self) -> Result<Grid> {
        self.grid_with(self.mtry.clone().unwrap_or(Levels::Values(vec![1.0])))
    }

    fn finalize(&self, train: &Dataset) -> Result<Grid> {
        match &self.mtry {
            Some(levels) => self.grid_with(levels.clone()),
            None => {
                let p = train.n_features().max(1);
                self.grid_with(Levels::regular(1.0, p as f64, p.min(3)))
            }
        }
    }

    /// Tree `t` draws its bootstrap sample and node feature subsets from
    /// `ChaCha8Rng::seed_from_u64(seed + t)`.
    fn fit(&self, train: &Dataset, params: &Hyperparameters, seed: u64) -> Result<Box<dyn FittedModel>> {
        let mtry = params.count(&MTRY)?;
        let n_trees = params.count(&TREES)?;
        let min_n = params.count(&MIN_N)?;
        if mtry > train.n_features() {
            return Err(ModelSelectionError::invalid_hyperparameter(
                MTRY.name,
                format!("{mtry} exceeds the {} available predictors", train.n_features()),
            ));
        }
        require_rows(self.name(), train)?;

        let n = train.n_rows();
        let growth = GrowthParams {
            max_depth: None,
            min_split: min_n.max(2),
            min_leaf: 1,
            mtry: Some(mtry),
        };
        let x = train.features();
        let y = train.target();

        let trees: Vec<TreeNode> = (0..n_trees)
            .into_par_iter()
            .map(|tree_idx| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(tree_idx as u64));
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                grow(x, y, &sample, &growth, Some(&mut rng))
            })
            .collect();
        debug!(n_trees, mtry, min_n, n_rows = n, "Fitted random forest");

        Ok(Box::new(RandomForestModel {
            feature_names: train.feature_names().to_vec(),
            trees,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::testing;
    use crate::metrics::rmse;

    fn params(mtry: f64, trees: f64, min_n: f64) -> Hyperparameters {
        Hyperparameters::new()
            .with("mtry", mtry)
            .with("trees", trees)
            .with("min_n", min_n)
    }

    #[test]
    fn test_forest_beats_mean() {
        let train = testing::friedman_like(200, 1);
        let test = testing::friedman_like(100, 2);
        let model = RandomForestFamily::default().fit(&train, &params(2.0, 50.0, 5.0), 7).unwrap();
        let predictions = model.predict(&test).unwrap();
        let forest_rmse = rmse(test.target().view(), predictions.view());

        let mean = train.target().mean().unwrap();
        let baseline = rmse(test.target().view(), Array1::from_elem(100, mean).view());
        assert!(forest_rmse < baseline * 0.5, "forest {forest_rmse} vs baseline {baseline}");
    }

    #[test]
    fn test_same_seed_same_forest() {
        let data = testing::friedman_like(80, 3);
        let family = RandomForestFamily::default();
        let a = family.fit(&data, &params(1.0, 20.0, 5.0), 11).unwrap().predict(&data).unwrap();
        let b = family.fit(&data, &params(1.0, 20.0, 5.0), 11).unwrap().predict(&data).unwrap();
        let c = family.fit(&data, &params(1.0, 20.0, 5.0), 12).unwrap().predict(&data).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_rejects_mtry_above_feature_count() {
        let data = testing::linear(30, 1);
        let err = RandomForestFamily::default().fit(&data, &params(2.0, 10.0, 5.0), 0).err().unwrap();
        assert!(matches!(err, ModelSelectionError::InvalidHyperparameter { .. }));
    }

    #[test]
    fn test_rejects_zero_trees() {
        let data = testing::linear(30, 1);
        let err = RandomForestFamily::default().fit(&data, &params(1.0, 0.0, 5.0), 0).err().unwrap();
        assert!(matches!(err, ModelSelectionError::InvalidHyperparameter { .. }));
    }

    #[test]
    fn test_finalize_covers_feature_count() {
        let data = testing::friedman_like(20, 1);
        let grid = RandomForestFamily::default().finalize(&data).unwrap();
        let mut mtry: Vec<f64> = grid.points().iter().filter_map(|p| p.get("mtry")).collect();
        mtry.dedup();
        assert_eq!(mtry, vec![1.0, 2.0, 3.0]);
        assert_eq!(grid.len(), 9);
    }
}
