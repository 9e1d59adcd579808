use crate::error::{ModelSelectionError, Result};
use crate::grid::Levels;
use crate::metrics::Metric;
use crate::models::{LassoFamily, ModelFamily, NullFamily, RandomForestFamily, TreeFamily};
use crate::preprocess::ColumnPolicy;
use crate::BoxError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Path, glob pattern or http(s) URL of the input table.
    pub data_path: String,
    pub target: String,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_train_fraction")]
    pub train_fraction: f64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_null_values")]
    pub null_values: Vec<String>,
    #[serde(default)]
    pub columns: ColumnPolicy,
    #[serde(default)]
    pub cv: CvParams,
    #[serde(default)]
    pub models: ModelParams,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CvParams {
    pub folds: usize,
    pub repeats: usize,
    /// Quantile bins used to stratify a continuous column.
    pub strata_bins: usize,
    /// Column to stratify on; the target when absent.
    pub stratify: Option<String>,
    /// Worker threads for tuning, 0 for one per core.
    pub workers: usize,
    pub metric: Metric,
}

impl Default for CvParams {
    fn default() -> Self {
        Self {
            folds: 10,
            repeats: 1,
            strata_bins: 4,
            stratify: None,
            workers: 0,
            metric: Metric::Rmse,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// Families to tune, in comparison order.
    pub families: Vec<String>,
    pub tree: TreeParams,
    pub lasso: LassoParams,
    pub forest: ForestParams,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            families: ["null", "tree", "lasso", "random_forest"]
                .iter()
                .map(|name| name.to_string())
                .collect(),
            tree: TreeParams::default(),
            lasso: LassoParams::default(),
            forest: ForestParams::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TreeParams {
    pub cost_complexity: Option<Levels>,
    pub tree_depth: Option<Levels>,
    pub min_split: Option<usize>,
    pub min_leaf: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LassoParams {
    pub penalty: Option<Levels>,
    pub max_iter: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub mtry: Option<Levels>,
    pub trees: Option<Levels>,
    pub min_n: Option<Levels>,
}

fn default_seed() -> u64 {
    42
}

fn default_train_fraction() -> f64 {
    0.75
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_null_values() -> Vec<String> {
    vec!["NA".to_string(), String::new()]
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> std::result::Result<Self, BoxError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// The column both the split and the folds stratify on.
    pub fn stratify_column(&self) -> &str {
        self.cv.stratify.as_deref().unwrap_or(&self.target)
    }
}

impl ModelParams {
    /// Instantiates the configured families; levels left out of the config
    /// fall back to each family's default grid.
    pub fn families(&self) -> Result<Vec<Box<dyn ModelFamily>>> {
        self.families
            .iter()
            .map(|name| -> Result<Box<dyn ModelFamily>> {
                match name.as_str() {
                    "null" => Ok(Box::new(NullFamily)),
                    "tree" => Ok(Box::new(self.tree.family())),
                    "lasso" => Ok(Box::new(self.lasso.family())),
                    "random_forest" => Ok(Box::new(self.forest.family())),
                    other => Err(ModelSelectionError::InvalidInput(format!(
                        "unknown model family `{other}`"
                    ))),
                }
            })
            .collect()
    }
}

impl TreeParams {
    fn family(&self) -> TreeFamily {
        let defaults = TreeFamily::default();
        let mut family = TreeFamily::new(
            self.cost_complexity.clone().unwrap_or_else(|| defaults.cost_complexity().clone()),
            self.tree_depth.clone().unwrap_or_else(|| defaults.tree_depth().clone()),
        );
        if let Some(min_split) = self.min_split {
            family = family.with_min_split(min_split);
        }
        if let Some(min_leaf) = self.min_leaf {
            family = family.with_min_leaf(min_leaf);
        }
        family
    }
}

impl LassoParams {
    fn family(&self) -> LassoFamily {
        let family = match &self.penalty {
            Some(penalty) => LassoFamily::new(penalty.clone()),
            None => LassoFamily::default(),
        };
        match self.max_iter {
            Some(max_iter) => family.with_max_iter(max_iter),
            None => family,
        }
    }
}

impl ForestParams {
    fn family(&self) -> RandomForestFamily {
        let defaults = RandomForestFamily::default();
        RandomForestFamily::new(
            self.mtry.clone(),
            self.trees.clone().unwrap_or_else(|| defaults.trees().clone()),
            self.min_n.clone().unwrap_or_else(|| defaults.min_n().clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Scale;
    use crate::preprocess::Encoding;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "data_path = \"data/ames.csv\"\ntarget = \"Sale_Price\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.target, "Sale_Price");
        assert_eq!(config.seed, 42);
        assert_eq!(config.train_fraction, 0.75);
        assert_eq!(config.cv.folds, 10);
        assert_eq!(config.cv.metric, Metric::Rmse);
        assert_eq!(config.stratify_column(), "Sale_Price");
        assert_eq!(config.null_values, vec!["NA".to_string(), String::new()]);

        let names: Vec<&str> = config.models.families().unwrap().iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["null", "tree", "lasso", "random_forest"]);
    }

    #[test]
    fn test_full_config() {
        let config: Config = toml::from_str(
            r#"
            data_path = "data/*.csv"
            target = "price"
            seed = 7
            train_fraction = 0.7
            output_dir = "reports"
            verbose = true

            [columns]
            drop = ["id"]
            encodings.zone = { kind = "nominal", reference = "A" }

            [cv]
            folds = 5
            repeats = 3
            stratify = "zone_B"
            metric = "mae"

            [models]
            families = ["null", "lasso", "tree"]
            lasso.penalty = { min = -4, max = 0, levels = 5, scale = "log10" }
            tree.tree_depth = [2, 4, 8]
            tree.min_split = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.output_dir, PathBuf::from("reports"));
        assert!(config.verbose);
        assert_eq!(config.cv.repeats, 3);
        assert_eq!(config.cv.metric, Metric::Mae);
        assert_eq!(config.stratify_column(), "zone_B");
        assert_eq!(config.columns.drop, vec!["id".to_string()]);
        assert_eq!(
            config.columns.encodings["zone"],
            Encoding::Nominal { reference: Some("A".to_string()) }
        );
        assert_eq!(
            config.models.lasso.penalty,
            Some(Levels::Range { min: -4.0, max: 0.0, levels: 5, scale: Scale::Log10 })
        );

        let families = config.models.families().unwrap();
        assert_eq!(families.len(), 3);
        let tree_grid = families[2].hyperparameter_space().unwrap();
        // 5 default cost-complexity levels by 3 configured depths
        assert_eq!(tree_grid.len(), 15);
    }

    #[test]
    fn test_unknown_family_is_rejected() {
        let models = ModelParams {
            families: vec!["svm".to_string()],
            ..Default::default()
        };
        assert!(matches!(models.families(), Err(ModelSelectionError::InvalidInput(_))));
    }

    #[test]
    fn test_missing_target_fails() {
        let result: std::result::Result<Config, _> = toml::from_str("data_path = \"a.csv\"");
        assert!(result.is_err());
    }
}
