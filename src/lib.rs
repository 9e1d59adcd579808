pub mod config;
pub mod data_loader;
pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod grid;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod preprocess;
pub mod report;
pub mod split;
pub mod tuner;

pub use config::Config;
pub use data_loader::DataLoader;
pub use dataset::Dataset;
pub use error::{ModelSelectionError, Result};
pub use evaluator::{compare_families, evaluate, Evaluation, Promotion};
pub use grid::{Grid, Hyperparameters, Levels};
pub use metrics::Metric;
pub use models::{FittedModel, ModelFamily};
pub use preprocess::{ColumnPolicy, Encoding, Preprocessor};
pub use report::Report;
pub use split::{make_folds, split, FoldAssignment, Split};
pub use tuner::{tune, TuneOptions, TuningResult};

pub type BoxError = Box<dyn std::error::Error>;
