use polars::error::PolarsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelSelectionError {
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
    #[error("Invalid fold count: {0}")]
    InvalidFoldCount(String),
    #[error("Invalid hyperparameter `{name}`: {reason}")]
    InvalidHyperparameter { name: String, reason: String },
    #[error("Schema mismatch: model was fitted on {expected:?}, got {found:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("Invalid input error: {0}")]
    InvalidInput(String),
    #[error("{family} failed at [{params}] (repeat {repeat}, fold {fold}): {source}")]
    Evaluation {
        family: String,
        params: String,
        repeat: usize,
        fold: usize,
        #[source]
        source: Box<ModelSelectionError>,
    },
    #[error("Data loading error: {0}")]
    DataLoading(#[from] PolarsError),
    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModelSelectionError {
    pub fn invalid_hyperparameter(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidHyperparameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// The innermost error, skipping `Evaluation` context wrappers.
    pub fn root_cause(&self) -> &ModelSelectionError {
        match self {
            Self::Evaluation { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelSelectionError>;
