use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the train/test model layer.
///
/// Every variant is raised synchronously by the call that detects it;
/// nothing is retried.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Missing or malformed table column, or an out-of-range row index.
    #[error("schema error: {0}")]
    Schema(String),

    /// Unrecognized, missing or invalid hyper-parameter.
    #[error("config error: {0}")]
    Config(String),

    /// Non-finite inputs, dimension mismatch or solver failure.
    #[error("training error: {0}")]
    Training(String),

    #[error("model has not been trained or loaded")]
    NotTrained,

    #[error("model has already been trained")]
    AlreadyTrained,

    /// Persisted state that is missing, unparsable or incomplete.
    #[error("corrupt model at {}: {reason}", path.display())]
    CorruptModel { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ModelError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ModelError::CorruptModel {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = ModelError> = std::result::Result<T, E>;
