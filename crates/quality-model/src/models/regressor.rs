use ndarray::{Array1, Array2};
use serde_json::Value;
use thiserror::Error;

use crate::config::ModelType;
use crate::error::Result;

/// Serialized state of a fitted backend.
#[derive(Debug, Clone, PartialEq)]
pub enum RegressorState {
    /// Stored inside the primary model file.
    Embedded(Value),
    /// Backend-native text written to a companion file next to the primary one.
    Native(String),
}

/// A backend rejected the state handed to `load_state`.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StateError(pub String);

/// Contract shared by every regression backend.
///
/// `fit` receives an already normalized matrix, `predict` returns raw
/// (unclipped) scores in row order.
pub trait Regressor: Send + Sync {
    fn model_type(&self) -> ModelType;

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()>;

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    fn is_fitted(&self) -> bool;

    fn save_state(&self) -> Result<RegressorState>;

    fn load_state(&mut self, state: RegressorState) -> std::result::Result<(), StateError>;

    /// Human readable name for logging.
    fn name(&self) -> &'static str {
        "regressor"
    }
}
