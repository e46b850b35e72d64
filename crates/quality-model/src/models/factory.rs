use crate::config::{BackendParams, ModelConfig, ModelType};
use crate::error::{ModelError, Result};
use crate::models::libsvm::LibsvmNusvrRegressor;
use crate::models::nusvr::NusvrRegressor;
use crate::models::random_forest::RandomForestRegressor;
use crate::models::regressor::Regressor;

/// Build an unfitted backend for `model_type` from its resolved configuration.
pub fn build_regressor(model_type: ModelType, config: &ModelConfig) -> Result<Box<dyn Regressor>> {
    match (model_type, &config.backend) {
        (ModelType::Nusvr, BackendParams::Svr(params)) => Ok(Box::new(NusvrRegressor::new(params.clone()))),
        (ModelType::LibsvmNusvr, BackendParams::Svr(params)) => {
            Ok(Box::new(LibsvmNusvrRegressor::new(params.clone())))
        }
        (ModelType::RandomForest, BackendParams::Forest(params)) => {
            Ok(Box::new(RandomForestRegressor::new(params.clone())))
        }
        (model_type, backend) => Err(ModelError::Config(format!(
            "{} cannot be built from {:?}",
            model_type, backend
        ))),
    }
}
