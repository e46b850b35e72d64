//! Model store: one logical bundle per trained model.
//!
//! The primary file is JSON holding the model type, the resolved parameters,
//! the feature order, the frozen normalization parameters and, for backends
//! that keep it inline, the fitted regressor. LIBSVMNUSVR additionally owns
//! a companion file at `<path>.model` with the libsvm text model.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ModelConfig, ModelType};
use crate::error::{ModelError, Result};
use crate::models::factory::build_regressor;
use crate::models::regressor::RegressorState;
use crate::preprocessing::NormParams;
use crate::train_test_model::{FittedState, TrainTestModel};

pub const FORMAT_VERSION: u32 = 1;
pub const COMPANION_SUFFIX: &str = ".model";

#[derive(Serialize, Deserialize, Debug)]
struct ModelBundle {
    format_version: u32,
    model_type: ModelType,
    params: Value,
    feature_names: Vec<String>,
    norm_params: NormParams,
    regressor: Option<Value>,
}

/// Companion file of the bundle at `path`, for backends that have one.
pub fn companion_path(model_type: ModelType, path: &Path) -> Option<PathBuf> {
    match model_type {
        ModelType::LibsvmNusvr => Some(with_suffix(path, COMPANION_SUFFIX)),
        ModelType::Nusvr | ModelType::RandomForest => None,
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

pub fn to_file(model: &TrainTestModel, path: &Path) -> Result<()> {
    let (feature_names, norm_params) = match (model.feature_names(), model.norm_params()) {
        (Some(names), Some(params)) => (names.to_vec(), params.clone()),
        _ => return Err(ModelError::NotTrained),
    };

    let regressor = match model.regressor().save_state()? {
        RegressorState::Embedded(value) => {
            // a bundle previously saved here by another backend may have left one
            remove_if_exists(&with_suffix(path, COMPANION_SUFFIX))?;
            Some(value)
        }
        RegressorState::Native(text) => {
            let companion = companion_path(model.model_type(), path).ok_or_else(|| {
                ModelError::Training(format!("{} has no companion file", model.model_type()))
            })?;
            fs::write(&companion, text)?;
            None
        }
    };

    let bundle = ModelBundle {
        format_version: FORMAT_VERSION,
        model_type: model.model_type(),
        params: model.config().to_params(),
        feature_names,
        norm_params,
        regressor,
    };
    let json = serde_json::to_string_pretty(&bundle).map_err(io::Error::from)?;
    fs::write(path, json)?;
    log::info!("saved {} model to {}", model.model_type(), path.display());
    Ok(())
}

pub fn from_file(path: &Path) -> Result<TrainTestModel> {
    let text = fs::read_to_string(path).map_err(|e| ModelError::corrupt(path, e))?;
    let bundle: ModelBundle = serde_json::from_str(&text).map_err(|e| ModelError::corrupt(path, e))?;
    if bundle.format_version != FORMAT_VERSION {
        return Err(ModelError::corrupt(
            path,
            format!("unsupported format_version {}", bundle.format_version),
        ));
    }

    let model_type = bundle.model_type;
    let config = ModelConfig::from_params(model_type, &bundle.params).map_err(|e| ModelError::corrupt(path, e))?;
    if bundle.norm_params.norm_type() != config.norm_type {
        return Err(ModelError::corrupt(
            path,
            format!(
                "norm_type {} does not match stored parameters ({})",
                config.norm_type,
                bundle.norm_params.norm_type()
            ),
        ));
    }
    if let Some(n) = bundle.norm_params.n_features() {
        if n != bundle.feature_names.len() {
            return Err(ModelError::corrupt(
                path,
                format!("{} normalization columns for {} features", n, bundle.feature_names.len()),
            ));
        }
    }

    let state = match companion_path(model_type, path) {
        Some(companion) => {
            let native = fs::read_to_string(&companion)
                .map_err(|e| ModelError::corrupt(&companion, format!("companion file: {}", e)))?;
            RegressorState::Native(native)
        }
        None => RegressorState::Embedded(
            bundle
                .regressor
                .ok_or_else(|| ModelError::corrupt(path, "missing regressor state"))?,
        ),
    };

    let mut regressor = build_regressor(model_type, &config).map_err(|e| ModelError::corrupt(path, e))?;
    regressor
        .load_state(state)
        .map_err(|e| ModelError::corrupt(path, e))?;

    log::info!("loaded {} model from {}", model_type, path.display());
    Ok(TrainTestModel::from_parts(
        model_type,
        config,
        regressor,
        FittedState {
            feature_names: bundle.feature_names,
            norm_params: bundle.norm_params,
        },
    ))
}

/// Remove the bundle at `path` and any companion file next to it, whatever
/// backend wrote them. Files that are already gone are skipped.
pub fn delete(path: &Path) -> Result<()> {
    remove_if_exists(path)?;
    remove_if_exists(&with_suffix(path, COMPANION_SUFFIX))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
