//! Train/test model: a normalizer and a regression backend behind one handle.
//!
//! A model starts untrained, becomes trained after exactly one successful
//! `train` call (or loaded through [`TrainTestModel::from_file`]) and from
//! then on predicts with the normalization parameters frozen at fit time.

use std::fmt;
use std::path::Path;

use ndarray::Array1;
use serde_json::Value;

use crate::config::{ModelConfig, ModelType};
use crate::data_handling::{Xs, Xys, Ys};
use crate::error::{ModelError, Result};
use crate::models::factory::build_regressor;
use crate::models::regressor::Regressor;
use crate::preprocessing::NormParams;
use crate::stats::EvaluationResult;
use crate::store;

/// Everything `train` learns about the data besides the regressor itself.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FittedState {
    pub feature_names: Vec<String>,
    pub norm_params: NormParams,
}

pub struct TrainTestModel {
    model_type: ModelType,
    config: ModelConfig,
    regressor: Box<dyn Regressor>,
    fitted: Option<FittedState>,
}

impl TrainTestModel {
    /// Configure an untrained model of `model_type` from a flat parameter object.
    pub fn new(model_type: ModelType, params: &Value) -> Result<Self> {
        let config = ModelConfig::from_params(model_type, params)?;
        let regressor = build_regressor(model_type, &config)?;
        Ok(TrainTestModel {
            model_type,
            config,
            regressor,
            fitted: None,
        })
    }

    pub fn nusvr(params: &Value) -> Result<Self> {
        Self::new(ModelType::Nusvr, params)
    }

    pub fn libsvm_nusvr(params: &Value) -> Result<Self> {
        Self::new(ModelType::LibsvmNusvr, params)
    }

    pub fn random_forest(params: &Value) -> Result<Self> {
        Self::new(ModelType::RandomForest, params)
    }

    pub(crate) fn from_parts(
        model_type: ModelType,
        config: ModelConfig,
        regressor: Box<dyn Regressor>,
        fitted: FittedState,
    ) -> Self {
        TrainTestModel {
            model_type,
            config,
            regressor,
            fitted: Some(fitted),
        }
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.fitted.is_some()
    }

    /// Matrix column order, fixed at training time.
    pub fn feature_names(&self) -> Option<&[String]> {
        self.fitted.as_ref().map(|f| f.feature_names.as_slice())
    }

    pub fn norm_params(&self) -> Option<&NormParams> {
        self.fitted.as_ref().map(|f| &f.norm_params)
    }

    pub(crate) fn regressor(&self) -> &dyn Regressor {
        self.regressor.as_ref()
    }

    /// Fit the normalizer and the backend on every row of `xys`.
    ///
    /// A model trains once; a second call fails with `AlreadyTrained` and
    /// leaves the fitted state untouched.
    pub fn train(&mut self, xys: &Xys) -> Result<()> {
        if self.fitted.is_some() {
            return Err(ModelError::AlreadyTrained);
        }

        let feature_names = xys.xs.feature_names();
        if feature_names.is_empty() {
            return Err(ModelError::Training("no feature columns to train on".to_string()));
        }
        let x = xys.xs.to_matrix(&feature_names).map_err(|e| match e {
            ModelError::Schema(msg) => ModelError::Training(msg),
            other => other,
        })?;
        // checked on raw values: rescaling maps a constant inf column to 0
        if let Some(((row, col), v)) = x.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(ModelError::Training(format!(
                "non-finite feature value {} at row {}, column '{}'",
                v, row, feature_names[col]
            )));
        }

        log::info!(
            "training {} on {} rows x {} features (norm_type: {})",
            self.regressor.name(),
            x.nrows(),
            x.ncols(),
            self.config.norm_type
        );

        let norm_params = NormParams::fit(self.config.norm_type, &x);
        let x_norm = norm_params.transform(&x)?;
        self.regressor.fit(&x_norm, &xys.ys.label)?;

        self.fitted = Some(FittedState {
            feature_names,
            norm_params,
        });
        log::info!("{} training finished", self.regressor.name());
        Ok(())
    }

    /// One score per row of `xs`, clipped to `score_clip` when configured.
    pub fn predict(&self, xs: &Xs) -> Result<Array1<f64>> {
        let fitted = self.fitted.as_ref().ok_or(ModelError::NotTrained)?;
        let x = xs.to_matrix(&fitted.feature_names)?;
        let x_norm = fitted.norm_params.transform(&x)?;
        let mut scores = self.regressor.predict(&x_norm)?;
        if let Some((lo, hi)) = self.config.score_clip {
            scores.mapv_inplace(|v| v.clamp(lo, hi));
        }
        Ok(scores)
    }

    /// Predict `xs` and score the predictions against `ys.label`.
    pub fn evaluate(&self, xs: &Xs, ys: &Ys) -> Result<EvaluationResult> {
        let predicted = self.predict(xs)?;
        let result = EvaluationResult::compute(predicted.to_vec(), ys.label.to_vec())?;
        log::debug!("{} evaluation {}", self.regressor.name(), result.format_stats());
        Ok(result)
    }

    /// Persist the model at `path` (plus a companion file for backends that need one).
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        store::to_file(self, path.as_ref())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        store::from_file(path.as_ref())
    }

    /// Remove every artifact of the bundle at `path`. Missing files are not an error.
    pub fn delete<P: AsRef<Path>>(path: P) -> Result<()> {
        store::delete(path.as_ref())
    }
}

impl fmt::Debug for TrainTestModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrainTestModel")
            .field("model_type", &self.model_type)
            .field("config", &self.config)
            .field("trained", &self.is_trained())
            .finish()
    }
}
