use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ModelError, Result};

/// Backend type tag. The tag is what the model store persists and what the
/// factory dispatches on.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelType {
    #[serde(rename = "NUSVR")]
    Nusvr,
    #[serde(rename = "LIBSVMNUSVR")]
    LibsvmNusvr,
    #[serde(rename = "RANDOMFOREST")]
    RandomForest,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Nusvr => "NUSVR",
            ModelType::LibsvmNusvr => "LIBSVMNUSVR",
            ModelType::RandomForest => "RANDOMFOREST",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nusvr" => Ok(ModelType::Nusvr),
            "libsvmnusvr" => Ok(ModelType::LibsvmNusvr),
            "randomforest" | "random_forest" => Ok(ModelType::RandomForest),
            _ => Err(format!(
                "Unknown model type: {}. Valid options are: NUSVR, LIBSVMNUSVR, RANDOMFOREST",
                s
            )),
        }
    }
}

/// Column-wise feature normalization, fit once on the training rows.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormType {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "whiten")]
    Whiten,
    #[serde(rename = "rescale_0to1")]
    Rescale0To1,
    #[serde(rename = "rescale_minus1to1")]
    RescaleMinus1To1,
}

impl NormType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormType::None => "none",
            NormType::Whiten => "whiten",
            NormType::Rescale0To1 => "rescale_0to1",
            NormType::RescaleMinus1To1 => "rescale_minus1to1",
        }
    }

    pub const ALL: [NormType; 4] = [
        NormType::Whiten,
        NormType::Rescale0To1,
        NormType::RescaleMinus1To1,
        NormType::None,
    ];
}

impl fmt::Display for NormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NormType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(NormType::None),
            "whiten" => Ok(NormType::Whiten),
            "rescale_0to1" => Ok(NormType::Rescale0To1),
            "rescale_minus1to1" => Ok(NormType::RescaleMinus1To1),
            _ => Err(format!(
                "Unknown norm_type: {}. Valid options are: none, whiten, rescale_0to1, rescale_minus1to1",
                s
            )),
        }
    }
}

/// Kernel functions understood by the SVR backends.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KernelType {
    Linear,
    Poly,
    #[default]
    Rbf,
    Sigmoid,
}

impl KernelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelType::Linear => "linear",
            KernelType::Poly => "polynomial",
            KernelType::Rbf => "rbf",
            KernelType::Sigmoid => "sigmoid",
        }
    }
}

fn default_c() -> f64 {
    1.0
}

fn default_nu() -> f64 {
    0.5
}

fn default_degree() -> u32 {
    3
}

fn default_cache_size() -> f64 {
    200.0
}

fn default_eps() -> f64 {
    1e-3
}

fn default_n_estimators() -> usize {
    10
}

fn default_min_samples_split() -> usize {
    2
}

fn default_min_samples_leaf() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// Hyper-parameters shared by the NUSVR and LIBSVMNUSVR backends.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SvrParams {
    #[serde(default)]
    pub kernel: KernelType,
    /// Kernel coefficient; `0.0` resolves to `1 / n_features` at fit time.
    #[serde(default)]
    pub gamma: f64,
    #[serde(rename = "C", default = "default_c")]
    pub c: f64,
    #[serde(default = "default_nu")]
    pub nu: f64,
    #[serde(default = "default_degree")]
    pub degree: u32,
    #[serde(default)]
    pub coef0: f64,
    /// Kernel row cache budget in MB.
    #[serde(default = "default_cache_size")]
    pub cache_size: f64,
    /// Stopping tolerance of the solver.
    #[serde(default = "default_eps")]
    pub eps: f64,
}

impl Default for SvrParams {
    fn default() -> Self {
        Self {
            kernel: KernelType::Rbf,
            gamma: 0.0,
            c: default_c(),
            nu: default_nu(),
            degree: default_degree(),
            coef0: 0.0,
            cache_size: default_cache_size(),
            eps: default_eps(),
        }
    }
}

impl SvrParams {
    fn validate(&self) -> Result<()> {
        if !(self.nu > 0.0 && self.nu <= 1.0) {
            return Err(ModelError::Config(format!("nu must be in (0, 1], got {}", self.nu)));
        }
        if !(self.c > 0.0) || !self.c.is_finite() {
            return Err(ModelError::Config(format!("C must be positive, got {}", self.c)));
        }
        if !(self.gamma >= 0.0) || !self.gamma.is_finite() {
            return Err(ModelError::Config(format!("gamma must be >= 0, got {}", self.gamma)));
        }
        if !(self.cache_size > 0.0) {
            return Err(ModelError::Config(format!(
                "cache_size must be positive, got {}",
                self.cache_size
            )));
        }
        if !(self.eps > 0.0) {
            return Err(ModelError::Config(format!("eps must be positive, got {}", self.eps)));
        }
        if !self.coef0.is_finite() {
            return Err(ModelError::Config("coef0 must be finite".to_string()));
        }
        Ok(())
    }
}

/// Hyper-parameters of the RANDOMFOREST backend.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ForestParams {
    /// Seed for bootstrap and feature sampling. `None` draws a seed from the OS.
    #[serde(default)]
    pub random_state: Option<u64>,
    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default = "default_min_samples_split")]
    pub min_samples_split: usize,
    #[serde(default = "default_min_samples_leaf")]
    pub min_samples_leaf: usize,
    /// Features tried per split; `None` tries all of them.
    #[serde(default)]
    pub max_features: Option<usize>,
    #[serde(default = "default_true")]
    pub bootstrap: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            random_state: None,
            n_estimators: default_n_estimators(),
            max_depth: None,
            min_samples_split: default_min_samples_split(),
            min_samples_leaf: default_min_samples_leaf(),
            max_features: None,
            bootstrap: true,
        }
    }
}

impl ForestParams {
    fn validate(&self) -> Result<()> {
        if self.n_estimators == 0 {
            return Err(ModelError::Config("n_estimators must be at least 1".to_string()));
        }
        if self.min_samples_split < 2 {
            return Err(ModelError::Config(format!(
                "min_samples_split must be at least 2, got {}",
                self.min_samples_split
            )));
        }
        if self.min_samples_leaf == 0 {
            return Err(ModelError::Config("min_samples_leaf must be at least 1".to_string()));
        }
        if self.max_features == Some(0) {
            return Err(ModelError::Config("max_features must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Backend-specific part of a [`ModelConfig`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendParams {
    Svr(SvrParams),
    Forest(ForestParams),
}

/// Central configuration of a train/test model.
///
/// Built from a flat JSON object such as `{"norm_type": "whiten", "C": 4.0}`.
/// `norm_type` is required, `score_clip` is optional, every other key must
/// be one the backend recognises.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub norm_type: NormType,
    pub score_clip: Option<(f64, f64)>,
    pub backend: BackendParams,
}

impl ModelConfig {
    pub fn from_params(model_type: ModelType, params: &Value) -> Result<Self> {
        let mut map: Map<String, Value> = params
            .as_object()
            .cloned()
            .ok_or_else(|| ModelError::Config("model parameters must be a JSON object".to_string()))?;

        let norm_type = map
            .remove("norm_type")
            .ok_or_else(|| ModelError::Config("missing required key 'norm_type'".to_string()))?;
        let norm_type: NormType = serde_json::from_value(norm_type)
            .map_err(|e| ModelError::Config(format!("norm_type: {}", e)))?;

        let score_clip = match map.remove("score_clip") {
            None | Some(Value::Null) => None,
            Some(v) => {
                let (lo, hi): (f64, f64) = serde_json::from_value(v)
                    .map_err(|e| ModelError::Config(format!("score_clip: {}", e)))?;
                if !(lo <= hi) {
                    return Err(ModelError::Config(format!(
                        "score_clip lower bound {} exceeds upper bound {}",
                        lo, hi
                    )));
                }
                Some((lo, hi))
            }
        };

        let rest = Value::Object(map);
        let backend = match model_type {
            ModelType::Nusvr | ModelType::LibsvmNusvr => {
                let svr: SvrParams = serde_json::from_value(rest)
                    .map_err(|e| ModelError::Config(format!("{}: {}", model_type, e)))?;
                svr.validate()?;
                BackendParams::Svr(svr)
            }
            ModelType::RandomForest => {
                let forest: ForestParams = serde_json::from_value(rest)
                    .map_err(|e| ModelError::Config(format!("{}: {}", model_type, e)))?;
                forest.validate()?;
                BackendParams::Forest(forest)
            }
        };

        Ok(Self {
            norm_type,
            score_clip,
            backend,
        })
    }

    /// Fully-resolved flat parameter object, defaults included.
    pub fn to_params(&self) -> Value {
        let backend = match &self.backend {
            BackendParams::Svr(p) => serde_json::to_value(p),
            BackendParams::Forest(p) => serde_json::to_value(p),
        };
        let mut map = match backend {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        map.insert("norm_type".to_string(), Value::from(self.norm_type.as_str()));
        if let Some((lo, hi)) = self.score_clip {
            map.insert("score_clip".to_string(), Value::from(vec![lo, hi]));
        }
        Value::Object(map)
    }

    pub fn svr(&self) -> Option<&SvrParams> {
        match &self.backend {
            BackendParams::Svr(p) => Some(p),
            BackendParams::Forest(_) => None,
        }
    }

    pub fn forest(&self) -> Option<&ForestParams> {
        match &self.backend {
            BackendParams::Forest(p) => Some(p),
            BackendParams::Svr(_) => None,
        }
    }
}
