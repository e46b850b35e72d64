//! Feature normalization.
//!
//! Parameters are fit once on the training matrix and then frozen: every
//! later predict/evaluate call applies the same `NormParams`, never a refit
//! on the data being predicted.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::config::NormType;
use crate::error::{ModelError, Result};

/// Fitted per-feature normalization parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "norm_type")]
pub enum NormParams {
    #[serde(rename = "none")]
    None,
    /// `(x - mu) / sd`. A zero standard deviation is stored as 1.
    #[serde(rename = "whiten")]
    Whiten { mus: Vec<f64>, sds: Vec<f64> },
    /// `(x - min) / (max - min)`.
    #[serde(rename = "rescale_0to1")]
    Rescale0To1 { mins: Vec<f64>, maxs: Vec<f64> },
    /// `2 (x - min) / (max - min) - 1`.
    #[serde(rename = "rescale_minus1to1")]
    RescaleMinus1To1 { mins: Vec<f64>, maxs: Vec<f64> },
}

impl NormParams {
    /// Fit parameters on `x` where rows are samples and columns features.
    pub fn fit(norm_type: NormType, x: &Array2<f64>) -> Self {
        match norm_type {
            NormType::None => NormParams::None,
            NormType::Whiten => {
                let mut mus = Vec::with_capacity(x.ncols());
                let mut sds = Vec::with_capacity(x.ncols());
                for (j, col) in x.columns().into_iter().enumerate() {
                    mus.push(col.iter().mean());
                    let sd = col.iter().population_std_dev();
                    if sd == 0.0 {
                        log::warn!("feature column {} has zero variance; leaving it unscaled", j);
                        sds.push(1.0);
                    } else {
                        sds.push(sd);
                    }
                }
                NormParams::Whiten { mus, sds }
            }
            NormType::Rescale0To1 | NormType::RescaleMinus1To1 => {
                let mins: Vec<f64> = x.columns().into_iter().map(|c| Statistics::min(c.iter())).collect();
                let maxs: Vec<f64> = x.columns().into_iter().map(|c| Statistics::max(c.iter())).collect();
                if norm_type == NormType::Rescale0To1 {
                    NormParams::Rescale0To1 { mins, maxs }
                } else {
                    NormParams::RescaleMinus1To1 { mins, maxs }
                }
            }
        }
    }

    pub fn norm_type(&self) -> NormType {
        match self {
            NormParams::None => NormType::None,
            NormParams::Whiten { .. } => NormType::Whiten,
            NormParams::Rescale0To1 { .. } => NormType::Rescale0To1,
            NormParams::RescaleMinus1To1 { .. } => NormType::RescaleMinus1To1,
        }
    }

    /// Number of features the parameters were fit on (`None` for identity).
    pub fn n_features(&self) -> Option<usize> {
        match self {
            NormParams::None => None,
            NormParams::Whiten { mus, .. } => Some(mus.len()),
            NormParams::Rescale0To1 { mins, .. } | NormParams::RescaleMinus1To1 { mins, .. } => {
                Some(mins.len())
            }
        }
    }

    /// Apply the frozen parameters to every row of `x`.
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if let Some(n) = self.n_features() {
            if n != x.ncols() {
                return Err(ModelError::Schema(format!(
                    "normalizer was fit on {} features, got {}",
                    n,
                    x.ncols()
                )));
            }
        }

        let mut out = x.to_owned();
        match self {
            NormParams::None => {}
            NormParams::Whiten { mus, sds } => {
                for (j, mut col) in out.columns_mut().into_iter().enumerate() {
                    let (mu, sd) = (mus[j], sds[j]);
                    col.mapv_inplace(|v| (v - mu) / sd);
                }
            }
            NormParams::Rescale0To1 { mins, maxs } => {
                for (j, mut col) in out.columns_mut().into_iter().enumerate() {
                    let (lo, hi) = (mins[j], maxs[j]);
                    col.mapv_inplace(|v| rescale_unit(v, lo, hi));
                }
            }
            NormParams::RescaleMinus1To1 { mins, maxs } => {
                for (j, mut col) in out.columns_mut().into_iter().enumerate() {
                    let (lo, hi) = (mins[j], maxs[j]);
                    if hi == lo {
                        col.fill(0.0);
                    } else {
                        col.mapv_inplace(|v| 2.0 * (v - lo) / (hi - lo) - 1.0);
                    }
                }
            }
        }
        Ok(out)
    }
}

// A constant training column maps to 0.
fn rescale_unit(v: f64, lo: f64, hi: f64) -> f64 {
    if hi == lo {
        0.0
    } else {
        (v - lo) / (hi - lo)
    }
}

/// Fit parameters and return them with the transformed matrix.
pub fn fit_transform(norm_type: NormType, x: &Array2<f64>) -> Result<(NormParams, Array2<f64>)> {
    let params = NormParams::fit(norm_type, x);
    let transformed = params.transform(x)?;
    Ok((params, transformed))
}
