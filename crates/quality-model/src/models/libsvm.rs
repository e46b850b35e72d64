//! nu-SVR persisted in the libsvm plain-text model format.
//!
//! Coefficients, `rho` and kernel parameters are written with 17 significant
//! digits, support vector values with 8 and zero-valued features are
//! omitted. A reloaded model therefore predicts slightly differently from
//! the one that was saved, and repeated save/load cycles of the same fitted
//! model always produce the same reloaded predictions.

use std::fmt::Write as _;

use ndarray::{Array1, Array2};

use crate::config::{KernelType, ModelType, SvrParams};
use crate::error::{ModelError, Result};
use crate::models::kernel::{dense_to_nodes, Kernel, SvmNode};
use crate::models::regressor::{Regressor, RegressorState, StateError};
use crate::models::solver::{solve_nu_svr, NuSvrProblem, SparseSamples};
use crate::models::utils::validate_training_data;

/// Fitted sparse nu-SVR in the shape the libsvm text format describes.
#[derive(Debug, Clone, PartialEq)]
pub struct LibsvmModel {
    pub kernel: Kernel,
    pub rho: f64,
    pub sv_coef: Vec<f64>,
    pub sv: Vec<Vec<SvmNode>>,
}

impl LibsvmModel {
    pub fn decision(&self, x: &[SvmNode]) -> f64 {
        let mut sum = 0.0;
        for (sv, coef) in self.sv.iter().zip(&self.sv_coef) {
            sum += coef * self.kernel.eval_sparse(sv, x);
        }
        sum - self.rho
    }

    pub fn to_text(&self) -> String {
        let k = &self.kernel;
        let mut out = String::new();
        out.push_str("svm_type nu_svr\n");
        let _ = writeln!(out, "kernel_type {}", k.kind.as_str());
        if k.kind == KernelType::Poly {
            let _ = writeln!(out, "degree {}", k.degree);
        }
        if k.kind != KernelType::Linear {
            let _ = writeln!(out, "gamma {}", format_g(k.gamma, 17));
        }
        if matches!(k.kind, KernelType::Poly | KernelType::Sigmoid) {
            let _ = writeln!(out, "coef0 {}", format_g(k.coef0, 17));
        }
        out.push_str("nr_class 2\n");
        let _ = writeln!(out, "total_sv {}", self.sv.len());
        let _ = writeln!(out, "rho {}", format_g(self.rho, 17));
        out.push_str("SV\n");
        for (coef, nodes) in self.sv_coef.iter().zip(&self.sv) {
            let _ = write!(out, "{} ", format_g(*coef, 17));
            for node in nodes {
                let _ = write!(out, "{}:{} ", node.index, format_g(node.value, 8));
            }
            out.push('\n');
        }
        out
    }

    pub fn parse(text: &str) -> std::result::Result<Self, StateError> {
        let mut lines = text.lines();
        let mut kind = None;
        let mut degree = 3;
        let mut gamma = 0.0;
        let mut coef0 = 0.0;
        let mut total_sv = None;
        let mut rho = None;

        loop {
            let line = lines
                .next()
                .ok_or_else(|| StateError("libsvm model ended before the SV section".to_string()))?;
            let mut parts = line.split_whitespace();
            let Some(key) = parts.next() else {
                continue;
            };
            if key == "SV" {
                break;
            }
            let value = parts.next().unwrap_or_default();
            match key {
                "svm_type" if value != "nu_svr" => {
                    return Err(StateError(format!("unsupported svm_type '{}'", value)))
                }
                "svm_type" | "nr_class" | "label" | "nr_sv" | "probA" | "probB" => {}
                "kernel_type" => kind = Some(kernel_from_libsvm_name(value)?),
                "degree" => degree = parse_number(key, value)?,
                "gamma" => gamma = parse_number(key, value)?,
                "coef0" => coef0 = parse_number(key, value)?,
                "total_sv" => total_sv = Some(parse_number::<usize>(key, value)?),
                "rho" => rho = Some(parse_number(key, value)?),
                other => return Err(StateError(format!("unknown libsvm header '{}'", other))),
            }
        }

        let kind = kind.ok_or_else(|| StateError("missing kernel_type".to_string()))?;
        let total_sv = total_sv.ok_or_else(|| StateError("missing total_sv".to_string()))?;
        let rho = rho.ok_or_else(|| StateError("missing rho".to_string()))?;

        let mut sv_coef = Vec::with_capacity(total_sv);
        let mut sv = Vec::with_capacity(total_sv);
        for line in lines.filter(|l| !l.trim().is_empty()) {
            let mut parts = line.split_whitespace();
            let coef = parts
                .next()
                .ok_or_else(|| StateError("empty support vector line".to_string()))?;
            sv_coef.push(parse_number("sv_coef", coef)?);
            let mut nodes = Vec::new();
            for token in parts {
                let (index, value) = token
                    .split_once(':')
                    .ok_or_else(|| StateError(format!("malformed node '{}'", token)))?;
                nodes.push(SvmNode {
                    index: parse_number("index", index)?,
                    value: parse_number("value", value)?,
                });
            }
            sv.push(nodes);
        }
        if sv.len() != total_sv {
            return Err(StateError(format!(
                "header declares {} support vectors, found {}",
                total_sv,
                sv.len()
            )));
        }

        Ok(LibsvmModel {
            kernel: Kernel {
                kind,
                gamma,
                degree,
                coef0,
            },
            rho,
            sv_coef,
            sv,
        })
    }
}

fn kernel_from_libsvm_name(name: &str) -> std::result::Result<KernelType, StateError> {
    match name {
        "linear" => Ok(KernelType::Linear),
        "polynomial" => Ok(KernelType::Poly),
        "rbf" => Ok(KernelType::Rbf),
        "sigmoid" => Ok(KernelType::Sigmoid),
        other => Err(StateError(format!("unsupported kernel_type '{}'", other))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> std::result::Result<T, StateError> {
    value
        .parse()
        .map_err(|_| StateError(format!("invalid value '{}' for {}", value, key)))
}

/// Format like C's `%.{precision}g`.
pub fn format_g(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let p = precision.max(1);
    let sci = format!("{:.*e}", p - 1, value);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    if exp < -4 || exp >= p as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
    } else {
        let fixed = format!("{:.*}", (p as i32 - 1 - exp) as usize, value);
        trim_fraction(&fixed).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// nu-SVR over sparse `index:value` samples, persisted as libsvm text in a
/// companion file.
pub struct LibsvmNusvrRegressor {
    params: SvrParams,
    model: Option<LibsvmModel>,
}

impl LibsvmNusvrRegressor {
    pub fn new(params: SvrParams) -> Self {
        LibsvmNusvrRegressor { params, model: None }
    }

    pub fn model(&self) -> Option<&LibsvmModel> {
        self.model.as_ref()
    }
}

impl Regressor for LibsvmNusvrRegressor {
    fn model_type(&self) -> ModelType {
        ModelType::LibsvmNusvr
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        validate_training_data(x, y)?;
        let rows: Vec<Vec<SvmNode>> = x.outer_iter().map(dense_to_nodes).collect();
        let kernel = Kernel::resolve(&self.params, x.ncols());
        let samples = SparseSamples { rows: &rows, kernel };
        let targets = y.to_vec();
        let solution = solve_nu_svr(
            &samples,
            &targets,
            &NuSvrProblem {
                nu: self.params.nu,
                c: self.params.c,
                eps: self.params.eps,
                cache_size: self.params.cache_size,
            },
        )?;

        let sv = solution.support.iter().map(|&i| rows[i].clone()).collect();
        self.model = Some(LibsvmModel {
            kernel,
            rho: solution.rho,
            sv_coef: solution.coef,
            sv,
        });
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let model = self.model.as_ref().ok_or(ModelError::NotTrained)?;
        Ok(x.outer_iter().map(|row| model.decision(&dense_to_nodes(row))).collect())
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn save_state(&self) -> Result<RegressorState> {
        let model = self.model.as_ref().ok_or(ModelError::NotTrained)?;
        Ok(RegressorState::Native(model.to_text()))
    }

    fn load_state(&mut self, state: RegressorState) -> std::result::Result<(), StateError> {
        match state {
            RegressorState::Native(text) => {
                self.model = Some(LibsvmModel::parse(&text)?);
                Ok(())
            }
            RegressorState::Embedded(_) => Err(StateError(
                "LIBSVMNUSVR state must be read from its companion file".to_string(),
            )),
        }
    }

    fn name(&self) -> &'static str {
        "libsvm nu-SVR"
    }
}
