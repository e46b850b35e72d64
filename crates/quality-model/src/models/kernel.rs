//! Kernel functions over dense rows and sparse `index:value` nodes.
//!
//! The dense and sparse evaluators accumulate in ascending feature order and
//! treat absent sparse entries as exact zeros, so both produce bit-identical
//! values for the same sample.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::config::{KernelType, SvrParams};

/// One non-zero feature of a sparse sample. `index` is 1-based.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SvmNode {
    pub index: u32,
    pub value: f64,
}

/// Sparse nodes for the non-zero entries of a dense row.
pub fn dense_to_nodes(row: ArrayView1<f64>) -> Vec<SvmNode> {
    row.iter()
        .enumerate()
        .filter(|&(_, &v)| v != 0.0)
        .map(|(i, &v)| SvmNode {
            index: i as u32 + 1,
            value: v,
        })
        .collect()
}

/// A kernel with its parameters resolved for a fixed feature count.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Kernel {
    pub kind: KernelType,
    pub gamma: f64,
    pub degree: u32,
    pub coef0: f64,
}

impl Kernel {
    /// A `gamma` of zero resolves to `1 / n_features`.
    pub fn resolve(params: &SvrParams, n_features: usize) -> Self {
        let gamma = if params.gamma == 0.0 && n_features > 0 {
            1.0 / n_features as f64
        } else {
            params.gamma
        };
        Self {
            kind: params.kernel,
            gamma,
            degree: params.degree,
            coef0: params.coef0,
        }
    }

    pub fn eval_dense(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self.kind {
            KernelType::Rbf => {
                let mut sum = 0.0;
                for (x, y) in a.iter().zip(b.iter()) {
                    let d = x - y;
                    sum += d * d;
                }
                (-self.gamma * sum).exp()
            }
            _ => {
                let mut dot = 0.0;
                for (x, y) in a.iter().zip(b.iter()) {
                    dot += x * y;
                }
                self.finish_dot(dot)
            }
        }
    }

    pub fn eval_sparse(&self, a: &[SvmNode], b: &[SvmNode]) -> f64 {
        match self.kind {
            KernelType::Rbf => (-self.gamma * sparse_sq_dist(a, b)).exp(),
            _ => self.finish_dot(sparse_dot(a, b)),
        }
    }

    fn finish_dot(&self, dot: f64) -> f64 {
        match self.kind {
            KernelType::Linear => dot,
            KernelType::Poly => (self.gamma * dot + self.coef0).powi(self.degree as i32),
            KernelType::Sigmoid => (self.gamma * dot + self.coef0).tanh(),
            KernelType::Rbf => unreachable!("rbf is evaluated from the squared distance"),
        }
    }
}

fn sparse_dot(a: &[SvmNode], b: &[SvmNode]) -> f64 {
    let (mut i, mut j) = (0, 0);
    let mut sum = 0.0;
    while i < a.len() && j < b.len() {
        if a[i].index == b[j].index {
            sum += a[i].value * b[j].value;
            i += 1;
            j += 1;
        } else if a[i].index < b[j].index {
            i += 1;
        } else {
            j += 1;
        }
    }
    sum
}

fn sparse_sq_dist(a: &[SvmNode], b: &[SvmNode]) -> f64 {
    let (mut i, mut j) = (0, 0);
    let mut sum = 0.0;
    while i < a.len() && j < b.len() {
        if a[i].index == b[j].index {
            let d = a[i].value - b[j].value;
            sum += d * d;
            i += 1;
            j += 1;
        } else if a[i].index < b[j].index {
            sum += a[i].value * a[i].value;
            i += 1;
        } else {
            sum += b[j].value * b[j].value;
            j += 1;
        }
    }
    for node in a[i..].iter().chain(&b[j..]) {
        sum += node.value * node.value;
    }
    sum
}
