//! SMO solver for the nu-SVR dual problem.
//!
//! The regression problem over `l` samples is rewritten as a `2l` variable
//! quadratic program (one block of variables per side of the tube). Working
//! pairs are chosen with second-order information, restricted to pairs that
//! share a label so both equality constraints of the nu formulation hold.
//! Kernel rows are computed on demand and kept in an LRU cache.

use std::collections::VecDeque;
use std::rc::Rc;

use ndarray::ArrayView2;

use crate::error::{ModelError, Result};
use crate::models::kernel::{Kernel, SvmNode};

const TAU: f64 = 1e-12;

/// Pairwise kernel values over a fixed set of training samples.
pub trait KernelSource {
    fn n_samples(&self) -> usize;
    fn eval(&self, i: usize, j: usize) -> f64;
}

/// Samples stored as the rows of a dense matrix.
pub struct DenseSamples<'a> {
    pub x: ArrayView2<'a, f64>,
    pub kernel: Kernel,
}

impl KernelSource for DenseSamples<'_> {
    fn n_samples(&self) -> usize {
        self.x.nrows()
    }

    fn eval(&self, i: usize, j: usize) -> f64 {
        self.kernel.eval_dense(self.x.row(i), self.x.row(j))
    }
}

/// Samples stored as sparse node lists.
pub struct SparseSamples<'a> {
    pub rows: &'a [Vec<SvmNode>],
    pub kernel: Kernel,
}

impl KernelSource for SparseSamples<'_> {
    fn n_samples(&self) -> usize {
        self.rows.len()
    }

    fn eval(&self, i: usize, j: usize) -> f64 {
        self.kernel.eval_sparse(&self.rows[i], &self.rows[j])
    }
}

/// Parameters of one nu-SVR solve.
#[derive(Debug, Clone, Copy)]
pub struct NuSvrProblem {
    pub nu: f64,
    pub c: f64,
    pub eps: f64,
    /// Kernel cache budget in MB.
    pub cache_size: f64,
}

/// Outcome of a solve. Only samples with a non-zero coefficient are
/// support vectors.
#[derive(Debug, Clone)]
pub struct NuSvrSolution {
    /// Indices (into the training samples) of the support vectors.
    pub support: Vec<usize>,
    /// Dual coefficient of each support vector, aligned with `support`.
    pub coef: Vec<f64>,
    pub rho: f64,
    /// Width of the tube found by the solver.
    pub epsilon: f64,
    pub obj: f64,
    pub iterations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Lower,
    Upper,
    Free,
}

/// LRU cache of kernel rows.
struct KernelCache<'a, K: KernelSource> {
    source: &'a K,
    rows: Vec<Option<Rc<[f64]>>>,
    order: VecDeque<usize>,
    capacity: usize,
}

impl<'a, K: KernelSource> KernelCache<'a, K> {
    fn new(source: &'a K, cache_size_mb: f64) -> Self {
        let l = source.n_samples();
        let row_bytes = (l.max(1) * std::mem::size_of::<f64>()) as f64;
        let capacity = ((cache_size_mb * 1024.0 * 1024.0) / row_bytes).floor() as usize;
        Self {
            source,
            rows: vec![None; l],
            order: VecDeque::new(),
            capacity: capacity.max(2),
        }
    }

    fn row(&mut self, i: usize) -> Rc<[f64]> {
        if let Some(row) = &self.rows[i] {
            let row = Rc::clone(row);
            if let Some(pos) = self.order.iter().position(|&k| k == i) {
                self.order.remove(pos);
            }
            self.order.push_back(i);
            return row;
        }

        if self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.rows[evicted] = None;
            }
        }
        let l = self.source.n_samples();
        let row: Rc<[f64]> = (0..l).map(|j| self.source.eval(i, j)).collect();
        self.rows[i] = Some(Rc::clone(&row));
        self.order.push_back(i);
        row
    }
}

struct NuSolver<'a, K: KernelSource> {
    l: usize,
    /// +1 for the first `l` variables, -1 for the mirrored block.
    y: Vec<f64>,
    p: Vec<f64>,
    alpha: Vec<f64>,
    status: Vec<Bound>,
    grad: Vec<f64>,
    qd: Vec<f64>,
    c: f64,
    eps: f64,
    cache: KernelCache<'a, K>,
}

impl<'a, K: KernelSource> NuSolver<'a, K> {
    fn len(&self) -> usize {
        2 * self.l
    }

    /// Row `i` of the signed `2l x 2l` matrix `Q_ij = y_i y_j K(i mod l, j mod l)`.
    fn q_row(&mut self, i: usize) -> Vec<f64> {
        let l = self.l;
        let k = self.cache.row(i % l);
        let yi = self.y[i];
        (0..2 * l).map(|j| yi * self.y[j] * k[j % l]).collect()
    }

    fn update_status(&mut self, i: usize) {
        self.status[i] = if self.alpha[i] >= self.c {
            Bound::Upper
        } else if self.alpha[i] <= 0.0 {
            Bound::Lower
        } else {
            Bound::Free
        };
    }

    fn is_upper(&self, i: usize) -> bool {
        self.status[i] == Bound::Upper
    }

    fn is_lower(&self, i: usize) -> bool {
        self.status[i] == Bound::Lower
    }

    /// Second-order working set selection for nu problems.
    /// Returns `None` once the KKT violation drops below `eps`.
    fn select_working_set(&mut self) -> Option<(usize, usize)> {
        let n = self.len();
        let mut gmaxp = f64::NEG_INFINITY;
        let mut gmaxp2 = f64::NEG_INFINITY;
        let mut gmaxp_idx = None;
        let mut gmaxn = f64::NEG_INFINITY;
        let mut gmaxn2 = f64::NEG_INFINITY;
        let mut gmaxn_idx = None;
        let mut gmin_idx = None;
        let mut obj_diff_min = f64::INFINITY;

        for t in 0..n {
            if self.y[t] > 0.0 {
                if !self.is_upper(t) && -self.grad[t] >= gmaxp {
                    gmaxp = -self.grad[t];
                    gmaxp_idx = Some(t);
                }
            } else if !self.is_lower(t) && self.grad[t] >= gmaxn {
                gmaxn = self.grad[t];
                gmaxn_idx = Some(t);
            }
        }

        let q_ip = gmaxp_idx.map(|ip| self.q_row(ip));
        let q_in = gmaxn_idx.map(|i_n| self.q_row(i_n));

        for j in 0..n {
            if self.y[j] > 0.0 {
                if self.is_lower(j) {
                    continue;
                }
                let grad_diff = gmaxp + self.grad[j];
                if self.grad[j] >= gmaxp2 {
                    gmaxp2 = self.grad[j];
                }
                if grad_diff > 0.0 {
                    if let (Some(ip), Some(q)) = (gmaxp_idx, q_ip.as_ref()) {
                        let quad_coef = self.qd[ip] + self.qd[j] - 2.0 * q[j];
                        let obj_diff = -(grad_diff * grad_diff) / if quad_coef > 0.0 { quad_coef } else { TAU };
                        if obj_diff <= obj_diff_min {
                            gmin_idx = Some(j);
                            obj_diff_min = obj_diff;
                        }
                    }
                }
            } else {
                if self.is_upper(j) {
                    continue;
                }
                let grad_diff = gmaxn - self.grad[j];
                if -self.grad[j] >= gmaxn2 {
                    gmaxn2 = -self.grad[j];
                }
                if grad_diff > 0.0 {
                    if let (Some(i_n), Some(q)) = (gmaxn_idx, q_in.as_ref()) {
                        let quad_coef = self.qd[i_n] + self.qd[j] - 2.0 * q[j];
                        let obj_diff = -(grad_diff * grad_diff) / if quad_coef > 0.0 { quad_coef } else { TAU };
                        if obj_diff <= obj_diff_min {
                            gmin_idx = Some(j);
                            obj_diff_min = obj_diff;
                        }
                    }
                }
            }
        }

        if f64::max(gmaxp + gmaxp2, gmaxn + gmaxn2) < self.eps {
            return None;
        }
        let j = gmin_idx?;
        let i = if self.y[j] > 0.0 { gmaxp_idx? } else { gmaxn_idx? };
        Some((i, j))
    }

    /// Analytic update of the pair `(i, j)`; both share the same label.
    fn update_pair(&mut self, i: usize, j: usize) {
        let q_i = self.q_row(i);
        let q_j = self.q_row(j);
        let c = self.c;

        let old_ai = self.alpha[i];
        let old_aj = self.alpha[j];

        let mut quad_coef = self.qd[i] + self.qd[j] - 2.0 * q_i[j];
        if quad_coef <= 0.0 {
            quad_coef = TAU;
        }
        let delta = (self.grad[i] - self.grad[j]) / quad_coef;
        let sum = self.alpha[i] + self.alpha[j];
        self.alpha[i] -= delta;
        self.alpha[j] += delta;

        if sum > c {
            if self.alpha[i] > c {
                self.alpha[i] = c;
                self.alpha[j] = sum - c;
            }
        } else if self.alpha[j] < 0.0 {
            self.alpha[j] = 0.0;
            self.alpha[i] = sum;
        }
        if sum > c {
            if self.alpha[j] > c {
                self.alpha[j] = c;
                self.alpha[i] = sum - c;
            }
        } else if self.alpha[i] < 0.0 {
            self.alpha[i] = 0.0;
            self.alpha[j] = sum;
        }

        let d_ai = self.alpha[i] - old_ai;
        let d_aj = self.alpha[j] - old_aj;
        for k in 0..self.len() {
            self.grad[k] += q_i[k] * d_ai + q_j[k] * d_aj;
        }
        self.update_status(i);
        self.update_status(j);
    }

    /// Returns `(rho, r)` from the free variables of each block, falling
    /// back to the midpoint of the feasible interval when a block has none.
    fn calculate_rho(&self) -> (f64, f64) {
        let (mut nr_free1, mut nr_free2) = (0usize, 0usize);
        let (mut ub1, mut ub2) = (f64::INFINITY, f64::INFINITY);
        let (mut lb1, mut lb2) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        let (mut sum_free1, mut sum_free2) = (0.0, 0.0);

        for i in 0..self.len() {
            let g = self.grad[i];
            if self.y[i] > 0.0 {
                match self.status[i] {
                    Bound::Upper => lb1 = lb1.max(g),
                    Bound::Lower => ub1 = ub1.min(g),
                    Bound::Free => {
                        nr_free1 += 1;
                        sum_free1 += g;
                    }
                }
            } else {
                match self.status[i] {
                    Bound::Upper => lb2 = lb2.max(g),
                    Bound::Lower => ub2 = ub2.min(g),
                    Bound::Free => {
                        nr_free2 += 1;
                        sum_free2 += g;
                    }
                }
            }
        }

        let r1 = if nr_free1 > 0 { sum_free1 / nr_free1 as f64 } else { (ub1 + lb1) / 2.0 };
        let r2 = if nr_free2 > 0 { sum_free2 / nr_free2 as f64 } else { (ub2 + lb2) / 2.0 };
        ((r1 - r2) / 2.0, (r1 + r2) / 2.0)
    }
}

/// Solve nu-SVR for targets `target` over the samples behind `source`.
pub fn solve_nu_svr<K: KernelSource>(
    source: &K,
    target: &[f64],
    problem: &NuSvrProblem,
) -> Result<NuSvrSolution> {
    let l = source.n_samples();
    if l == 0 {
        return Err(ModelError::Training("cannot train on zero samples".to_string()));
    }
    if target.len() != l {
        return Err(ModelError::Training(format!(
            "{} targets for {} samples",
            target.len(),
            l
        )));
    }

    let n = 2 * l;
    let c = problem.c;
    let mut alpha = vec![0.0; n];
    let mut p = vec![0.0; n];
    let mut y = vec![0.0; n];
    let mut sum = c * problem.nu * l as f64 / 2.0;
    for i in 0..l {
        let a = sum.min(c);
        alpha[i] = a;
        alpha[i + l] = a;
        sum -= a;

        p[i] = -target[i];
        y[i] = 1.0;
        p[i + l] = target[i];
        y[i + l] = -1.0;
    }

    let cache = KernelCache::new(source, problem.cache_size);
    let qd: Vec<f64> = (0..n).map(|i| source.eval(i % l, i % l)).collect();
    let mut solver = NuSolver {
        l,
        y,
        grad: p.clone(),
        p,
        alpha,
        status: vec![Bound::Free; n],
        qd,
        c,
        eps: problem.eps,
        cache,
    };
    for i in 0..n {
        solver.update_status(i);
    }
    for i in 0..n {
        if !solver.is_lower(i) {
            let q_i = solver.q_row(i);
            let a_i = solver.alpha[i];
            for (g, q) in solver.grad.iter_mut().zip(&q_i) {
                *g += a_i * q;
            }
        }
    }

    let max_iter = 10_000_000usize.max(n.saturating_mul(100));
    let mut iterations = 0;
    while iterations < max_iter {
        let Some((i, j)) = solver.select_working_set() else {
            break;
        };
        iterations += 1;
        solver.update_pair(i, j);
    }
    if iterations >= max_iter {
        log::warn!("nu-SVR solver reached the maximum number of iterations ({})", max_iter);
    }

    let (rho, r) = solver.calculate_rho();
    let obj = solver
        .alpha
        .iter()
        .zip(solver.grad.iter().zip(&solver.p))
        .map(|(a, (g, p))| a * (g + p))
        .sum::<f64>()
        / 2.0;

    let mut support = Vec::new();
    let mut coef = Vec::new();
    for i in 0..l {
        let a = solver.alpha[i] - solver.alpha[i + l];
        if a != 0.0 {
            support.push(i);
            coef.push(a);
        }
    }
    if coef.iter().any(|v| !v.is_finite()) || !rho.is_finite() {
        return Err(ModelError::Training("nu-SVR solver diverged".to_string()));
    }

    log::debug!(
        "nu-SVR optimization finished, #iter = {}, epsilon = {:.6}, obj = {:.6}, rho = {:.6}, nSV = {}",
        iterations,
        -r,
        obj,
        rho,
        support.len()
    );

    Ok(NuSvrSolution {
        support,
        coef,
        rho,
        epsilon: -r,
        obj,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelType;
    use ndarray::Array2;

    fn problem() -> NuSvrProblem {
        NuSvrProblem {
            nu: 0.5,
            c: 1.0,
            eps: 1e-3,
            cache_size: 1.0,
        }
    }

    fn linear() -> Kernel {
        Kernel {
            kind: KernelType::Linear,
            gamma: 1.0,
            degree: 3,
            coef0: 0.0,
        }
    }

    fn decision(x: &Array2<f64>, sol: &NuSvrSolution, kernel: &Kernel, row: usize) -> f64 {
        sol.support
            .iter()
            .zip(&sol.coef)
            .map(|(&sv, c)| c * kernel.eval_dense(x.row(sv), x.row(row)))
            .sum::<f64>()
            - sol.rho
    }

    #[test]
    fn fits_a_linear_trend() {
        let x = Array2::from_shape_fn((20, 1), |(i, _)| i as f64 / 19.0);
        let y: Vec<f64> = (0..20).map(|i| 2.0 * (i as f64 / 19.0) + 1.0).collect();
        let source = DenseSamples {
            x: x.view(),
            kernel: linear(),
        };
        let sol = solve_nu_svr(&source, &y, &problem()).unwrap();
        assert!(!sol.support.is_empty());
        let err: f64 = (0..20)
            .map(|i| (decision(&x, &sol, &linear(), i) - y[i]).powi(2))
            .sum::<f64>()
            / 20.0;
        assert!(err < 0.1, "mse {}", err);
    }

    #[test]
    fn equality_constraints_hold() {
        let x = Array2::from_shape_fn((15, 2), |(i, j)| ((i * 7 + j * 3) % 11) as f64 / 10.0);
        let y: Vec<f64> = (0..15).map(|i| (i as f64 * 0.37).sin()).collect();
        let source = DenseSamples {
            x: x.view(),
            kernel: Kernel {
                kind: KernelType::Rbf,
                gamma: 0.5,
                degree: 3,
                coef0: 0.0,
            },
        };
        let sol = solve_nu_svr(&source, &y, &problem()).unwrap();
        // sum(alpha - alpha*) == 0
        let total: f64 = sol.coef.iter().sum();
        assert!(total.abs() < 1e-9, "sum of coefficients {}", total);
        for c in &sol.coef {
            assert!(c.abs() <= 1.0 + 1e-12);
        }
    }

    #[test]
    fn tiny_cache_gives_same_solution() {
        let x = Array2::from_shape_fn((12, 2), |(i, j)| (i as f64 + 1.0) * (j as f64 + 0.5));
        let y: Vec<f64> = (0..12).map(|i| i as f64 * 0.1).collect();
        let source = DenseSamples {
            x: x.view(),
            kernel: linear(),
        };
        let big = solve_nu_svr(&source, &y, &problem()).unwrap();
        let small = solve_nu_svr(
            &source,
            &y,
            &NuSvrProblem {
                cache_size: 1e-9,
                ..problem()
            },
        )
        .unwrap();
        assert_eq!(big.coef, small.coef);
        assert_eq!(big.rho, small.rho);
    }

    #[test]
    fn zero_samples_is_training_error() {
        let x = Array2::<f64>::zeros((0, 2));
        let source = DenseSamples {
            x: x.view(),
            kernel: linear(),
        };
        assert!(matches!(
            solve_nu_svr(&source, &[], &problem()),
            Err(ModelError::Training(_))
        ));
    }
}
