//! Prediction accuracy metrics.
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::error::{ModelError, Result};

/// Accuracy of a set of predictions against ground truth labels.
///
/// Correlations over a constant sequence are undefined and reported as NaN.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    #[serde(rename = "MSE")]
    pub mse: f64,
    #[serde(rename = "RMSE")]
    pub rmse: f64,
    #[serde(rename = "PCC")]
    pub pcc: f64,
    #[serde(rename = "SRCC")]
    pub srcc: f64,
    #[serde(rename = "KENDALL")]
    pub kendall: f64,
    pub predicted: Vec<f64>,
    pub actual: Vec<f64>,
}

impl EvaluationResult {
    pub fn compute(predicted: Vec<f64>, actual: Vec<f64>) -> Result<Self> {
        let mse = mean_squared_error(&predicted, &actual)?;
        Ok(Self {
            mse,
            rmse: mse.sqrt(),
            pcc: pearson(&predicted, &actual),
            srcc: spearman(&predicted, &actual),
            kendall: kendall_tau(&predicted, &actual),
            predicted,
            actual,
        })
    }

    /// One-line summary in the `(SRCC: .., PCC: .., RMSE: ..)` layout.
    pub fn format_stats(&self) -> String {
        format!(
            "(SRCC: {:.3}, PCC: {:.3}, RMSE: {:.3}, MSE: {:.6})",
            self.srcc, self.pcc, self.rmse, self.mse
        )
    }
}

/// `(1/N) * sum((pred - actual)^2)`.
pub fn mean_squared_error(predicted: &[f64], actual: &[f64]) -> Result<f64> {
    if predicted.len() != actual.len() {
        return Err(ModelError::Schema(format!(
            "{} predictions for {} labels",
            predicted.len(),
            actual.len()
        )));
    }
    if predicted.is_empty() {
        return Err(ModelError::Schema("cannot evaluate on zero rows".to_string()));
    }
    let sum: f64 = predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a) * (p - a))
        .sum();
    Ok(sum / predicted.len() as f64)
}

/// Pearson linear correlation coefficient.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return f64::NAN;
    }
    let cov = x.iter().population_covariance(y.iter());
    let sx = x.iter().population_std_dev();
    let sy = y.iter().population_std_dev();
    if sx == 0.0 || sy == 0.0 {
        return f64::NAN;
    }
    cov / (sx * sy)
}

/// Spearman rank correlation: Pearson over average ranks.
pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() {
        return f64::NAN;
    }
    pearson(&rank(x), &rank(y))
}

/// 1-based ranks; tied values share the average of their positions.
pub fn rank(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // positions start..end share rank (start+1 + end) / 2
        let shared = (start + 1 + end) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = shared;
        }
        start = end;
    }
    ranks
}

/// Kendall rank correlation (tau-b, tie corrected).
pub fn kendall_tau(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 {
        return f64::NAN;
    }
    let (mut concordant, mut discordant) = (0i64, 0i64);
    let (mut ties_x, mut ties_y) = (0i64, 0i64);
    for i in 0..x.len() {
        for j in (i + 1)..x.len() {
            let dx = x[i] - x[j];
            let dy = y[i] - y[j];
            match (dx == 0.0, dy == 0.0) {
                (true, true) => {}
                (true, false) => ties_x += 1,
                (false, true) => ties_y += 1,
                (false, false) => {
                    if (dx > 0.0) == (dy > 0.0) {
                        concordant += 1;
                    } else {
                        discordant += 1;
                    }
                }
            }
        }
    }
    let n1 = (concordant + discordant + ties_x) as f64;
    let n2 = (concordant + discordant + ties_y) as f64;
    if n1 == 0.0 || n2 == 0.0 {
        return f64::NAN;
    }
    (concordant - discordant) as f64 / (n1 * n2).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn mse_of_known_values() {
        let mse = mean_squared_error(&[1.0, 2.0, 3.0], &[1.0, 3.0, 5.0]).unwrap();
        assert_abs_diff_eq!(mse, 5.0 / 3.0, epsilon = 1e-15);
    }

    #[test]
    fn mse_length_mismatch_is_error() {
        assert!(mean_squared_error(&[1.0], &[1.0, 2.0]).is_err());
        assert!(mean_squared_error(&[], &[]).is_err());
    }

    #[test]
    fn ranks_average_ties() {
        assert_eq!(rank(&[10.0, 20.0, 10.0, 30.0]), vec![1.5, 3.0, 1.5, 4.0]);
    }

    #[test]
    fn perfect_monotone_relation() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [1.0, 4.0, 9.0, 16.0, 25.0];
        assert_abs_diff_eq!(spearman(&x, &y), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(kendall_tau(&x, &y), 1.0, epsilon = 1e-12);
        assert!(pearson(&x, &y) < 1.0);
        assert!(pearson(&x, &y) > 0.9);
    }

    #[test]
    fn constant_input_has_undefined_correlation() {
        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_nan());
        assert!(kendall_tau(&[1.0, 1.0], &[1.0, 2.0]).is_nan());
    }

    #[test]
    fn evaluation_result_serializes_metric_names() {
        let res = EvaluationResult::compute(vec![1.0, 2.0], vec![1.0, 2.5]).unwrap();
        let json = serde_json::to_value(&res).unwrap();
        assert_eq!(json["MSE"], serde_json::json!(0.125));
        assert!(json.get("RMSE").is_some());
    }
}
