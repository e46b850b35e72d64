use ndarray::{Array1, Array2};

use crate::error::{ModelError, Result};

/// Reject empty, misaligned or non-finite training data before a backend sees it.
pub fn validate_training_data(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() == 0 {
        return Err(ModelError::Training("cannot train on zero rows".to_string()));
    }
    if x.ncols() == 0 {
        return Err(ModelError::Training("cannot train on zero features".to_string()));
    }
    if x.nrows() != y.len() {
        return Err(ModelError::Training(format!(
            "{} feature rows for {} labels",
            x.nrows(),
            y.len()
        )));
    }
    if let Some(((row, col), _)) = x.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(ModelError::Training(format!(
            "non-finite feature value at row {}, column {}",
            row, col
        )));
    }
    if let Some((row, _)) = y.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(ModelError::Training(format!("non-finite label at row {}", row)));
    }
    Ok(())
}

/// Check that a prediction matrix has the width the backend was fit on.
pub fn check_width(expected: usize, x: &Array2<f64>) -> Result<()> {
    if x.ncols() != expected {
        return Err(ModelError::Schema(format!(
            "model was fit on {} features, got {}",
            expected,
            x.ncols()
        )));
    }
    Ok(())
}
