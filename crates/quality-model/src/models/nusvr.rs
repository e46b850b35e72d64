use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::{ModelType, SvrParams};
use crate::error::{ModelError, Result};
use crate::models::kernel::Kernel;
use crate::models::regressor::{Regressor, RegressorState, StateError};
use crate::models::solver::{solve_nu_svr, DenseSamples, NuSvrProblem};
use crate::models::utils::{check_width, validate_training_data};

/// Fitted dense nu-SVR: `f(x) = sum_i dual_coef[i] * K(sv_i, x) - rho`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SvrModel {
    pub kernel: Kernel,
    pub support_vectors: Array2<f64>,
    pub dual_coef: Array1<f64>,
    pub rho: f64,
}

impl SvrModel {
    pub fn decision(&self, x: &Array2<f64>) -> Array1<f64> {
        x.outer_iter()
            .map(|row| {
                let mut sum = 0.0;
                for (sv, coef) in self.support_vectors.outer_iter().zip(self.dual_coef.iter()) {
                    sum += coef * self.kernel.eval_dense(sv, row);
                }
                sum - self.rho
            })
            .collect()
    }
}

/// nu-SVR over dense rows. The fitted model is stored losslessly inside
/// the primary model file.
pub struct NusvrRegressor {
    params: SvrParams,
    model: Option<SvrModel>,
}

impl NusvrRegressor {
    pub fn new(params: SvrParams) -> Self {
        NusvrRegressor { params, model: None }
    }

    pub fn model(&self) -> Option<&SvrModel> {
        self.model.as_ref()
    }
}

impl Regressor for NusvrRegressor {
    fn model_type(&self) -> ModelType {
        ModelType::Nusvr
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        validate_training_data(x, y)?;
        let kernel = Kernel::resolve(&self.params, x.ncols());
        let samples = DenseSamples { x: x.view(), kernel };
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

        self.model = Some(SvrModel {
            kernel,
            support_vectors: x.select(Axis(0), &solution.support),
            dual_coef: Array1::from_vec(solution.coef),
            rho: solution.rho,
        });
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let model = self.model.as_ref().ok_or(ModelError::NotTrained)?;
        check_width(model.support_vectors.ncols(), x)?;
        Ok(model.decision(x))
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn save_state(&self) -> Result<RegressorState> {
        let model = self.model.as_ref().ok_or(ModelError::NotTrained)?;
        let value = serde_json::to_value(model)
            .map_err(|e| ModelError::Training(format!("failed to serialize nu-SVR model: {}", e)))?;
        Ok(RegressorState::Embedded(value))
    }

    fn load_state(&mut self, state: RegressorState) -> std::result::Result<(), StateError> {
        match state {
            RegressorState::Embedded(value) => {
                let model: SvrModel = serde_json::from_value(value)
                    .map_err(|e| StateError(format!("invalid nu-SVR state: {}", e)))?;
                if model.support_vectors.nrows() != model.dual_coef.len() {
                    return Err(StateError(format!(
                        "{} support vectors but {} coefficients",
                        model.support_vectors.nrows(),
                        model.dual_coef.len()
                    )));
                }
                self.model = Some(model);
                Ok(())
            }
            RegressorState::Native(_) => Err(StateError(
                "NUSVR state is stored in the model file, not a companion file".to_string(),
            )),
        }
    }

    fn name(&self) -> &'static str {
        "nu-SVR"
    }
}
