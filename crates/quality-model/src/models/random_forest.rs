use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{ForestParams, ModelType};
use crate::error::{ModelError, Result};
use crate::models::decision_tree::{RegressionTree, TreeParams};
use crate::models::regressor::{Regressor, RegressorState, StateError};
use crate::models::utils::{check_width, validate_training_data};

/// Fitted forest; the prediction is the mean over trees.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Forest {
    pub n_features: usize,
    pub trees: Vec<RegressionTree>,
}

impl Forest {
    pub fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        let n_trees = self.trees.len() as f64;
        let predictions: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let row = x.row(i);
                let sum: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
                sum / n_trees
            })
            .collect();
        Array1::from_vec(predictions)
    }
}

/// Bagged ensemble of CART regression trees.
///
/// Tree `i` draws from a ChaCha8 stream seeded with `random_state + i`, so a
/// fixed `random_state` yields the same forest regardless of thread count.
pub struct RandomForestRegressor {
    params: ForestParams,
    forest: Option<Forest>,
}

impl RandomForestRegressor {
    pub fn new(params: ForestParams) -> Self {
        RandomForestRegressor { params, forest: None }
    }

    pub fn forest(&self) -> Option<&Forest> {
        self.forest.as_ref()
    }
}

impl Regressor for RandomForestRegressor {
    fn model_type(&self) -> ModelType {
        ModelType::RandomForest
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        validate_training_data(x, y)?;
        let n_samples = x.nrows();
        let base_seed = match self.params.random_state {
            Some(seed) => seed,
            None => {
                let seed: u64 = rand::random();
                log::warn!(
                    "random forest has no random_state; using seed {} and results will not be reproducible",
                    seed
                );
                seed
            }
        };
        let tree_params = TreeParams {
            max_depth: self.params.max_depth,
            min_samples_split: self.params.min_samples_split,
            min_samples_leaf: self.params.min_samples_leaf,
            max_features: self.params.max_features,
        };
        let bootstrap = self.params.bootstrap;

        let trees: Vec<RegressionTree> = (0..self.params.n_estimators)
            .into_par_iter()
            .map(|tree_idx| {
                let mut rng = ChaCha8Rng::seed_from_u64(base_seed.wrapping_add(tree_idx as u64));
                let mut sample_indices: Vec<usize> = if bootstrap {
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
                } else {
                    (0..n_samples).collect()
                };
                RegressionTree::fit(x.view(), y.view(), &mut sample_indices, &tree_params, &mut rng)
            })
            .collect();

        log::debug!(
            "random forest fit {} trees, {} nodes in total",
            trees.len(),
            trees.iter().map(RegressionTree::n_nodes).sum::<usize>()
        );
        self.forest = Some(Forest {
            n_features: x.ncols(),
            trees,
        });
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let forest = self.forest.as_ref().ok_or(ModelError::NotTrained)?;
        check_width(forest.n_features, x)?;
        Ok(forest.predict(x))
    }

    fn is_fitted(&self) -> bool {
        self.forest.is_some()
    }

    fn save_state(&self) -> Result<RegressorState> {
        let forest = self.forest.as_ref().ok_or(ModelError::NotTrained)?;
        let value = serde_json::to_value(forest)
            .map_err(|e| ModelError::Training(format!("failed to serialize random forest: {}", e)))?;
        Ok(RegressorState::Embedded(value))
    }

    fn load_state(&mut self, state: RegressorState) -> std::result::Result<(), StateError> {
        match state {
            RegressorState::Embedded(value) => {
                let forest: Forest = serde_json::from_value(value)
                    .map_err(|e| StateError(format!("invalid random forest state: {}", e)))?;
                if forest.trees.is_empty() {
                    return Err(StateError("random forest has no trees".to_string()));
                }
                for (i, tree) in forest.trees.iter().enumerate() {
                    tree.validate(forest.n_features)
                        .map_err(|e| StateError(format!("random forest tree {}: {}", i, e)))?;
                }
                self.forest = Some(forest);
                Ok(())
            }
            RegressorState::Native(_) => Err(StateError(
                "RANDOMFOREST state is stored in the model file, not a companion file".to_string(),
            )),
        }
    }

    fn name(&self) -> &'static str {
        "random forest"
    }
}
