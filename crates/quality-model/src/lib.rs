//! quality-model: train/test regression models for perceptual quality scores.
//!
//! A feature table (`*_feat` columns plus `label` and `content_id`) is
//! projected into row-aligned features and labels, a normalizer is fit on
//! the training rows and one of three backends (dense nu-SVR, libsvm-format
//! nu-SVR, random forest) maps the normalized features to a score. Trained
//! models are persisted as a JSON bundle, with a libsvm text companion file
//! for the libsvm backend.
pub mod config;
pub mod data_handling;
pub mod error;
pub mod io;
pub mod models;
pub mod preprocessing;
pub mod stats;
pub mod store;
pub mod train_test_model;

pub use config::{ModelConfig, ModelType, NormType};
pub use data_handling::{get_xs_from_table, get_xys_from_table, get_ys_from_table, FeatureTable, Xs, Xys, Ys};
pub use error::{ModelError, Result};
pub use stats::EvaluationResult;
pub use train_test_model::TrainTestModel;
