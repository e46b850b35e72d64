//! Regression backends and the pieces they are built from.
pub mod decision_tree;
pub mod factory;
pub mod kernel;
pub mod libsvm;
pub mod nusvr;
pub mod random_forest;
pub mod regressor;
pub mod solver;
pub mod utils;
