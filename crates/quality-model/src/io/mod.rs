//! Readers that load feature tables from disk.
pub mod feature_table;

pub use feature_table::{read_feature_table_csv, read_feature_table_json};
