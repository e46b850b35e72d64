//! Feature table readers for JSON and delimited text files.
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

use crate::data_handling::FeatureTable;

/// Read a feature table from a JSON file.
///
/// Accepts a list of row records, a `{column: [values]}` object or the
/// `{column: {row_label: value}}` layout written by dataframe libraries.
pub fn read_feature_table_json<P: AsRef<Path>>(path: P) -> Result<FeatureTable> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open feature table: {}", path.display()))?;
    let value: Value = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse JSON feature table: {}", path.display()))?;
    FeatureTable::from_json_value(&value)
        .with_context(|| format!("Invalid feature table: {}", path.display()))
}

/// Read a feature table from a CSV file (tab-separated when the extension
/// is `.tsv`). Empty cells become NaN.
pub fn read_feature_table_csv<P: AsRef<Path>>(path: P) -> Result<FeatureTable> {
    let path = path.as_ref();
    let delimiter = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open feature table: {}", path.display()))?;

    let headers = reader
        .headers()
        .context("Failed to read feature table header row")?
        .clone();
    if headers.is_empty() {
        return Err(anyhow!("Feature table {} has no columns", path.display()));
    }
    let mut seen = BTreeSet::new();
    if let Some(name) = headers.iter().find(|name| !seen.insert(*name)) {
        return Err(anyhow!(
            "Feature table {} has duplicate column '{}'",
            path.display(),
            name
        ));
    }

    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); headers.len()];
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;
        for (col_idx, values) in columns.iter_mut().enumerate() {
            let cell = record
                .get(col_idx)
                .ok_or_else(|| anyhow!("Missing value for '{}' at row {}", &headers[col_idx], row_idx + 1))?
                .trim();
            let parsed = if cell.is_empty() {
                f64::NAN
            } else {
                cell.parse::<f64>().with_context(|| {
                    format!("Invalid value '{}' for '{}' at row {}", cell, &headers[col_idx], row_idx + 1)
                })?
            };
            values.push(parsed);
        }
    }

    let columns: BTreeMap<String, Vec<f64>> = headers
        .iter()
        .map(str::to_string)
        .zip(columns)
        .collect();
    FeatureTable::from_columns(columns)
        .with_context(|| format!("Invalid feature table: {}", path.display()))
}
