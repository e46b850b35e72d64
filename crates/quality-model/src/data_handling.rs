//! Feature tables and the `Xs` / `Ys` / `Xys` projections fed to models.
//!
//! A `FeatureTable` holds one row per sample with a `content_id`, a ground
//! truth `label` and any number of `<name>_feat` columns. The projection
//! helpers pull row-aligned column arrays out of it, optionally restricted
//! to a list of row indices.
use std::collections::BTreeMap;

use ndarray::{Array1, Array2};
use serde_json::{Map, Value};

use crate::error::{ModelError, Result};

pub const LABEL_COLUMN: &str = "label";
pub const CONTENT_ID_COLUMN: &str = "content_id";
pub const FEATURE_SUFFIX: &str = "_feat";

/// Row-aligned numeric table. All columns have the same length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureTable {
    n_rows: usize,
    columns: BTreeMap<String, Vec<f64>>,
}

impl FeatureTable {
    pub fn from_columns(columns: BTreeMap<String, Vec<f64>>) -> Result<Self> {
        let n_rows = columns.values().next().map_or(0, Vec::len);
        if let Some((name, col)) = columns.iter().find(|(_, c)| c.len() != n_rows) {
            return Err(ModelError::Schema(format!(
                "column '{}' has {} rows, expected {}",
                name,
                col.len(),
                n_rows
            )));
        }
        Ok(Self { n_rows, columns })
    }

    /// Build a table from row records; every record must carry the same keys.
    pub fn from_records(records: &[Map<String, Value>]) -> Result<Self> {
        let Some(first) = records.first() else {
            return Ok(Self::default());
        };
        let mut columns: BTreeMap<String, Vec<f64>> = first
            .keys()
            .map(|k| (k.clone(), Vec::with_capacity(records.len())))
            .collect();

        for (row, record) in records.iter().enumerate() {
            if record.len() != columns.len() {
                return Err(ModelError::Schema(format!(
                    "row {} has {} columns, expected {}",
                    row,
                    record.len(),
                    columns.len()
                )));
            }
            for (name, values) in columns.iter_mut() {
                let value = record.get(name).ok_or_else(|| {
                    ModelError::Schema(format!("row {} is missing column '{}'", row, name))
                })?;
                values.push(json_number(value, name, row)?);
            }
        }
        Self::from_columns(columns)
    }

    /// Parse either a JSON array of records, a `{column: [values]}` object,
    /// or the `{column: {row_label: value}}` layout written by dataframe
    /// libraries. In the last form rows are ordered by numeric row label.
    pub fn from_json_value(value: &Value) -> Result<Self> {
        match value {
            Value::Array(rows) => {
                let records = rows
                    .iter()
                    .enumerate()
                    .map(|(i, row)| {
                        row.as_object()
                            .cloned()
                            .ok_or_else(|| ModelError::Schema(format!("row {} is not an object", i)))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Self::from_records(&records)
            }
            Value::Object(cols) => {
                let mut columns = BTreeMap::new();
                // (column, sorted row labels) of the first labelled column
                let mut first_labels: Option<(&str, Vec<usize>)> = None;
                for (name, col) in cols {
                    let values = match col {
                        Value::Array(items) => items
                            .iter()
                            .enumerate()
                            .map(|(row, v)| json_number(v, name, row))
                            .collect::<Result<Vec<_>>>()?,
                        Value::Object(cells) => {
                            let (labels, values) = labelled_column(name, cells)?;
                            let (first, expected) =
                                first_labels.get_or_insert_with(|| (name.as_str(), labels.clone()));
                            if *expected != labels {
                                return Err(ModelError::Schema(format!(
                                    "column '{}' has different row labels than column '{}'",
                                    name, first
                                )));
                            }
                            values
                        }
                        _ => {
                            return Err(ModelError::Schema(format!(
                                "column '{}' is neither a list nor a row mapping",
                                name
                            )))
                        }
                    };
                    columns.insert(name.clone(), values);
                }
                Self::from_columns(columns)
            }
            _ => Err(ModelError::Schema(
                "feature table must be a JSON array or object".to_string(),
            )),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Names of the `_feat` columns, in lexicographic order.
    pub fn feature_names(&self) -> Vec<String> {
        self.columns
            .keys()
            .filter(|k| k.ends_with(FEATURE_SUFFIX))
            .cloned()
            .collect()
    }

    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ModelError::Schema(format!("missing column '{}'", name)))
    }

    /// New table holding the given rows, in the given order.
    pub fn take_rows(&self, indices: &[usize]) -> Result<Self> {
        let mut columns = BTreeMap::new();
        for (name, values) in &self.columns {
            columns.insert(name.clone(), select(values, Some(indices), name)?.to_vec());
        }
        Ok(Self {
            n_rows: indices.len(),
            columns,
        })
    }

    /// Split into the first `n` rows and the remaining rows.
    pub fn split_at(&self, n: usize) -> Result<(Self, Self)> {
        if n > self.n_rows {
            return Err(ModelError::Schema(format!(
                "cannot split {} rows at {}",
                self.n_rows, n
            )));
        }
        let head: Vec<usize> = (0..n).collect();
        let tail: Vec<usize> = (n..self.n_rows).collect();
        Ok((self.take_rows(&head)?, self.take_rows(&tail)?))
    }
}

fn json_number(value: &Value, column: &str, row: usize) -> Result<f64> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            ModelError::Schema(format!("column '{}' row {}: unrepresentable number", column, row))
        }),
        Value::Null => Ok(f64::NAN),
        other => Err(ModelError::Schema(format!(
            "column '{}' row {}: expected a number, got {}",
            column, row, other
        ))),
    }
}

/// Values of a `{row_label: value}` column ordered by label, with the sorted labels.
fn labelled_column(name: &str, cells: &Map<String, Value>) -> Result<(Vec<usize>, Vec<f64>)> {
    let mut rows = cells
        .iter()
        .map(|(label, v)| {
            let idx = label.parse::<usize>().map_err(|_| {
                ModelError::Schema(format!("column '{}': row label '{}' is not an integer", name, label))
            })?;
            Ok((idx, json_number(v, name, idx)?))
        })
        .collect::<Result<Vec<_>>>()?;
    rows.sort_by_key(|(idx, _)| *idx);
    if let Some(pair) = rows.windows(2).find(|w| w[0].0 == w[1].0) {
        return Err(ModelError::Schema(format!(
            "column '{}': row label {} appears more than once",
            name, pair[0].0
        )));
    }
    Ok(rows.into_iter().unzip())
}

fn select(values: &[f64], indices: Option<&[usize]>, column: &str) -> Result<Array1<f64>> {
    match indices {
        None => Ok(Array1::from_vec(values.to_vec())),
        Some(indices) => indices
            .iter()
            .map(|&i| {
                values.get(i).copied().ok_or_else(|| {
                    ModelError::Schema(format!(
                        "row index {} out of range for column '{}' with {} rows",
                        i,
                        column,
                        values.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Array1::from_vec),
    }
}

/// Feature columns keyed by name. Iteration order is lexicographic.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Xs {
    features: BTreeMap<String, Array1<f64>>,
}

impl Xs {
    pub fn new(features: BTreeMap<String, Array1<f64>>) -> Self {
        Self { features }
    }

    pub fn get(&self, name: &str) -> Option<&Array1<f64>> {
        self.features.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Array1<f64>)> {
        self.features.iter()
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.features.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Number of rows shared by every column.
    pub fn n_samples(&self) -> Result<usize> {
        let n = self.features.values().next().map_or(0, Array1::len);
        if let Some((name, col)) = self.features.iter().find(|(_, c)| c.len() != n) {
            return Err(ModelError::Schema(format!(
                "feature '{}' has {} rows, expected {}",
                name,
                col.len(),
                n
            )));
        }
        Ok(n)
    }

    /// Stack the named columns into an `(n_samples, names.len())` matrix.
    pub fn to_matrix(&self, names: &[String]) -> Result<Array2<f64>> {
        let n = self.n_samples()?;
        let cols = names
            .iter()
            .map(|name| {
                self.features
                    .get(name)
                    .ok_or_else(|| ModelError::Schema(format!("missing feature column '{}'", name)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Array2::from_shape_fn((n, cols.len()), |(i, j)| cols[j][i]))
    }
}

/// Ground truth label and content id, row-aligned with an `Xs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Ys {
    pub label: Array1<f64>,
    pub content_id: Array1<i64>,
}

/// Features and ground truth sharing one row selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Xys {
    pub xs: Xs,
    pub ys: Ys,
}

/// Extract every `_feat` column at the given rows (all rows when `None`).
pub fn get_xs_from_table(table: &FeatureTable, indices: Option<&[usize]>) -> Result<Xs> {
    let names = table.feature_names();
    if names.is_empty() {
        return Err(ModelError::Schema(format!(
            "table has no '*{}' columns",
            FEATURE_SUFFIX
        )));
    }
    let mut features = BTreeMap::new();
    for name in names {
        let values = select(table.column(&name)?, indices, &name)?;
        features.insert(name, values);
    }
    Ok(Xs::new(features))
}

/// Extract `label` and `content_id` at the given rows.
pub fn get_ys_from_table(table: &FeatureTable, indices: Option<&[usize]>) -> Result<Ys> {
    let label = select(table.column(LABEL_COLUMN)?, indices, LABEL_COLUMN)?;
    let content_id = select(table.column(CONTENT_ID_COLUMN)?, indices, CONTENT_ID_COLUMN)?
        .iter()
        .map(|&v| {
            if v.is_finite() && v.fract() == 0.0 {
                Ok(v as i64)
            } else {
                Err(ModelError::Schema(format!(
                    "'{}' value {} is not an integer",
                    CONTENT_ID_COLUMN, v
                )))
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Ys {
        label,
        content_id: Array1::from_vec(content_id),
    })
}

pub fn get_xys_from_table(table: &FeatureTable, indices: Option<&[usize]>) -> Result<Xys> {
    Ok(Xys {
        xs: get_xs_from_table(table, indices)?,
        ys: get_ys_from_table(table, indices)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> FeatureTable {
        FeatureTable::from_json_value(&json!([
            {"content_id": 0, "label": 4.5, "a_feat": 1.0, "b_feat": 10.0},
            {"content_id": 1, "label": 4.7, "a_feat": 2.0, "b_feat": 20.0},
            {"content_id": 10, "label": 4.4, "a_feat": 3.0, "b_feat": 30.0},
        ]))
        .unwrap()
    }

    #[test]
    fn records_and_labelled_columns_agree() {
        let labelled = FeatureTable::from_json_value(&json!({
            "content_id": {"2": 10, "0": 0, "1": 1},
            "label": {"0": 4.5, "1": 4.7, "2": 4.4},
            "a_feat": {"0": 1.0, "1": 2.0, "2": 3.0},
            "b_feat": {"0": 10.0, "1": 20.0, "2": 30.0},
        }))
        .unwrap();
        assert_eq!(labelled, table());
    }

    #[test]
    fn labelled_columns_with_different_labels_are_rejected() {
        let err = FeatureTable::from_json_value(&json!({
            "a_feat": {"0": 1.0, "2": 3.0},
            "label": {"0": 10.0, "1": 20.0},
            "content_id": {"0": 0, "1": 1},
        }))
        .unwrap_err();
        assert!(matches!(err, ModelError::Schema(ref msg) if msg.contains("row labels")), "{:?}", err);
    }

    #[test]
    fn duplicate_row_labels_are_rejected() {
        let err = FeatureTable::from_json_value(&json!({
            "a_feat": {"0": 1.0, "00": 2.0},
            "label": {"0": 10.0, "1": 20.0},
            "content_id": {"0": 0, "1": 1},
        }))
        .unwrap_err();
        assert!(matches!(err, ModelError::Schema(ref msg) if msg.contains("more than once")), "{:?}", err);
    }

    #[test]
    fn selection_keeps_requested_order() {
        let xys = get_xys_from_table(&table(), Some(&[2, 0])).unwrap();
        assert_eq!(xys.xs.get("a_feat").unwrap().to_vec(), vec![3.0, 1.0]);
        assert_eq!(xys.xs.get("b_feat").unwrap().to_vec(), vec![30.0, 10.0]);
        assert_eq!(xys.ys.label.to_vec(), vec![4.4, 4.5]);
        assert_eq!(xys.ys.content_id.to_vec(), vec![10, 0]);
    }

    #[test]
    fn out_of_range_index_is_schema_error() {
        let err = get_xs_from_table(&table(), Some(&[3])).unwrap_err();
        assert!(matches!(err, ModelError::Schema(_)));
    }

    #[test]
    fn ragged_columns_are_rejected() {
        let mut cols = BTreeMap::new();
        cols.insert("a_feat".to_string(), vec![1.0, 2.0]);
        cols.insert("label".to_string(), vec![1.0]);
        assert!(FeatureTable::from_columns(cols).is_err());
    }

    #[test]
    fn to_matrix_uses_requested_column_order() {
        let xs = get_xs_from_table(&table(), None).unwrap();
        let m = xs
            .to_matrix(&["b_feat".to_string(), "a_feat".to_string()])
            .unwrap();
        assert_eq!(m.shape(), &[3, 2]);
        assert_eq!(m[[1, 0]], 20.0);
        assert_eq!(m[[1, 1]], 2.0);
    }
}
