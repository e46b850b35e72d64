//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;

use quality_model::FeatureTable;

pub const N_ROWS: usize = 300;
pub const N_TRAIN: usize = 250;

fn unit(i: usize, mult: usize, offset: usize) -> f64 {
    ((i * mult + offset) % 1000) as f64 / 1000.0
}

/// Deterministic 300-row table shaped like a VMAF feature dump: four
/// `_feat` columns (one constant, one on a much larger scale) and a label
/// driven mostly by `vif_feat` and `ti_feat`.
pub fn synthetic_table() -> FeatureTable {
    let mut ansnr = Vec::with_capacity(N_ROWS);
    let mut dlm = Vec::with_capacity(N_ROWS);
    let mut ti = Vec::with_capacity(N_ROWS);
    let mut vif = Vec::with_capacity(N_ROWS);
    let mut label = Vec::with_capacity(N_ROWS);
    let mut content_id = Vec::with_capacity(N_ROWS);

    for i in 0..N_ROWS {
        let a = 20.0 + 30.0 * unit(i, 617, 11);
        let t = 10.0 * unit(i, 211, 503);
        let v = 0.3 + 0.7 * unit(i, 853, 97);
        let noise = 0.05 * (i as f64 * 1.7).sin();
        ansnr.push(a);
        dlm.push(1.0);
        ti.push(t);
        vif.push(v);
        label.push(1.0 + 4.0 * v + 0.08 * t + 0.01 * (a - 35.0) + noise);
        content_id.push((i / 10) as f64);
    }

    let mut columns = BTreeMap::new();
    columns.insert("ansnr_feat".to_string(), ansnr);
    columns.insert("dlm_feat".to_string(), dlm);
    columns.insert("ti_feat".to_string(), ti);
    columns.insert("vif_feat".to_string(), vif);
    columns.insert("label".to_string(), label);
    columns.insert("content_id".to_string(), content_id);
    FeatureTable::from_columns(columns).expect("synthetic table is rectangular")
}

pub fn train_test_indices() -> (Vec<usize>, Vec<usize>) {
    ((0..N_TRAIN).collect(), (N_TRAIN..N_ROWS).collect())
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
