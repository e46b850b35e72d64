//! Train a model on the head of a feature table and evaluate it on the tail.
//!
//! cargo run --example train_and_evaluate -- features.json NUSVR whiten model.json

use std::env;
use std::path::Path;

use anyhow::{bail, Context, Result};
use quality_model::io::{read_feature_table_csv, read_feature_table_json};
use quality_model::{get_xs_from_table, get_xys_from_table, get_ys_from_table, ModelType, TrainTestModel};
use serde_json::json;

fn main() -> Result<()> {
    env_logger::Builder::default()
        .parse_env(env_logger::Env::default().filter_or("QUALITY_MODEL_LOG", "info"))
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("usage: {} <features.json|csv> <NUSVR|LIBSVMNUSVR|RANDOMFOREST> [norm_type] [output]", args[0]);
    }
    let table_path = Path::new(&args[1]);
    let model_type: ModelType = args[2].parse().map_err(anyhow::Error::msg)?;
    let norm_type = args.get(3).map(String::as_str).unwrap_or("whiten");

    let table = match table_path.extension().and_then(|e| e.to_str()) {
        Some("json") => read_feature_table_json(table_path)?,
        _ => read_feature_table_csv(table_path)?,
    };
    let n_train = table.n_rows() * 4 / 5;
    let train_idx: Vec<usize> = (0..n_train).collect();
    let test_idx: Vec<usize> = (n_train..table.n_rows()).collect();

    let mut params = json!({ "norm_type": norm_type });
    if model_type == ModelType::RandomForest {
        params["random_state"] = json!(0);
    }
    let mut model = TrainTestModel::new(model_type, &params)?;
    model.train(&get_xys_from_table(&table, Some(&train_idx))?)?;

    let result = model.evaluate(
        &get_xs_from_table(&table, Some(&test_idx))?,
        &get_ys_from_table(&table, Some(&test_idx))?,
    )?;
    println!("{} {} on {} rows: {}", model_type, norm_type, test_idx.len(), result.format_stats());

    if let Some(output) = args.get(4) {
        model
            .to_file(output)
            .with_context(|| format!("Failed to save model to {}", output))?;
        let reloaded = TrainTestModel::from_file(output)?;
        let again = reloaded.evaluate(
            &get_xs_from_table(&table, Some(&test_idx))?,
            &get_ys_from_table(&table, Some(&test_idx))?,
        )?;
        println!("after reload: {}", again.format_stats());
    }
    Ok(())
}
