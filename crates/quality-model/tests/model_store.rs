//! Integration tests for saving, loading and deleting model bundles.

mod common;

use std::fs;
use std::path::Path;

use quality_model::{
    get_xs_from_table, get_xys_from_table, get_ys_from_table, EvaluationResult, ModelError, ModelType,
    NormType, TrainTestModel,
};
use serde_json::{json, Value};

fn trained(model_type: ModelType, params: &Value) -> TrainTestModel {
    let table = common::synthetic_table();
    let (train_idx, _) = common::train_test_indices();
    let xys = get_xys_from_table(&table, Some(&train_idx)).unwrap();
    let mut model = TrainTestModel::new(model_type, params).unwrap();
    model.train(&xys).unwrap();
    model
}

fn evaluate(model: &TrainTestModel) -> EvaluationResult {
    let table = common::synthetic_table();
    let (_, test_idx) = common::train_test_indices();
    let xs = get_xs_from_table(&table, Some(&test_idx)).unwrap();
    let ys = get_ys_from_table(&table, Some(&test_idx)).unwrap();
    model.evaluate(&xs, &ys).unwrap()
}

fn companion(path: &Path) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".model");
    s.into()
}

// ---------------------------------------------------------------------------
// Lossless backends
// ---------------------------------------------------------------------------

#[test]
fn nusvr_round_trip_is_lossless() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    for norm_type in NormType::ALL {
        let model = trained(ModelType::Nusvr, &json!({"norm_type": norm_type.as_str()}));
        let before = evaluate(&model);

        let path = dir.path().join(format!("nusvr_{}.json", norm_type));
        model.to_file(&path).unwrap();
        assert!(!companion(&path).exists());

        let loaded = TrainTestModel::from_file(&path).unwrap();
        assert_eq!(loaded.model_type(), ModelType::Nusvr);
        assert_eq!(loaded.config(), model.config());
        assert_eq!(loaded.norm_params(), model.norm_params());
        let after = evaluate(&loaded);
        assert_eq!(after.mse, before.mse, "norm_type {}", norm_type);
        assert_eq!(after.predicted, before.predicted);
    }
}

#[test]
fn random_forest_round_trip_is_lossless() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rf.json");
    let model = trained(ModelType::RandomForest, &json!({"norm_type": "whiten", "random_state": 0}));
    let before = evaluate(&model);
    model.to_file(&path).unwrap();
    let loaded = TrainTestModel::from_file(&path).unwrap();
    assert_eq!(evaluate(&loaded).predicted, before.predicted);
}

#[test]
fn bundle_records_resolved_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nusvr.json");
    trained(ModelType::Nusvr, &json!({"norm_type": "whiten", "C": 2.0}))
        .to_file(&path)
        .unwrap();

    let bundle: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(bundle["format_version"], json!(1));
    assert_eq!(bundle["model_type"], json!("NUSVR"));
    assert_eq!(bundle["params"]["norm_type"], json!("whiten"));
    assert_eq!(bundle["params"]["C"], json!(2.0));
    assert_eq!(bundle["params"]["nu"], json!(0.5));
    assert_eq!(bundle["params"]["kernel"], json!("rbf"));
    assert_eq!(
        bundle["feature_names"],
        json!(["ansnr_feat", "dlm_feat", "ti_feat", "vif_feat"])
    );
    assert_eq!(bundle["norm_params"]["norm_type"], json!("whiten"));
    assert!(bundle["regressor"].is_object());
}

// ---------------------------------------------------------------------------
// libsvm backend
// ---------------------------------------------------------------------------

#[test]
fn libsvm_round_trip_drifts_deterministically() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    for norm_type in NormType::ALL {
        let params = json!({"norm_type": norm_type.as_str()});
        let model = trained(ModelType::LibsvmNusvr, &params);
        let before = evaluate(&model);

        let path = dir.path().join(format!("libsvm_{}.json", norm_type));
        model.to_file(&path).unwrap();
        assert!(companion(&path).exists());
        let bundle: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(bundle["regressor"].is_null());

        let reloaded = evaluate(&TrainTestModel::from_file(&path).unwrap());
        assert_ne!(reloaded.mse, before.mse, "norm_type {}", norm_type);
        assert!((reloaded.mse - before.mse).abs() < 1e-3 * before.mse.max(1e-3));

        // a fresh training run drifts by exactly the same amount
        let again_path = dir.path().join(format!("libsvm_{}_again.json", norm_type));
        trained(ModelType::LibsvmNusvr, &params).to_file(&again_path).unwrap();
        let again = evaluate(&TrainTestModel::from_file(&again_path).unwrap());
        assert_eq!(again.mse, reloaded.mse);
    }
}

#[test]
fn libsvm_reload_is_stable_across_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.json");
    let second = dir.path().join("second.json");

    trained(ModelType::LibsvmNusvr, &json!({"norm_type": "whiten"}))
        .to_file(&first)
        .unwrap();
    let loaded = TrainTestModel::from_file(&first).unwrap();
    loaded.to_file(&second).unwrap();

    assert_eq!(
        fs::read_to_string(companion(&first)).unwrap(),
        fs::read_to_string(companion(&second)).unwrap()
    );
    let reloaded = TrainTestModel::from_file(&second).unwrap();
    assert_eq!(evaluate(&reloaded).predicted, evaluate(&loaded).predicted);
}

#[test]
fn companion_file_uses_libsvm_text_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("libsvm.json");
    trained(ModelType::LibsvmNusvr, &json!({"norm_type": "rescale_0to1"}))
        .to_file(&path)
        .unwrap();
    let text = fs::read_to_string(companion(&path)).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("svm_type nu_svr"));
    assert_eq!(lines.next(), Some("kernel_type rbf"));
    assert_eq!(lines.next(), Some("gamma 0.25"));
    assert!(text.contains("\nnr_class 2\n"));
    assert!(text.contains("\nSV\n"));
}

#[test]
fn missing_companion_is_corrupt_model() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("libsvm.json");
    trained(ModelType::LibsvmNusvr, &json!({"norm_type": "none"}))
        .to_file(&path)
        .unwrap();
    fs::remove_file(companion(&path)).unwrap();
    let err = TrainTestModel::from_file(&path).unwrap_err();
    assert!(matches!(err, ModelError::CorruptModel { .. }));
}

// ---------------------------------------------------------------------------
// Corrupt bundles and delete
// ---------------------------------------------------------------------------

#[test]
fn unreadable_bundles_are_corrupt_model() {
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("missing.json");
    assert!(matches!(
        TrainTestModel::from_file(&missing),
        Err(ModelError::CorruptModel { .. })
    ));

    let garbage = dir.path().join("garbage.json");
    fs::write(&garbage, "not json").unwrap();
    assert!(matches!(
        TrainTestModel::from_file(&garbage),
        Err(ModelError::CorruptModel { .. })
    ));

    let path = dir.path().join("rf.json");
    trained(ModelType::RandomForest, &json!({"norm_type": "none", "random_state": 5}))
        .to_file(&path)
        .unwrap();
    let mut bundle: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    bundle["format_version"] = json!(99);
    fs::write(&path, bundle.to_string()).unwrap();
    assert!(matches!(
        TrainTestModel::from_file(&path),
        Err(ModelError::CorruptModel { .. })
    ));
}

#[test]
fn malformed_forest_trees_are_corrupt_model() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rf.json");
    trained(ModelType::RandomForest, &json!({"norm_type": "none", "random_state": 0}))
        .to_file(&path)
        .unwrap();
    let bundle: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert!(bundle["regressor"]["trees"][0]["nodes"][0]["Split"].is_object());

    let edits: [(&str, Value); 3] = [("feature", json!(99)), ("left", json!(0)), ("right", json!(100_000))];
    for (field, value) in edits {
        let mut edited = bundle.clone();
        edited["regressor"]["trees"][0]["nodes"][0]["Split"][field] = value;
        fs::write(&path, edited.to_string()).unwrap();
        let err = TrainTestModel::from_file(&path).unwrap_err();
        assert!(
            matches!(err, ModelError::CorruptModel { ref reason, .. } if reason.contains("tree 0")),
            "{}: {:?}",
            field,
            err
        );
    }
}

#[test]
fn saving_untrained_model_is_not_trained() {
    let dir = tempfile::tempdir().unwrap();
    let model = TrainTestModel::nusvr(&json!({"norm_type": "none"})).unwrap();
    assert!(matches!(
        model.to_file(dir.path().join("m.json")),
        Err(ModelError::NotTrained)
    ));
}

#[test]
fn delete_removes_every_artifact_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("libsvm.json");
    trained(ModelType::LibsvmNusvr, &json!({"norm_type": "whiten"}))
        .to_file(&path)
        .unwrap();
    assert!(path.exists());

    TrainTestModel::delete(&path).unwrap();
    assert!(!path.exists());
    assert!(!companion(&path).exists());
    TrainTestModel::delete(&path).unwrap();
}

#[test]
fn overwriting_libsvm_bundle_drops_its_companion() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    trained(ModelType::LibsvmNusvr, &json!({"norm_type": "whiten"}))
        .to_file(&path)
        .unwrap();
    assert!(companion(&path).exists());

    let nusvr = trained(ModelType::Nusvr, &json!({"norm_type": "whiten"}));
    nusvr.to_file(&path).unwrap();
    assert!(!companion(&path).exists());
    let loaded = TrainTestModel::from_file(&path).unwrap();
    assert_eq!(loaded.model_type(), ModelType::Nusvr);
    assert_eq!(evaluate(&loaded).predicted, evaluate(&nusvr).predicted);

    // a companion left behind by some other writer still goes with the bundle
    fs::write(companion(&path), "svm_type nu_svr\n").unwrap();
    TrainTestModel::delete(&path).unwrap();
    assert!(!path.exists());
    assert!(!companion(&path).exists());
}
