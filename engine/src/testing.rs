//! Shared fixtures for unit tests: a small customer corpus, a dictionary and
//! scaler fitted on it, and one model of each kind.

use crate::{
    config::Config,
    engine::{Holdout, ServingEngine},
    features::{DimensionKind, FeatureEncoder, FieldDictionary, Record},
    models::{Activation, LayerSpec, LinearModel, Model, ModelRegistry, NetworkModel, TreeModel, TreeNode},
    scaler::FeatureScaler,
    types::HoldoutFile,
};
use serde_json::{json, Value};
use std::{path::Path, sync::Arc};

pub const CUSTOMER_FIELDS: [&str; 19] = [
    "gender",
    "SeniorCitizen",
    "Partner",
    "Dependents",
    "tenure",
    "PhoneService",
    "MultipleLines",
    "InternetService",
    "OnlineSecurity",
    "OnlineBackup",
    "DeviceProtection",
    "TechSupport",
    "StreamingTV",
    "StreamingMovies",
    "Contract",
    "PaperlessBilling",
    "PaymentMethod",
    "MonthlyCharges",
    "TotalCharges",
];

const CONTRACT: usize = 14;
const TENURE: usize = 4;

const CORPUS: [[&str; 19]; 6] = [
    ["Female", "0", "Yes", "No", "1", "No", "No phone service", "DSL", "No", "Yes", "No", "No", "No", "No", "Month-to-month", "Yes", "Electronic check", "29.85", "29.85"],
    ["Male", "0", "No", "No", "34", "Yes", "No", "DSL", "Yes", "No", "Yes", "No", "No", "No", "One year", "No", "Mailed check", "56.95", "1889.5"],
    ["Male", "0", "No", "No", "2", "Yes", "No", "DSL", "Yes", "Yes", "No", "No", "No", "No", "Month-to-month", "Yes", "Mailed check", "53.85", "108.15"],
    ["Male", "0", "No", "No", "45", "No", "No phone service", "DSL", "Yes", "No", "Yes", "Yes", "No", "No", "One year", "No", "Bank transfer (automatic)", "42.3", "1840.75"],
    ["Female", "0", "No", "No", "2", "Yes", "No", "Fiber optic", "No", "No", "No", "No", "No", "No", "Month-to-month", "Yes", "Electronic check", "70.7", "151.65"],
    ["Female", "1", "Yes", "No", "8", "Yes", "Yes", "Fiber optic", "No", "No", "Yes", "No", "Yes", "Yes", "Two year", "Yes", "Electronic check", "99.65", "820.5"],
];

pub fn corpus_labels() -> Vec<f64> {
    vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0]
}

fn corpus_rows() -> Vec<Vec<&'static str>> {
    CORPUS.iter().map(|row| row.to_vec()).collect()
}

pub fn sample_dictionary() -> FieldDictionary {
    FieldDictionary::fit(&CUSTOMER_FIELDS, &corpus_rows()).unwrap()
}

fn record_from_row(dictionary: &FieldDictionary, row: &[&str]) -> Record {
    CUSTOMER_FIELDS
        .iter()
        .zip(row)
        .enumerate()
        .map(|(i, (field, token))| {
            let value = match dictionary.kind(i) {
                Some(DimensionKind::Numeric) => json!(token.parse::<f64>().unwrap()),
                _ => Value::String(token.to_string()),
            };
            (field.to_string(), value)
        })
        .collect()
}

pub fn corpus_records() -> Vec<Record> {
    let dictionary = sample_dictionary();
    CORPUS.iter().map(|row| record_from_row(&dictionary, row)).collect()
}

/// First corpus customer: month-to-month contract, tenure 1.
pub fn sample_record() -> Record {
    corpus_records().remove(0)
}

pub fn sample_models() -> ModelRegistry {
    let mut parameters = vec![0.0; CUSTOMER_FIELDS.len() + 1];
    parameters[0] = 1.0;
    parameters[1 + TENURE] = -0.02;

    let tree = TreeModel::new(
        CUSTOMER_FIELDS.len(),
        vec![
            TreeNode::Split { feature: CONTRACT, threshold: 0.5, left: 1, right: 2 },
            TreeNode::Leaf { value: 1.0 },
            TreeNode::Leaf { value: 0.0 },
        ],
    )
    .unwrap();

    let mut contract_weights = vec![0.0; CUSTOMER_FIELDS.len()];
    contract_weights[CONTRACT] = -6.0;
    let network = NetworkModel::new(vec![
        LayerSpec::Dense {
            weights: vec![contract_weights, vec![0.0; CUSTOMER_FIELDS.len()]],
            bias: vec![2.0, 0.0],
        },
        LayerSpec::Activation { activation: Activation::Sigmoid },
        LayerSpec::Dense { weights: vec![vec![1.0, 0.0]], bias: vec![0.0] },
    ])
    .unwrap();

    let mut registry = ModelRegistry::new();
    registry.insert("linear", Model::Linear(LinearModel::new(parameters).unwrap()));
    registry.insert("tree", Model::Tree(tree));
    registry.insert("nn", Model::Network(network));
    registry
}

pub fn sample_engine() -> ServingEngine {
    let encoder = FeatureEncoder::from_dictionary(Arc::new(sample_dictionary()));
    let features = encoder.encode_batch(&corpus_records()).unwrap();
    let mut scaler = FeatureScaler::new();
    scaler.fit(&features).unwrap();

    ServingEngine::new(encoder, scaler, sample_models())
        .with_holdout(Holdout::new(features, corpus_labels()).unwrap())
}

/// Write every fixture artifact under `dir` and return a config pointing at them.
pub fn write_artifacts(dir: &Path) -> Config {
    let engine = sample_engine();
    let models_dir = dir.join("models");
    std::fs::create_dir_all(&models_dir).unwrap();

    let write = |path: &Path, value: String| std::fs::write(path, value).unwrap();

    write(&dir.join("dictionary.json"), serde_json::to_string(engine.encoder().dictionary()).unwrap());

    let mut scaler = FeatureScaler::new();
    scaler.fit(engine.holdout().unwrap().features()).unwrap();
    write(&dir.join("scaler.json"), serde_json::to_string(&scaler).unwrap());

    for (id, model) in sample_models().iter() {
        write(&models_dir.join(format!("{id}.json")), serde_json::to_string(model).unwrap());
    }

    let holdout = HoldoutFile {
        records: corpus_records(),
        labels: corpus_labels(),
    };
    write(&dir.join("holdout.json"), serde_json::to_string(&holdout).unwrap());

    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        dictionary_path: dir.join("dictionary.json"),
        scaler_path: dir.join("scaler.json"),
        models_dir,
        holdout_path: Some(dir.join("holdout.json")),
        log_filter: "off".to_string(),
    }
}
