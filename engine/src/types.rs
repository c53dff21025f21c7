use crate::{evaluation::ClassificationReport, features::Record, models::ModelKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub model: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPredictRequest {
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPredictResponse {
    pub model: String,
    pub scores: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub records: Vec<Record>,
    pub labels: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluateResponse {
    pub model: String,
    pub report: ClassificationReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub id: String,
    pub kind: ModelKind,
    pub input_dim: usize,
    pub scaled_input: bool,
}

/// On-disk holdout set: raw records plus their ground-truth labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldoutFile {
    pub records: Vec<Record>,
    pub labels: Vec<f64>,
}
