use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::Value;
use std::{sync::Arc, time::Instant};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    engine::ServingEngine,
    error::{AppError, ServeError},
    features::Record,
    types::{
        BatchPredictRequest, BatchPredictResponse, EvaluateRequest, EvaluateResponse, ModelSummary,
        PredictResponse,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ServingEngine>,
    pub metrics: Option<PrometheusHandle>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/models", get(list_models))
        .route("/:model/predict", post(predict))
        .route("/:model/predict/batch", post(predict_batch))
        .route("/:model/stats", get(stats))
        .route("/:model/evaluate", post(evaluate))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn count_error(model: &str) -> impl FnOnce(&ServeError) + '_ {
    move |_| metrics::counter!("request_errors_total", "model" => model.to_string()).increment(1)
}

async fn index() -> &'static str {
    "Customer Credit Risk Modelling"
}

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "models": state.engine.model_count(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.as_ref().map(|h| h.render()).unwrap_or_default()
}

async fn list_models(State(state): State<AppState>) -> Json<Vec<ModelSummary>> {
    Json(state.engine.model_summaries())
}

pub async fn predict(
    State(state): State<AppState>,
    Path(model): Path<String>,
    Json(record): Json<Record>,
) -> Result<Json<PredictResponse>, AppError> {
    let start = Instant::now();
    metrics::counter!("predict_requests_total", "model" => model.clone()).increment(1);

    let score = state
        .engine
        .predict_record(&model, &record)
        .inspect_err(count_error(&model))?;

    metrics::histogram!("predict_duration_ms", "model" => model.clone())
        .record(start.elapsed().as_secs_f64() * 1000.0);

    Ok(Json(PredictResponse { model, score }))
}

pub async fn predict_batch(
    State(state): State<AppState>,
    Path(model): Path<String>,
    Json(request): Json<BatchPredictRequest>,
) -> Result<Json<BatchPredictResponse>, AppError> {
    metrics::counter!("predict_requests_total", "model" => model.clone())
        .increment(request.records.len() as u64);

    let scores = state
        .engine
        .predict_records(&model, &request.records)
        .inspect_err(count_error(&model))?;

    Ok(Json(BatchPredictResponse { model, scores }))
}

/// Text classification report on the holdout set loaded at startup.
pub async fn stats(
    State(state): State<AppState>,
    Path(model): Path<String>,
) -> Result<String, AppError> {
    metrics::counter!("evaluate_requests_total", "model" => model.clone()).increment(1);

    let report = state
        .engine
        .holdout_report(&model)
        .inspect_err(count_error(&model))?
        .ok_or_else(|| AppError::ServiceUnavailable("no holdout set loaded".to_string()))?;

    Ok(report.to_string())
}

pub async fn evaluate(
    State(state): State<AppState>,
    Path(model): Path<String>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<EvaluateResponse>, AppError> {
    metrics::counter!("evaluate_requests_total", "model" => model.clone()).increment(1);

    let report = state
        .engine
        .evaluate_records(&model, &request.records, &request.labels)
        .inspect_err(count_error(&model))?;

    Ok(Json(EvaluateResponse { model, report }))
}
