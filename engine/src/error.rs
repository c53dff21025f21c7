use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Failures raised by the serving core. Every variant is detected at the point
/// of occurrence and handed back to the caller; nothing here is retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServeError {
    #[error("Missing field: {field}")]
    MissingField { field: String },

    #[error("Unknown token {token:?} for field {field}")]
    UnknownToken { field: String, token: String },

    #[error("Unsupported value for field {field}: expected a string, number or boolean")]
    InvalidValue { field: String },

    #[error("Field {field} is not part of the fitted dictionary")]
    UnknownDimension { field: String },

    #[error("Scaler used before it was fitted")]
    NotFitted,

    #[error("Dimension mismatch: expected {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Length mismatch: {predictions} predictions for {labels} labels")]
    LengthMismatch { predictions: usize, labels: usize },

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Invalid ground-truth label at row {row}: {value}")]
    InvalidLabel { row: usize, value: f64 },

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Invalid model {model}: {reason}")]
    InvalidModel { model: String, reason: String },
}

pub type ServeResult<T> = Result<T, ServeError>;

/// Errors surfaced by the HTTP layer and by artifact loading.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Serve(#[from] ServeError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Serve(ServeError::UnknownModel(_)) => StatusCode::NOT_FOUND,
            AppError::Serve(
                ServeError::MissingField { .. }
                | ServeError::UnknownToken { .. }
                | ServeError::InvalidValue { .. }
                | ServeError::DimensionMismatch { .. }
                | ServeError::LengthMismatch { .. }
                | ServeError::EmptyInput(_)
                | ServeError::InvalidLabel { .. },
            ) => StatusCode::BAD_REQUEST,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Internal server error: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

// Helper function for creating artifact errors
pub fn artifact_error(path: &std::path::Path, msg: impl std::fmt::Display) -> AppError {
    AppError::Artifact(format!("{}: {}", path.display(), msg))
}
