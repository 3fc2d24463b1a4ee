use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use matchforge_engine::{EngineError, ErrorKind};
use serde::Serialize;

/// API error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<String>,
}

impl ErrorResponse {
  pub fn new(error: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: None,
    }
  }

  pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: Some(details.into()),
    }
  }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
  Engine(EngineError),
  ValidationError(String),
  Unauthorized,
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    match self {
      AppError::Engine(err) => {
        let (status, message) = match err.kind() {
          ErrorKind::NotFound => (StatusCode::NOT_FOUND, "Not found"),
          ErrorKind::Conflict => (StatusCode::CONFLICT, "Conflict"),
          ErrorKind::Invalid => (StatusCode::BAD_REQUEST, "Bad request"),
          // Capacity signal, the caller may retry later
          ErrorKind::Exhausted => (StatusCode::NOT_FOUND, "Nothing available"),
          ErrorKind::Fatal => {
            tracing::error!(?err, "fatal engine error");
            let error_response = ErrorResponse::new("An internal error occurred.");
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(error_response)).into_response();
          }
        };
        tracing::debug!(%err, "request rejected by engine");

        let error_response = ErrorResponse::with_details(message, err.to_string());
        (status, Json(error_response)).into_response()
      }
      AppError::ValidationError(msg) => {
        tracing::warn!(validation_error = %msg, "Validation failed");
        let error_response = ErrorResponse::new(msg);
        (StatusCode::BAD_REQUEST, Json(error_response)).into_response()
      }
      AppError::Unauthorized => {
        let error_response = ErrorResponse::new("Invalid or missing credential");
        (StatusCode::UNAUTHORIZED, Json(error_response)).into_response()
      }
    }
  }
}

impl From<EngineError> for AppError {
  fn from(err: EngineError) -> Self {
    AppError::Engine(err)
  }
}

impl From<crate::validation::ValidationError> for AppError {
  fn from(err: crate::validation::ValidationError) -> Self {
    AppError::ValidationError(err.to_string())
  }
}
