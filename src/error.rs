//! API error type. Every handler returns `Result<_, ApiError>`; the error renders
//! as `{"detail": "..."}` with the matching status code.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::scenarios::ScenarioError;

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("{0}")]
  BadRequest(String),
  #[error("{0}")]
  Unauthorized(String),
  #[error("{0}")]
  Forbidden(String),
  #[error("{0}")]
  NotFound(String),
  #[error("{0}")]
  Internal(String),
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
      ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl From<rusqlite::Error> for ApiError {
  fn from(e: rusqlite::Error) -> Self {
    error!(target: "tutor_backend", error = %e, "Database error");
    ApiError::Internal(format!("Database error: {}", e))
  }
}

impl From<ScenarioError> for ApiError {
  fn from(e: ScenarioError) -> Self {
    match e {
      ScenarioError::ScenarioNotFound(_) | ScenarioError::ProgressNotFound(_) => ApiError::NotFound(e.to_string()),
      ScenarioError::Invalid(_) | ScenarioError::Factory(_) => ApiError::BadRequest(e.to_string()),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    (status, Json(json!({ "detail": self.to_string() }))).into_response()
  }
}

pub type ApiResult<T> = Result<T, ApiError>;
