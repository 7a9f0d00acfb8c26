//! Request-level errors and their HTTP mapping.
//!
//! Input problems are 4xx with a descriptive message; storage and extraction
//! failures are logged and answered with a generic 5xx message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::extract::ExtractError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("{0}")]
  BadRequest(String),

  #[error("{0}")]
  NotFound(String),

  #[error("could not read document: {0}")]
  Unprocessable(#[from] ExtractError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("internal error: {0}")]
  Internal(String),
}

impl AppError {
  pub fn bad_request(msg: impl Into<String>) -> Self {
    Self::BadRequest(msg.into())
  }

  pub fn not_found(msg: impl Into<String>) -> Self {
    Self::NotFound(msg.into())
  }

  pub fn status(&self) -> StatusCode {
    match self {
      AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
      AppError::NotFound(_) => StatusCode::NOT_FOUND,
      AppError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
      AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl From<std::io::Error> for AppError {
  fn from(e: std::io::Error) -> Self {
    AppError::Internal(e.to_string())
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let status = self.status();
    let message = if status.is_server_error() {
      error!(target: "hurdle_reader", error = %self, "Request failed");
      "Internal server error".to_string()
    } else {
      self.to_string()
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}

pub type AppResult<T> = Result<T, AppError>;
