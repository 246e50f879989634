// app/src/errors.rs

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use tallyflow::SagaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("Validation Error: {0}")]
  Validation(String),

  #[error("Authentication Failed: {0}")]
  Auth(String),

  #[error("Forbidden: {0}")]
  Forbidden(String),

  #[error("Resource Not Found: {0}")]
  NotFound(String),

  #[error("Conflict: {0}")]
  Conflict(String),

  /// Provider misconfigured or unreachable. Fatal to this attempt, retryable later.
  #[error("Payment gateway {provider} unavailable: {reason}")]
  GatewayUnavailable { provider: String, reason: String },

  /// Provider reports a non-terminal or non-success state.
  #[error("Payment via {provider} not completed (status: {status})")]
  PaymentNotCompleted { provider: String, status: String },

  /// Neither a live cart, a pending snapshot nor a gateway echo could rebuild the order.
  #[error("Cannot reconstruct order: {0}")]
  EmptyCart(String),

  #[error("Refund via {provider} failed: {reason}")]
  RefundFailed { provider: String, reason: String },

  #[error("Invalid promo: {0}")]
  InvalidPromo(String),

  #[error("Invalid schedule: {0}")]
  InvalidSchedule(String),

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Database Error: {0}")]
  Sqlx(#[from] sqlx::Error),

  #[error("Saga Error: {source}")]
  Saga {
    #[from]
    source: SagaError,
  },

  #[error("Internal Server Error: {0}")]
  Internal(String),

  #[error("Saga execution was halted by a handler.")]
  SagaHalted,
}

impl AppError {
  pub fn gateway_unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
    AppError::GatewayUnavailable {
      provider: provider.into(),
      reason: reason.into(),
    }
  }

  pub fn not_completed(provider: impl Into<String>, status: impl Into<String>) -> Self {
    AppError::PaymentNotCompleted {
      provider: provider.into(),
      status: status.into(),
    }
  }

  pub fn refund_failed(provider: impl Into<String>, reason: impl Into<String>) -> Self {
    AppError::RefundFailed {
      provider: provider.into(),
      reason: reason.into(),
    }
  }

  /// Text safe to show an end user. Provider and database detail stays in the logs.
  pub fn user_message(&self) -> String {
    match self {
      AppError::Validation(m)
      | AppError::Auth(m)
      | AppError::Forbidden(m)
      | AppError::NotFound(m)
      | AppError::Conflict(m)
      | AppError::InvalidPromo(m)
      | AppError::InvalidSchedule(m) => m.clone(),
      AppError::GatewayUnavailable { .. } => "Payment provider is not available right now. Please try again later.".to_string(),
      AppError::PaymentNotCompleted { .. } => "Payment has not been completed yet. Please try again.".to_string(),
      AppError::EmptyCart(_) => "We could not complete your order. Please contact support.".to_string(),
      AppError::RefundFailed { .. } => {
        "The payment provider could not process the refund. The request is still pending.".to_string()
      }
      AppError::SagaHalted => "The request was halted before it completed.".to_string(),
      AppError::Config(_) | AppError::Sqlx(_) | AppError::Saga { .. } | AppError::Internal(_) => {
        "An internal error occurred.".to_string()
      }
    }
  }
}

impl From<anyhow::Error> for AppError {
  fn from(err: anyhow::Error) -> Self {
    let err = match err.downcast::<AppError>() {
      Ok(app_err) => return app_err,
      Err(other) => other,
    };
    match err.downcast::<sqlx::Error>() {
      Ok(db_err) => AppError::Sqlx(db_err),
      Err(other) => AppError::Internal(other.to_string()),
    }
  }
}

impl ResponseError for AppError {
  fn status_code(&self) -> StatusCode {
    match self {
      AppError::Validation(_) | AppError::InvalidPromo(_) | AppError::InvalidSchedule(_) => StatusCode::BAD_REQUEST,
      AppError::Auth(_) => StatusCode::UNAUTHORIZED,
      AppError::Forbidden(_) => StatusCode::FORBIDDEN,
      AppError::NotFound(_) => StatusCode::NOT_FOUND,
      AppError::Conflict(_) | AppError::SagaHalted => StatusCode::CONFLICT,
      AppError::PaymentNotCompleted { .. } => StatusCode::PAYMENT_REQUIRED,
      AppError::EmptyCart(_) => StatusCode::UNPROCESSABLE_ENTITY,
      AppError::GatewayUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
      AppError::RefundFailed { .. } => StatusCode::BAD_GATEWAY,
      AppError::Config(_) | AppError::Sqlx(_) | AppError::Saga { .. } | AppError::Internal(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    }
  }

  fn error_response(&self) -> HttpResponse {
    let status = self.status_code();
    if status.is_server_error() {
      tracing::error!(application_error = %self, "Responding with error");
    } else {
      tracing::warn!(application_error = %self, "Responding with error");
    }
    HttpResponse::build(status).json(json!({ "error": self.user_message() }))
  }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
