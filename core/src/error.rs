// tallyflow/src/error.rs
use anyhow::Error as AnyhowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SagaError {
  #[error("Step not found: {step_name}")]
  StepNotFound { step_name: String },

  #[error("Handler missing for required step: {step_name}")]
  HandlerMissing { step_name: String },

  #[error("Type mismatch while dispatching context (expected {expected_type}, at '{step_name}')")]
  TypeMismatch { step_name: String, expected_type: String },

  #[error("Error in handler or external operation. Source: {source}")]
  HandlerError {
    #[source]
    source: AnyhowError,
  },

  #[error("Configuration error for '{step_name}': {message}")]
  ConfigurationError { step_name: String, message: String },

  #[error("Internal saga engine error: {0}")]
  Internal(String),
}

impl From<AnyhowError> for SagaError {
  fn from(err: AnyhowError) -> Self {
    // An anyhow error that already wraps a SagaError cannot be unwrapped by
    // value, so both cases are carried as HandlerError.
    SagaError::HandlerError { source: err }
  }
}

pub type SagaResult<T, E = SagaError> = std::result::Result<T, E>;
