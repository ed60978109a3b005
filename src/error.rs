//! Error taxonomy shared by the session, the aligner and the HTTP layer.

use serde::Serialize;
use thiserror::Error;

use crate::session::Stage;

/// Local, non-fatal: blocks submission, never changes session state.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
  #[error("answer is empty")]
  Empty,
  #[error("answer must be written in English")]
  NotEnglish,
  #[error("at least {min} words required (currently {count})")]
  TooFewWords { count: usize, min: usize },
  #[error("at most {max} words allowed (currently {count})")]
  TooManyWords { count: usize, max: usize },
}

/// Local, user-visible: the grader returned fewer sentence records than slots.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlignmentError {
  #[error("expected {expected} sentence records, received {received}")]
  MissingRecords { expected: usize, received: usize },
}

/// External, recoverable: a collaborator answered with an error payload or the
/// transport failed. Surfaced to the learner verbatim.
#[derive(Clone, Debug, Error, PartialEq, Serialize)]
#[error("{error}")]
pub struct ProviderError {
  pub error: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<serde_json::Value>,
}

impl ProviderError {
  pub fn new(error: impl Into<String>) -> Self {
    Self { error: error.into(), details: None }
  }

  pub fn with_details(error: impl Into<String>, details: serde_json::Value) -> Self {
    Self { error: error.into(), details: Some(details) }
  }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum SessionError {
  #[error("{action} is not allowed while {stage:?}")]
  InvalidTransition { action: &'static str, stage: Stage },
  #[error("this question uses {expected} input")]
  WrongInputMode { expected: &'static str },
  #[error("no sentence slot {index} (question has {count})")]
  NoSuchSlot { index: usize, count: usize },
  #[error(transparent)]
  Validation(#[from] ValidationError),
  /// The response belongs to a superseded question or draft.
  #[error("stale response discarded")]
  StaleResponse,
}

/// Failures of the collaborator operations, mapped to HTTP statuses by the routes.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ServiceError {
  #[error("Invalid request")]
  BadRequest { details: serde_json::Value },
  #[error("{0}")]
  NotFound(String),
  #[error("{0}")]
  Upstream(String),
}

impl From<ServiceError> for ProviderError {
  fn from(e: ServiceError) -> Self {
    match e {
      ServiceError::BadRequest { details } => ProviderError::with_details("Invalid request", details),
      other => ProviderError::new(other.to_string()),
    }
  }
}
