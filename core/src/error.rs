// balmap/src/error.rs
use anyhow::Error as AnyhowError;
use thiserror::Error;

use crate::core::stage::Stage;

/// Failure of a single work item inside a stage function.
///
/// This is the payload of the error envelope that travels through the
/// pipeline in place of the item. It is cheap to clone and comparable so
/// drivers and tests can collect and inspect failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stage '{stage}' failed: {message}")]
pub struct StageError {
  pub stage: Stage,
  pub message: String,
}

impl StageError {
  pub fn new(stage: Stage, message: impl Into<String>) -> Self {
    Self {
      stage,
      message: message.into(),
    }
  }

  /// Renders the full `anyhow` chain ("outer: inner: root") into the message.
  pub(crate) fn from_anyhow(stage: Stage, err: &AnyhowError) -> Self {
    Self::new(stage, format!("{:#}", err))
  }
}

#[derive(Debug, Error)]
pub enum BalmapError {
  #[error("Configuration error for '{field}': {message}")]
  Configuration { field: String, message: String },

  #[error("Failed to spawn {what}. Source: {source}")]
  Spawn {
    what: String,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Stage(#[from] StageError),

  #[error("Channel '{channel}' disconnected")]
  Disconnected { channel: String },

  #[error("Worker process {process} panicked")]
  ProcessPanicked { process: usize },

  #[error("Signal handling failed: {0}")]
  Signal(String),

  #[error("Error in user-provided code or external operation. Source: {source}")]
  Handler {
    #[source]
    source: AnyhowError,
  },

  #[error("Internal balmap error: {0}")]
  Internal(String),
}

impl BalmapError {
  pub(crate) fn configuration(field: &str, message: impl Into<String>) -> Self {
    BalmapError::Configuration {
      field: field.to_string(),
      message: message.into(),
    }
  }

  pub(crate) fn disconnected(channel: &str) -> Self {
    BalmapError::Disconnected {
      channel: channel.to_string(),
    }
  }
}

// This is the key conversion balmap provides for external errors.
impl From<AnyhowError> for BalmapError {
  fn from(err: AnyhowError) -> Self {
    // Unwrap a StageError that was bubbled through anyhow so callers can still match on it.
    match err.downcast::<StageError>() {
      Ok(stage_err) => BalmapError::Stage(stage_err),
      Err(err) => BalmapError::Handler { source: err },
    }
  }
}

pub type BalmapResult<T, E = BalmapError> = std::result::Result<T, E>;
