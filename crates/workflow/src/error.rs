//! Workflow error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("workflow not found: {id}")]
    NotFound { id: String },

    #[error("workflow id must not be empty")]
    MissingId,

    #[error("invalid step {index}: {message}")]
    InvalidStep { index: usize, message: String },

    #[error("step {index} ({action}) failed after {attempts} attempt(s): {message}")]
    StepFailed {
        index: usize,
        action: String,
        attempts: u32,
        message: String,
    },

    #[error("js conditions are disabled for this runner")]
    JsConditionsDisabled,

    #[error(transparent)]
    Session(#[from] soulpilot_session::SessionError),
}

impl Error {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn invalid_step(index: usize, message: impl Into<String>) -> Self {
        Self::InvalidStep {
            index,
            message: message.into(),
        }
    }

    pub fn step_failed(
        index: usize,
        action: impl Into<String>,
        attempts: u32,
        message: impl Into<String>,
    ) -> Self {
        Self::StepFailed {
            index,
            action: action.into(),
            attempts,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
