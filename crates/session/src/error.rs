//! Session error types.

use thiserror::Error;

/// Errors that can occur while driving a browser session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("session not initialized")]
    NotInitialized,

    #[error("navigation failed: {0}")]
    NavigationFailed(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("JavaScript evaluation failed: {0}")]
    JsEvalFailed(String),

    #[error("screenshot failed: {0}")]
    ScreenshotFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<chromiumoxide::error::CdpError> for SessionError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        SessionError::Cdp(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
