//! Session configuration, state, and recorded-action types.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Configuration for a browser session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Run the browser without a visible window.
    pub headless: bool,
    /// Fixed viewport width in CSS pixels.
    pub viewport_width: u32,
    /// Fixed viewport height in CSS pixels.
    pub viewport_height: u32,
    /// Default navigation timeout applied at the CDP transport level.
    pub navigation_timeout_ms: u64,
    /// Timeout for explicit `navigate` calls (shorter than the transport
    /// default so a stuck page load surfaces quickly).
    pub navigate_call_timeout_ms: u64,
    /// Timeout for in-page script evaluation.
    pub script_timeout_ms: u64,
    /// How long `click`/`type` wait for their selector to appear.
    pub selector_timeout_ms: u64,
    /// How long the target element stays visually highlighted before an
    /// interaction.
    pub highlight_duration_ms: u64,
    /// Delay between keystrokes when typing.
    pub typing_delay_ms: u64,
    /// Interval of the screenshot tick (UI preview + supervisor heartbeat).
    pub screenshot_interval_ms: u64,
    /// URL patterns blocked at the network layer. Heavy resource types are
    /// excluded by default for replay performance.
    pub blocked_url_patterns: Vec<String>,
    /// Explicit Chrome/Chromium executable path.
    pub chrome_path: Option<String>,
    /// Extra Chrome command-line arguments.
    pub chrome_args: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 800,
            navigation_timeout_ms: 60_000,
            navigate_call_timeout_ms: 30_000,
            script_timeout_ms: 30_000,
            selector_timeout_ms: 5_000,
            highlight_duration_ms: 500,
            typing_delay_ms: 50,
            screenshot_interval_ms: 2_000,
            blocked_url_patterns: default_blocked_patterns(),
            chrome_path: None,
            chrome_args: Vec::new(),
        }
    }
}

fn default_blocked_patterns() -> Vec<String> {
    [
        "*.woff", "*.woff2", "*.ttf", "*.otf", "*.mp4", "*.webm", "*.avi", "*.mp3", "*.wav",
        "*.flac", "*.ogg",
    ]
    .iter()
    .map(|p| (*p).to_string())
    .collect()
}

/// Lifecycle state of a session handle.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Navigating,
    Closed,
}

/// An action observed on a live session, either performed through the
/// handle's own primitives or captured by the in-page recorder script.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum RecordedAction {
    Navigate { url: String },
    Click { selector: String },
    Type { selector: String, text: String },
}

/// Prefix scheme-less URLs with `https://`.
pub fn normalize_url(url: &str) -> Result<String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(SessionError::InvalidUrl("URL cannot be empty".into()));
    }

    let normalized = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = url::Url::parse(&normalized)
        .map_err(|e| SessionError::InvalidUrl(format!("{normalized}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(normalized),
        scheme => Err(SessionError::InvalidUrl(format!(
            "unsupported scheme '{scheme}', only http/https allowed"
        ))),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_https_scheme() {
        assert_eq!(normalize_url("example.com").unwrap(), "https://example.com");
    }

    #[test]
    fn normalize_keeps_existing_scheme() {
        assert_eq!(
            normalize_url("http://localhost:8080/path").unwrap(),
            "http://localhost:8080/path"
        );
    }

    #[test]
    fn normalize_rejects_empty() {
        assert!(normalize_url("   ").is_err());
    }

    #[test]
    fn normalize_rejects_non_http_scheme() {
        assert!(normalize_url("file:///etc/passwd").is_err());
        assert!(normalize_url("javascript:alert(1)").is_err());
    }

    #[test]
    fn default_config_values() {
        let config = SessionConfig::default();
        assert!(config.headless);
        assert_eq!(config.screenshot_interval_ms, 2_000);
        assert_eq!(config.navigate_call_timeout_ms, 30_000);
        assert_eq!(config.selector_timeout_ms, 5_000);
    }

    #[test]
    fn recorded_action_wire_shape() {
        let action = RecordedAction::Navigate {
            url: "https://example.com".into(),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "navigate");
        assert_eq!(json["url"], "https://example.com");
    }
}
