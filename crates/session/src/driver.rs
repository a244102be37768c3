//! The capability seam between the session handle and a real browser.

use std::{sync::Arc, time::Duration};

use {async_trait::async_trait, serde::Deserialize};

use crate::{
    error::Result,
    types::{RecordedAction, SessionConfig},
};

/// An interaction captured by the in-page recorder script and drained
/// through [`PageDriver::drain_recorded`].
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PageRecordedEvent {
    pub kind: String,
    pub selector: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Primitive operations against one live browser page.
///
/// All methods return `Result`; the [`SessionHandle`](crate::SessionHandle)
/// is responsible for translating failures into its non-throwing surface.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate to `url`, bounded by `timeout`.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Best-effort stop of an in-flight page load.
    async fn stop_loading(&self) -> Result<()>;

    /// Wait until `selector` matches an element, bounded by `timeout`.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;

    /// Dispatch a click on the first element matching `selector` via in-page
    /// script evaluation.
    async fn click(&self, selector: &str) -> Result<()>;

    /// Synthesize a mouse press/release at viewport coordinates, with an
    /// in-page `elementFromPoint` click as backup.
    async fn click_at(&self, x: f64, y: f64) -> Result<()>;

    /// Focus `selector`, clear its value, and type `text` with the given
    /// inter-keystroke delay.
    async fn type_text(&self, selector: &str, text: &str, delay: Duration) -> Result<()>;

    /// Visually outline the first element matching `selector`.
    async fn highlight(&self, selector: &str) -> Result<()>;

    /// Remove any outlines added by [`Self::highlight`].
    async fn clear_highlight(&self) -> Result<()>;

    /// Capture a PNG screenshot of the viewport.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    /// Current page HTML.
    async fn content(&self) -> Result<String>;

    /// Current page URL.
    async fn current_url(&self) -> Result<String>;

    /// Whether any element matches `selector` right now.
    async fn selector_exists(&self, selector: &str) -> Result<bool>;

    /// Evaluate `expr` in the page context and coerce the result to a bool.
    async fn eval_truthy(&self, expr: &str) -> Result<bool>;

    /// Install the in-page recorder listeners.
    async fn install_recorder(&self) -> Result<()>;

    /// Remove the in-page recorder listeners.
    async fn remove_recorder(&self) -> Result<()>;

    /// Drain interactions queued by the recorder script since the last call.
    async fn drain_recorded(&self) -> Result<Vec<PageRecordedEvent>>;

    /// Close the page and release the underlying browser.
    async fn close(&self) -> Result<()>;
}

/// Launches a fresh [`PageDriver`] for each session. The supervisor holds a
/// factory so it can recreate the session after a liveness failure.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn launch(&self, config: &SessionConfig) -> Result<Arc<dyn PageDriver>>;
}

/// Observer for actions performed on a session while recording is active.
pub trait ActionTap: Send + Sync {
    fn on_action(&self, action: RecordedAction);
}
