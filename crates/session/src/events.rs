//! Events pushed from the session core to the UI consumer.

use std::fmt;

use serde::Serialize;

/// Fire-and-forget notifications emitted by a session handle, the recorder,
/// the workflow runner, and the supervisor. Binary payloads (screenshots)
/// are base64-encoded before emission.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Ready,
    Loading {
        url: String,
    },
    Navigated {
        url: String,
    },
    Loaded,
    NavigationError {
        url: String,
        error: String,
    },
    Screenshot {
        data: String,
    },
    RecordingStarted {
        workflow_id: String,
    },
    RecordingStopped {
        workflow_id: String,
    },
    ActionRecorded {
        step: serde_json::Value,
    },
    WorkflowStarted {
        workflow_id: String,
    },
    WorkflowStep {
        index: usize,
        action: String,
    },
    WorkflowStepCompleted {
        index: usize,
    },
    WorkflowComplete {
        workflow_id: String,
    },
    WorkflowError {
        index: usize,
        action: String,
        error: String,
    },
    WorkflowScreenshot {
        index: usize,
        data: String,
    },
    BrowserReset {
        automatic: bool,
    },
}

impl SessionEvent {
    /// Stable event name, matching the serialized `event` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Loading { .. } => "loading",
            Self::Navigated { .. } => "navigated",
            Self::Loaded => "loaded",
            Self::NavigationError { .. } => "navigation_error",
            Self::Screenshot { .. } => "screenshot",
            Self::RecordingStarted { .. } => "recording_started",
            Self::RecordingStopped { .. } => "recording_stopped",
            Self::ActionRecorded { .. } => "action_recorded",
            Self::WorkflowStarted { .. } => "workflow_started",
            Self::WorkflowStep { .. } => "workflow_step",
            Self::WorkflowStepCompleted { .. } => "workflow_step_completed",
            Self::WorkflowComplete { .. } => "workflow_complete",
            Self::WorkflowError { .. } => "workflow_error",
            Self::WorkflowScreenshot { .. } => "workflow_screenshot",
            Self::BrowserReset { .. } => "browser_reset",
        }
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

pub type EventSender = tokio::sync::mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<SessionEvent>;
