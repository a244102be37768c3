//! Wire format of the stdio bridge.

use std::{collections::HashMap, fmt};

use {
    serde::{Deserialize, Serialize},
    soulpilot_workflow::{Workflow, WorkflowPatch},
};

/// Every operation the embedding shell can request. Unknown commands fail
/// at parse time rather than reaching the router.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    InitializeSession,
    ResetSession,
    Navigate {
        url: String,
    },
    Click {
        selector: String,
    },
    ClickAtPosition {
        x: f64,
        y: f64,
    },
    Type {
        selector: String,
        text: String,
    },
    GetScreenshot,
    GetPageContent,
    StartRecording,
    StopRecording,
    SaveWorkflow {
        workflow: Workflow,
    },
    ListWorkflows,
    GetWorkflow {
        id: String,
    },
    UpdateWorkflow {
        id: String,
        patch: WorkflowPatch,
    },
    DeleteWorkflow {
        id: String,
    },
    ExecuteWorkflow {
        id: String,
        #[serde(default)]
        params: HashMap<String, serde_json::Value>,
    },
    CleanupSession,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InitializeSession => "initialize_session",
            Self::ResetSession => "reset_session",
            Self::Navigate { .. } => "navigate",
            Self::Click { .. } => "click",
            Self::ClickAtPosition { .. } => "click_at_position",
            Self::Type { .. } => "type",
            Self::GetScreenshot => "get_screenshot",
            Self::GetPageContent => "get_page_content",
            Self::StartRecording => "start_recording",
            Self::StopRecording => "stop_recording",
            Self::SaveWorkflow { .. } => "save_workflow",
            Self::ListWorkflows => "list_workflows",
            Self::GetWorkflow { .. } => "get_workflow",
            Self::UpdateWorkflow { .. } => "update_workflow",
            Self::DeleteWorkflow { .. } => "delete_workflow",
            Self::ExecuteWorkflow { .. } => "execute_workflow",
            Self::CleanupSession => "cleanup_session",
        };
        f.write_str(name)
    }
}

/// Uniform response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Workflow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflows: Option<Vec<Workflow>>,
}

impl CommandResponse {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            data: None,
            workflow: None,
            workflows: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            data: None,
            workflow: None,
            workflows: None,
        }
    }

    #[must_use]
    pub fn with_data(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::ok()
        }
    }

    #[must_use]
    pub fn with_workflow(workflow: Workflow) -> Self {
        Self {
            workflow: Some(workflow),
            ..Self::ok()
        }
    }

    #[must_use]
    pub fn with_workflows(workflows: Vec<Workflow>) -> Self {
        Self {
            workflows: Some(workflows),
            ..Self::ok()
        }
    }
}
