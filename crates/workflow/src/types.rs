//! Workflow data model.
//!
//! The JSON shape is the persistence and wire format at the same time, so
//! every field here is camelCase and optional fields are omitted when unset.

use std::{
    collections::HashMap,
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    serde::{Deserialize, Serialize},
    soulpilot_session::RecordedAction,
    uuid::Uuid,
};

use crate::error::{Error, Result};

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// What a step does during replay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StepAction {
    Navigate,
    Click,
    Type,
    Wait,
    WaitForSelector,
    Screenshot,
    Conditional,
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Navigate => "navigate",
            Self::Click => "click",
            Self::Type => "type",
            Self::Wait => "wait",
            Self::WaitForSelector => "waitForSelector",
            Self::Screenshot => "screenshot",
            Self::Conditional => "conditional",
        };
        f.write_str(name)
    }
}

/// Per-action arguments. One bag of optionals rather than per-action structs
/// so recorded documents stay hand-editable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct StepPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Milliseconds, for `wait`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    /// Milliseconds, for `waitForSelector`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

fn default_retry_delay() -> u64 {
    1_000
}

/// Bounded retry budget for one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetryOptions {
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    /// Milliseconds between attempts.
    #[serde(default = "default_retry_delay")]
    pub delay: u64,
}

/// The two arms of a conditional step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalBranch {
    /// `selector:<css>`, `js:<expr>`, or a bare value tested for
    /// non-emptiness after parameter substitution.
    pub condition: String,
    pub true_steps: Vec<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub false_steps: Option<Vec<Step>>,
}

/// One replayable action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub action: StepAction,
    #[serde(default)]
    pub payload: StepPayload,
    /// Capture time, epoch milliseconds.
    #[serde(default = "now_ms")]
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_options: Option<RetryOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditional_branch: Option<ConditionalBranch>,
}

impl Step {
    fn bare(action: StepAction, payload: StepPayload) -> Self {
        Self {
            action,
            payload,
            timestamp: now_ms(),
            retry_options: None,
            conditional_branch: None,
        }
    }

    #[must_use]
    pub fn navigate(url: impl Into<String>) -> Self {
        Self::bare(
            StepAction::Navigate,
            StepPayload {
                url: Some(url.into()),
                ..StepPayload::default()
            },
        )
    }

    #[must_use]
    pub fn click(selector: impl Into<String>) -> Self {
        Self::bare(
            StepAction::Click,
            StepPayload {
                selector: Some(selector.into()),
                ..StepPayload::default()
            },
        )
    }

    #[must_use]
    pub fn type_text(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Self::bare(
            StepAction::Type,
            StepPayload {
                selector: Some(selector.into()),
                text: Some(text.into()),
                ..StepPayload::default()
            },
        )
    }

    #[must_use]
    pub fn wait(duration_ms: u64) -> Self {
        Self::bare(
            StepAction::Wait,
            StepPayload {
                duration: Some(duration_ms),
                ..StepPayload::default()
            },
        )
    }

    #[must_use]
    pub fn wait_for_selector(selector: impl Into<String>, timeout_ms: Option<u64>) -> Self {
        Self::bare(
            StepAction::WaitForSelector,
            StepPayload {
                selector: Some(selector.into()),
                timeout: timeout_ms,
                ..StepPayload::default()
            },
        )
    }

    #[must_use]
    pub fn screenshot() -> Self {
        Self::bare(StepAction::Screenshot, StepPayload::default())
    }

    #[must_use]
    pub fn conditional(branch: ConditionalBranch) -> Self {
        let mut step = Self::bare(StepAction::Conditional, StepPayload::default());
        step.conditional_branch = Some(branch);
        step
    }

    /// Structural validation, recursing into conditional branches.
    pub fn validate(&self, index: usize) -> Result<()> {
        let require = |field: Option<&String>, name: &str| -> Result<()> {
            match field {
                Some(value) if !value.trim().is_empty() => Ok(()),
                _ => Err(Error::invalid_step(
                    index,
                    format!("{} requires a non-empty '{name}'", self.action),
                )),
            }
        };

        match self.action {
            StepAction::Navigate => require(self.payload.url.as_ref(), "url")?,
            StepAction::WaitForSelector => {
                require(self.payload.selector.as_ref(), "selector")?;
            }
            // Recorded clicks and typing may carry an empty selector when
            // no stable selector could be derived; such steps replay as
            // no-ops, so they are valid.
            StepAction::Click | StepAction::Type => {}
            StepAction::Wait | StepAction::Screenshot => {}
            StepAction::Conditional => {
                let Some(branch) = &self.conditional_branch else {
                    return Err(Error::invalid_step(
                        index,
                        "conditional requires a conditionalBranch",
                    ));
                };
                if branch.condition.trim().is_empty() {
                    return Err(Error::invalid_step(index, "condition must not be empty"));
                }
                for (i, step) in branch.true_steps.iter().enumerate() {
                    step.validate(i)?;
                }
                if let Some(false_steps) = &branch.false_steps {
                    for (i, step) in false_steps.iter().enumerate() {
                        step.validate(i)?;
                    }
                }
            }
        }

        if self.action != StepAction::Conditional && self.conditional_branch.is_some() {
            return Err(Error::invalid_step(
                index,
                format!("{} must not carry a conditionalBranch", self.action),
            ));
        }

        Ok(())
    }
}

impl From<RecordedAction> for Step {
    fn from(action: RecordedAction) -> Self {
        match action {
            RecordedAction::Navigate { url } => Self::navigate(url),
            RecordedAction::Click { selector } => Self::click(selector),
            RecordedAction::Type { selector, text } => Self::type_text(selector, text),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Boolean,
}

/// Declares a `{name}` placeholder a workflow expects at execution time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParameterSpec {
    pub description: String,
    #[serde(rename = "type")]
    pub kind: ParameterType,
}

/// A named, persisted sequence of steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Epoch milliseconds.
    pub created_at: u64,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<HashMap<String, ParameterSpec>>,
}

impl Workflow {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            created_at: now_ms(),
            steps: Vec::new(),
            parameters: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::MissingId);
        }
        for (index, step) in self.steps.iter().enumerate() {
            step.validate(index)?;
        }
        Ok(())
    }
}

/// Partial update applied by [`WorkflowStore::update`](crate::WorkflowStore::update).
/// Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub steps: Option<Vec<Step>>,
    pub parameters: Option<HashMap<String, ParameterSpec>>,
}
