//! Maps bridge commands onto the session and workflow subsystems.

use std::sync::Arc;

use {
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    soulpilot_session::{EventConsumerFn, SessionHandle, SessionSupervisor},
    soulpilot_workflow::{Recorder, WorkflowRunner, WorkflowStore},
    tracing::info,
};

use crate::command::{Command, CommandResponse};

pub struct Bridge {
    supervisor: Arc<SessionSupervisor>,
    recorder: Arc<Recorder>,
    store: Arc<dyn WorkflowStore>,
    runner: WorkflowRunner,
    consumer: EventConsumerFn,
}

impl Bridge {
    #[must_use]
    pub fn new(
        supervisor: Arc<SessionSupervisor>,
        store: Arc<dyn WorkflowStore>,
        runner: WorkflowRunner,
        consumer: EventConsumerFn,
    ) -> Self {
        Self {
            supervisor,
            recorder: Arc::new(Recorder::new()),
            store,
            runner,
            consumer,
        }
    }

    /// Handle one command. Every arm produces a response; failures are
    /// reported in-band rather than escalated.
    pub async fn dispatch(&self, command: Command) -> CommandResponse {
        info!(command = %command, "dispatching bridge command");

        match command {
            Command::InitializeSession => {
                if self.supervisor.initialize(self.consumer.clone()).await {
                    CommandResponse::ok()
                } else {
                    CommandResponse::error("browser session failed to start")
                }
            }
            Command::ResetSession => {
                if self.supervisor.reset().await {
                    CommandResponse::ok()
                } else {
                    CommandResponse::error("session reset failed")
                }
            }
            Command::Navigate { url } => match self.session().await {
                Some(handle) => {
                    if handle.navigate(&url).await {
                        CommandResponse::ok()
                    } else {
                        CommandResponse::error(format!("navigation to '{url}' failed"))
                    }
                }
                None => Self::no_session(),
            },
            Command::Click { selector } => match self.session().await {
                Some(handle) => {
                    if handle.click(&selector).await {
                        CommandResponse::ok()
                    } else {
                        CommandResponse::error(format!("click on '{selector}' failed"))
                    }
                }
                None => Self::no_session(),
            },
            Command::ClickAtPosition { x, y } => match self.session().await {
                Some(handle) => {
                    if handle.click_at_position(x, y).await {
                        CommandResponse::ok()
                    } else {
                        CommandResponse::error("coordinate click failed")
                    }
                }
                None => Self::no_session(),
            },
            Command::Type { selector, text } => match self.session().await {
                Some(handle) => {
                    if handle.type_text(&selector, &text).await {
                        CommandResponse::ok()
                    } else {
                        CommandResponse::error(format!("typing into '{selector}' failed"))
                    }
                }
                None => Self::no_session(),
            },
            Command::GetScreenshot => match self.session().await {
                Some(handle) => match handle.screenshot().await {
                    Some(bytes) => CommandResponse::with_data(serde_json::json!({
                        "screenshot": BASE64.encode(bytes),
                    })),
                    None => CommandResponse::error("screenshot unavailable"),
                },
                None => Self::no_session(),
            },
            Command::GetPageContent => match self.session().await {
                Some(handle) => match handle.content().await {
                    Some(content) => {
                        let url = handle.current_url().await.unwrap_or_default();
                        CommandResponse::with_data(serde_json::json!({
                            "content": content,
                            "url": url,
                        }))
                    }
                    None => CommandResponse::error("page content unavailable"),
                },
                None => Self::no_session(),
            },
            Command::StartRecording => match self.session().await {
                Some(handle) => {
                    if self.recorder.start(&handle).await {
                        CommandResponse::ok()
                    } else {
                        CommandResponse::error("a recording is already active")
                    }
                }
                None => Self::no_session(),
            },
            Command::StopRecording => {
                let handle = self.session().await;
                match self.recorder.stop(handle.as_ref()).await {
                    // The draft is only returned; persisting it is the
                    // caller's save_workflow call.
                    Some(workflow) => CommandResponse::with_workflow(workflow),
                    None => CommandResponse::error("no active recording"),
                }
            }
            Command::SaveWorkflow { workflow } => match self.store.save(workflow.clone()).await {
                Ok(()) => CommandResponse::with_workflow(workflow),
                Err(e) => CommandResponse::error(e.to_string()),
            },
            Command::ListWorkflows => match self.store.list().await {
                Ok(workflows) => CommandResponse::with_workflows(workflows),
                Err(e) => CommandResponse::error(e.to_string()),
            },
            Command::GetWorkflow { id } => match self.store.get(&id).await {
                Ok(Some(workflow)) => CommandResponse::with_workflow(workflow),
                Ok(None) => CommandResponse::error(format!("workflow not found: {id}")),
                Err(e) => CommandResponse::error(e.to_string()),
            },
            Command::UpdateWorkflow { id, patch } => match self.store.update(&id, patch).await {
                Ok(workflow) => CommandResponse::with_workflow(workflow),
                Err(e) => CommandResponse::error(e.to_string()),
            },
            Command::DeleteWorkflow { id } => match self.store.delete(&id).await {
                Ok(true) => CommandResponse::ok(),
                Ok(false) => CommandResponse::error(format!("workflow not found: {id}")),
                Err(e) => CommandResponse::error(e.to_string()),
            },
            Command::ExecuteWorkflow { id, params } => {
                let workflow = match self.store.get(&id).await {
                    Ok(Some(workflow)) => workflow,
                    Ok(None) => return CommandResponse::error(format!("workflow not found: {id}")),
                    Err(e) => return CommandResponse::error(e.to_string()),
                };
                let Some(handle) = self.session().await else {
                    return Self::no_session();
                };
                match self.runner.run(&handle, &workflow, &params).await {
                    Ok(()) => CommandResponse::ok(),
                    Err(e) => CommandResponse::error(e.to_string()),
                }
            }
            Command::CleanupSession => {
                self.supervisor.cleanup().await;
                CommandResponse::ok()
            }
        }
    }

    async fn session(&self) -> Option<Arc<SessionHandle>> {
        self.supervisor.handle().await
    }

    fn no_session() -> CommandResponse {
        CommandResponse::error("no active session, call initialize_session first")
    }
}
