//! Captures live session actions into a workflow draft.

use std::sync::{Arc, Mutex};

use {
    soulpilot_session::{ActionTap, RecordedAction, SessionEvent, SessionHandle},
    tracing::{info, warn},
};

use crate::types::{Step, StepAction, Workflow};

/// One recording at a time. While active the recorder is attached to the
/// session as its action tap, so both handle-driven actions and in-page
/// interactions land in the draft in the order they happened.
#[derive(Default)]
pub struct Recorder {
    draft: Mutex<Option<Workflow>>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.draft.lock().map(|d| d.is_some()).unwrap_or(false)
    }

    /// Begin a new recording on `handle`. Returns `false` when a recording
    /// is already active.
    pub async fn start(self: &Arc<Self>, handle: &Arc<SessionHandle>) -> bool {
        let workflow_id = {
            let Ok(mut draft) = self.draft.lock() else {
                return false;
            };
            if draft.is_some() {
                warn!("recording already active, start ignored");
                return false;
            }
            let name = format!("Recording {}", chrono::Local::now().format("%Y-%m-%d %H:%M"));
            let workflow = Workflow::new(name);
            let id = workflow.id.clone();
            *draft = Some(workflow);
            id
        };

        if !handle.install_recorder().await {
            warn!("in-page recorder unavailable, capturing handle actions only");
        }
        handle.set_action_tap(Some(self.clone())).await;

        info!(workflow_id = %workflow_id, "recording started");
        handle.emit(SessionEvent::RecordingStarted {
            workflow_id: workflow_id.clone(),
        });
        true
    }

    /// End the active recording and return the captured draft. The draft is
    /// returned even when no session is available for detaching.
    pub async fn stop(&self, handle: Option<&Arc<SessionHandle>>) -> Option<Workflow> {
        let workflow = self.draft.lock().ok().and_then(|mut d| d.take())?;

        if let Some(handle) = handle {
            handle.set_action_tap(None).await;
            handle.remove_recorder().await;
            handle.emit(SessionEvent::RecordingStopped {
                workflow_id: workflow.id.clone(),
            });
        }

        info!(workflow_id = %workflow.id, steps = workflow.steps.len(), "recording stopped");
        Some(workflow)
    }
}

impl ActionTap for Recorder {
    fn on_action(&self, action: RecordedAction) {
        let Ok(mut draft) = self.draft.lock() else {
            return;
        };
        let Some(workflow) = draft.as_mut() else {
            return;
        };

        let step = Step::from(action);

        // Keystroke-by-keystroke input events collapse into one type step
        // per field.
        if step.action == StepAction::Type {
            if let Some(last) = workflow.steps.last_mut() {
                if last.action == StepAction::Type
                    && last.payload.selector == step.payload.selector
                {
                    last.payload.text = step.payload.text;
                    last.timestamp = step.timestamp;
                    return;
                }
            }
        }

        workflow.steps.push(step);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use {
        async_trait::async_trait,
        soulpilot_session::{
            DriverFactory, EventReceiver, PageDriver, PageRecordedEvent, Result as SessionResult,
            SessionConfig,
        },
    };

    use super::*;

    struct NullDriver;

    #[async_trait]
    impl PageDriver for NullDriver {
        async fn goto(&self, _url: &str, _timeout: Duration) -> SessionResult<()> {
            Ok(())
        }
        async fn stop_loading(&self) -> SessionResult<()> {
            Ok(())
        }
        async fn wait_for_selector(
            &self,
            _selector: &str,
            _timeout: Duration,
        ) -> SessionResult<()> {
            Ok(())
        }
        async fn click(&self, _selector: &str) -> SessionResult<()> {
            Ok(())
        }
        async fn click_at(&self, _x: f64, _y: f64) -> SessionResult<()> {
            Ok(())
        }
        async fn type_text(
            &self,
            _selector: &str,
            _text: &str,
            _delay: Duration,
        ) -> SessionResult<()> {
            Ok(())
        }
        async fn highlight(&self, _selector: &str) -> SessionResult<()> {
            Ok(())
        }
        async fn clear_highlight(&self) -> SessionResult<()> {
            Ok(())
        }
        async fn screenshot(&self) -> SessionResult<Vec<u8>> {
            Ok(vec![0])
        }
        async fn content(&self) -> SessionResult<String> {
            Ok(String::new())
        }
        async fn current_url(&self) -> SessionResult<String> {
            Ok(String::new())
        }
        async fn selector_exists(&self, _selector: &str) -> SessionResult<bool> {
            Ok(true)
        }
        async fn eval_truthy(&self, _expr: &str) -> SessionResult<bool> {
            Ok(true)
        }
        async fn install_recorder(&self) -> SessionResult<()> {
            Ok(())
        }
        async fn remove_recorder(&self) -> SessionResult<()> {
            Ok(())
        }
        async fn drain_recorded(&self) -> SessionResult<Vec<PageRecordedEvent>> {
            Ok(Vec::new())
        }
        async fn close(&self) -> SessionResult<()> {
            Ok(())
        }
    }

    struct NullFactory;

    #[async_trait]
    impl DriverFactory for NullFactory {
        async fn launch(
            &self,
            _config: &SessionConfig,
        ) -> SessionResult<Arc<dyn PageDriver>> {
            Ok(Arc::new(NullDriver))
        }
    }

    fn session() -> (Arc<SessionHandle>, EventReceiver) {
        let config = SessionConfig {
            highlight_duration_ms: 0,
            typing_delay_ms: 0,
            screenshot_interval_ms: 10_000,
            ..SessionConfig::default()
        };
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = Arc::new(SessionHandle::new(config, Arc::new(NullFactory), tx));
        (handle, rx)
    }

    #[tokio::test]
    async fn navigate_then_click_yields_two_steps() {
        let (handle, _rx) = session();
        assert!(handle.initialize().await);

        let recorder = Arc::new(Recorder::new());
        assert!(recorder.start(&handle).await);

        assert!(handle.navigate("example.com").await);
        assert!(handle.click("#submit").await);

        let workflow = recorder.stop(Some(&handle)).await.unwrap();
        assert_eq!(workflow.steps.len(), 2);
        assert_eq!(workflow.steps[0].action, StepAction::Navigate);
        assert_eq!(
            workflow.steps[0].payload.url.as_deref(),
            Some("https://example.com")
        );
        assert_eq!(workflow.steps[1].action, StepAction::Click);
        assert_eq!(workflow.steps[1].payload.selector.as_deref(), Some("#submit"));
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_recording() {
        let (handle, _rx) = session();
        assert!(handle.initialize().await);

        let recorder = Arc::new(Recorder::new());
        assert!(recorder.start(&handle).await);
        assert!(!recorder.start(&handle).await);
        assert!(recorder.is_recording());

        recorder.stop(Some(&handle)).await.unwrap();
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn stop_without_recording_returns_none() {
        let recorder = Arc::new(Recorder::new());
        assert!(recorder.stop(None).await.is_none());
    }

    #[test]
    fn consecutive_typing_on_one_field_collapses() {
        let recorder = Recorder::new();
        *recorder.draft.lock().unwrap() = Some(Workflow::new("draft"));

        recorder.on_action(RecordedAction::Type {
            selector: "#q".into(),
            text: "r".into(),
        });
        recorder.on_action(RecordedAction::Type {
            selector: "#q".into(),
            text: "ru".into(),
        });
        recorder.on_action(RecordedAction::Type {
            selector: "#q".into(),
            text: "rust".into(),
        });
        recorder.on_action(RecordedAction::Type {
            selector: "#other".into(),
            text: "x".into(),
        });

        let workflow = recorder.draft.lock().unwrap().take().unwrap();
        assert_eq!(workflow.steps.len(), 2);
        assert_eq!(workflow.steps[0].payload.text.as_deref(), Some("rust"));
        assert_eq!(workflow.steps[1].payload.selector.as_deref(), Some("#other"));
    }

    #[tokio::test]
    async fn recording_start_and_stop_emit_events() {
        let (handle, mut rx) = session();
        assert!(handle.initialize().await);

        let recorder = Arc::new(Recorder::new());
        assert!(recorder.start(&handle).await);
        recorder.stop(Some(&handle)).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind().to_string());
        }
        assert!(kinds.contains(&"recording_started".to_string()));
        assert!(kinds.contains(&"recording_stopped".to_string()));
    }
}
