//! Replays stored workflows against a live session.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

use {
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    serde::{Deserialize, Serialize},
    soulpilot_session::{SessionError, SessionEvent, SessionHandle},
    tracing::{info, warn},
};

use crate::{
    error::{Error, Result},
    types::{Step, StepAction, Workflow},
};

/// Replay tuning. The inter-step delays keep replayed interactions from
/// outrunning page scripts that react to the previous action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunnerConfig {
    /// Pause after each top-level step, milliseconds.
    pub step_delay_ms: u64,
    /// Pause after each step inside a conditional branch, milliseconds.
    pub branch_step_delay_ms: u64,
    /// Duration of a `wait` step that carries none.
    pub default_wait_ms: u64,
    /// Timeout of a `waitForSelector` step that carries none.
    pub default_selector_timeout_ms: u64,
    /// Delay between retry attempts when a step has no explicit delay.
    pub default_retry_delay_ms: u64,
    /// Whether `js:` conditions may evaluate arbitrary page script.
    pub allow_js_conditions: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: 500,
            branch_step_delay_ms: 300,
            default_wait_ms: 1_000,
            default_selector_timeout_ms: 30_000,
            default_retry_delay_ms: 1_000,
            allow_js_conditions: true,
        }
    }
}

pub struct WorkflowRunner {
    config: RunnerConfig,
}

impl WorkflowRunner {
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Execute every step of `workflow` in order. The first exhausted step
    /// aborts the run; progress and failure are reported through the
    /// session's event channel either way.
    pub async fn run(
        &self,
        handle: &Arc<SessionHandle>,
        workflow: &Workflow,
        params: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        workflow.validate()?;

        info!(
            workflow_id = %workflow.id,
            steps = workflow.steps.len(),
            "workflow execution started"
        );
        handle.emit(SessionEvent::WorkflowStarted {
            workflow_id: workflow.id.clone(),
        });

        for (index, step) in workflow.steps.iter().enumerate() {
            handle.emit(SessionEvent::WorkflowStep {
                index,
                action: step.action.to_string(),
            });

            if let Err(e) = self.run_step_with_retries(handle, step, index, params).await {
                warn!(workflow_id = %workflow.id, index, error = %e, "workflow aborted");
                handle.emit(SessionEvent::WorkflowError {
                    index,
                    action: step.action.to_string(),
                    error: e.to_string(),
                });
                return Err(e);
            }

            handle.emit(SessionEvent::WorkflowStepCompleted { index });

            if self.config.step_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.step_delay_ms)).await;
            }
        }

        info!(workflow_id = %workflow.id, "workflow execution complete");
        handle.emit(SessionEvent::WorkflowComplete {
            workflow_id: workflow.id.clone(),
        });
        Ok(())
    }

    /// Run one step inside its retry budget. A step with `maxRetries: n`
    /// gets `n + 1` attempts. Configuration errors are never retried.
    async fn run_step_with_retries(
        &self,
        handle: &Arc<SessionHandle>,
        step: &Step,
        index: usize,
        params: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let (max_retries, delay_ms) = step
            .retry_options
            .as_ref()
            .map_or((0, self.config.default_retry_delay_ms), |r| {
                (r.max_retries, r.delay)
            });

        let mut attempt: u32 = 0;
        loop {
            match self.execute_step(handle, step, index, params).await {
                Ok(()) => return Ok(()),
                Err(e @ (Error::JsConditionsDisabled | Error::InvalidStep { .. })) => {
                    return Err(e);
                }
                Err(e) => {
                    if attempt >= max_retries {
                        return Err(Error::step_failed(
                            index,
                            step.action.to_string(),
                            attempt + 1,
                            e.to_string(),
                        ));
                    }
                    attempt += 1;
                    warn!(index, attempt, max_retries, error = %e, "step failed, retrying");
                    if delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
            }
        }
    }

    /// Boxed so conditional branches can recurse through
    /// [`Self::run_step_with_retries`].
    fn execute_step<'a>(
        &'a self,
        handle: &'a Arc<SessionHandle>,
        step: &'a Step,
        index: usize,
        params: &'a HashMap<String, serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            match step.action {
                StepAction::Navigate => {
                    let url = required(index, step.payload.url.as_deref(), "url")?;
                    let url = substitute(url, params);
                    if handle.navigate(&url).await {
                        Ok(())
                    } else {
                        Err(SessionError::NavigationFailed(url).into())
                    }
                }
                StepAction::Click => {
                    let selector =
                        substitute(step.payload.selector.as_deref().unwrap_or(""), params);
                    if selector.trim().is_empty() {
                        // Recorded without a derivable selector; replays as
                        // a harmless no-op.
                        warn!(index, "skipping click step with empty selector");
                        Ok(())
                    } else if handle.click(&selector).await {
                        Ok(())
                    } else {
                        Err(SessionError::ElementNotFound(selector).into())
                    }
                }
                StepAction::Type => {
                    let selector =
                        substitute(step.payload.selector.as_deref().unwrap_or(""), params);
                    let text = substitute(step.payload.text.as_deref().unwrap_or(""), params);
                    if selector.trim().is_empty() {
                        warn!(index, "skipping type step with empty selector");
                        Ok(())
                    } else if handle.type_text(&selector, &text).await {
                        Ok(())
                    } else {
                        Err(SessionError::ElementNotFound(selector).into())
                    }
                }
                StepAction::Wait => {
                    let ms = step.payload.duration.unwrap_or(self.config.default_wait_ms);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(())
                }
                StepAction::WaitForSelector => {
                    let selector = required(index, step.payload.selector.as_deref(), "selector")?;
                    let selector = substitute(selector, params);
                    // An explicit zero means one immediate check.
                    let timeout_ms = step
                        .payload
                        .timeout
                        .unwrap_or(self.config.default_selector_timeout_ms);
                    handle.try_wait_for_selector(&selector, timeout_ms).await?;
                    Ok(())
                }
                StepAction::Screenshot => {
                    let bytes = handle.screenshot().await.ok_or_else(|| {
                        Error::from(SessionError::ScreenshotFailed("no frame captured".into()))
                    })?;
                    handle.emit(SessionEvent::WorkflowScreenshot {
                        index,
                        data: BASE64.encode(bytes),
                    });
                    Ok(())
                }
                StepAction::Conditional => {
                    let branch = step.conditional_branch.as_ref().ok_or_else(|| {
                        Error::invalid_step(index, "conditional requires a conditionalBranch")
                    })?;

                    let outcome = self
                        .evaluate_condition(handle, &branch.condition, params)
                        .await?;
                    info!(index, condition = %branch.condition, outcome, "conditional evaluated");

                    let chosen: &[Step] = if outcome {
                        &branch.true_steps
                    } else {
                        branch.false_steps.as_deref().unwrap_or(&[])
                    };

                    for (branch_index, branch_step) in chosen.iter().enumerate() {
                        self.run_step_with_retries(handle, branch_step, branch_index, params)
                            .await?;
                        if self.config.branch_step_delay_ms > 0 {
                            tokio::time::sleep(Duration::from_millis(
                                self.config.branch_step_delay_ms,
                            ))
                            .await;
                        }
                    }
                    Ok(())
                }
            }
        })
    }

    /// `selector:<css>` tests element presence, `js:<expr>` evaluates page
    /// script when enabled, anything else is truthy when non-empty after
    /// substitution.
    async fn evaluate_condition(
        &self,
        handle: &Arc<SessionHandle>,
        condition: &str,
        params: &HashMap<String, serde_json::Value>,
    ) -> Result<bool> {
        let condition = substitute(condition, params);

        if let Some(selector) = condition.strip_prefix("selector:") {
            Ok(handle.try_selector_exists(selector.trim()).await?)
        } else if let Some(expr) = condition.strip_prefix("js:") {
            if !self.config.allow_js_conditions {
                return Err(Error::JsConditionsDisabled);
            }
            Ok(handle.try_eval_truthy(expr.trim()).await?)
        } else {
            Ok(!condition.trim().is_empty())
        }
    }
}

/// Replace each `{key}` with its parameter value. Placeholders with no
/// matching parameter pass through verbatim.
#[must_use]
pub fn substitute(input: &str, params: &HashMap<String, serde_json::Value>) -> String {
    let mut output = input.to_string();
    for (key, value) in params {
        let token = format!("{{{key}}}");
        if output.contains(&token) {
            output = output.replace(&token, &render_param(value));
        }
    }
    output
}

fn render_param(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn required<'a>(index: usize, field: Option<&'a str>, name: &str) -> Result<&'a str> {
    field.ok_or_else(|| Error::invalid_step(index, format!("missing '{name}'")))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex as StdMutex,
        atomic::{AtomicU32, Ordering},
    };

    use {
        async_trait::async_trait,
        soulpilot_session::{
            DriverFactory, EventReceiver, PageDriver, PageRecordedEvent, Result as SessionResult,
            SessionConfig,
        },
    };

    use super::*;
    use crate::types::{ConditionalBranch, RetryOptions};

    /// Logs every interaction; selectors containing "missing" never match
    /// and selectors containing "flaky" fail until `flaky_after` attempts.
    #[derive(Default)]
    struct ScriptedDriver {
        log: StdMutex<Vec<String>>,
        click_attempts: AtomicU32,
        flaky_after: u32,
    }

    impl ScriptedDriver {
        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn log(&self, entry: impl Into<String>) {
            self.log.lock().unwrap().push(entry.into());
        }
    }

    #[async_trait]
    impl PageDriver for ScriptedDriver {
        async fn goto(&self, url: &str, _timeout: Duration) -> SessionResult<()> {
            self.log(format!("goto {url}"));
            Ok(())
        }
        async fn stop_loading(&self) -> SessionResult<()> {
            Ok(())
        }
        async fn wait_for_selector(
            &self,
            selector: &str,
            _timeout: Duration,
        ) -> SessionResult<()> {
            if selector.contains("missing") {
                return Err(SessionError::Timeout(format!("selector {selector}")));
            }
            Ok(())
        }
        async fn click(&self, selector: &str) -> SessionResult<()> {
            if selector.contains("flaky") {
                let attempt = self.click_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt <= self.flaky_after {
                    return Err(SessionError::ElementNotFound(selector.into()));
                }
            }
            self.log(format!("click {selector}"));
            Ok(())
        }
        async fn click_at(&self, _x: f64, _y: f64) -> SessionResult<()> {
            Ok(())
        }
        async fn type_text(
            &self,
            selector: &str,
            text: &str,
            _delay: Duration,
        ) -> SessionResult<()> {
            self.log(format!("type {selector}={text}"));
            Ok(())
        }
        async fn highlight(&self, _selector: &str) -> SessionResult<()> {
            Ok(())
        }
        async fn clear_highlight(&self) -> SessionResult<()> {
            Ok(())
        }
        async fn screenshot(&self) -> SessionResult<Vec<u8>> {
            self.log("screenshot");
            Ok(vec![1, 2, 3])
        }
        async fn content(&self) -> SessionResult<String> {
            Ok(String::new())
        }
        async fn current_url(&self) -> SessionResult<String> {
            Ok(String::new())
        }
        async fn selector_exists(&self, selector: &str) -> SessionResult<bool> {
            self.log(format!("exists {selector}"));
            Ok(!selector.contains("missing"))
        }
        async fn eval_truthy(&self, expr: &str) -> SessionResult<bool> {
            self.log(format!("eval {expr}"));
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

    struct ScriptedFactory {
        driver: Arc<ScriptedDriver>,
    }

    #[async_trait]
    impl DriverFactory for ScriptedFactory {
        async fn launch(
            &self,
            _config: &SessionConfig,
        ) -> SessionResult<Arc<dyn PageDriver>> {
            Ok(self.driver.clone())
        }
    }

    async fn session(
        driver: Arc<ScriptedDriver>,
    ) -> (Arc<SessionHandle>, EventReceiver) {
        let config = SessionConfig {
            highlight_duration_ms: 0,
            typing_delay_ms: 0,
            screenshot_interval_ms: 60_000,
            ..SessionConfig::default()
        };
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = Arc::new(SessionHandle::new(
            config,
            Arc::new(ScriptedFactory { driver }),
            tx,
        ));
        assert!(handle.initialize().await);
        (handle, rx)
    }

    fn fast_runner() -> WorkflowRunner {
        WorkflowRunner::new(RunnerConfig {
            step_delay_ms: 0,
            branch_step_delay_ms: 0,
            default_retry_delay_ms: 0,
            ..RunnerConfig::default()
        })
    }

    fn no_params() -> HashMap<String, serde_json::Value> {
        HashMap::new()
    }

    #[test]
    fn substitute_replaces_known_tokens_only() {
        let params = HashMap::from([
            ("user".to_string(), serde_json::json!("ada")),
            ("count".to_string(), serde_json::json!(42)),
            ("flag".to_string(), serde_json::json!(true)),
        ]);
        assert_eq!(substitute("hello {user}", &params), "hello ada");
        assert_eq!(substitute("{count} of {flag}", &params), "42 of true");
        assert_eq!(substitute("{unknown} stays", &params), "{unknown} stays");
        assert_eq!(substitute("no tokens", &params), "no tokens");
    }

    #[tokio::test]
    async fn replay_is_deterministic_across_runs() {
        let mut workflow = Workflow::new("replay");
        workflow.steps = vec![
            Step::navigate("https://example.com"),
            Step::type_text("#q", "{query}"),
            Step::click("#go"),
        ];
        let params = HashMap::from([("query".to_string(), serde_json::json!("rust"))]);

        let mut logs = Vec::new();
        for _ in 0..2 {
            let driver = Arc::new(ScriptedDriver::default());
            let (handle, _rx) = session(driver.clone()).await;
            fast_runner().run(&handle, &workflow, &params).await.unwrap();
            logs.push(driver.entries());
        }

        assert_eq!(logs[0], logs[1]);
        assert_eq!(
            logs[0],
            vec!["goto https://example.com", "type #q=rust", "click #go"]
        );
    }

    #[tokio::test]
    async fn empty_selector_steps_replay_as_no_ops() {
        let driver = Arc::new(ScriptedDriver::default());
        let (handle, _rx) = session(driver.clone()).await;

        let mut workflow = Workflow::new("unresolved selectors");
        workflow.steps = vec![
            Step::click(""),
            Step::navigate("https://example.com"),
            Step::type_text("", "never typed"),
        ];

        fast_runner()
            .run(&handle, &workflow, &no_params())
            .await
            .unwrap();

        assert_eq!(driver.entries(), vec!["goto https://example.com"]);
    }

    #[tokio::test]
    async fn retry_budget_is_attempts_plus_one() {
        let driver = Arc::new(ScriptedDriver {
            flaky_after: u32::MAX,
            ..ScriptedDriver::default()
        });
        let (handle, _rx) = session(driver.clone()).await;

        let mut step = Step::click("#flaky");
        step.retry_options = Some(RetryOptions {
            max_retries: 2,
            delay: 0,
        });
        let mut workflow = Workflow::new("retry");
        workflow.steps = vec![step];

        let err = fast_runner()
            .run(&handle, &workflow, &no_params())
            .await
            .unwrap_err();
        match err {
            Error::StepFailed {
                index, attempts, ..
            } => {
                assert_eq!(index, 0);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(driver.click_attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_recovers_when_a_later_attempt_succeeds() {
        let driver = Arc::new(ScriptedDriver {
            flaky_after: 1,
            ..ScriptedDriver::default()
        });
        let (handle, _rx) = session(driver.clone()).await;

        let mut step = Step::click("#flaky");
        step.retry_options = Some(RetryOptions {
            max_retries: 2,
            delay: 0,
        });
        let mut workflow = Workflow::new("retry-ok");
        workflow.steps = vec![step];

        fast_runner()
            .run(&handle, &workflow, &no_params())
            .await
            .unwrap();
        assert!(driver.entries().contains(&"click #flaky".to_string()));
    }

    #[tokio::test]
    async fn conditional_takes_the_false_branch_when_selector_is_absent() {
        let driver = Arc::new(ScriptedDriver::default());
        let (handle, _rx) = session(driver.clone()).await;

        let mut workflow = Workflow::new("conditional");
        workflow.steps = vec![Step::conditional(ConditionalBranch {
            condition: "selector:#missing-banner".into(),
            true_steps: vec![Step::click("#dismiss")],
            false_steps: Some(vec![Step::click("#continue")]),
        })];

        fast_runner()
            .run(&handle, &workflow, &no_params())
            .await
            .unwrap();

        let entries = driver.entries();
        assert!(entries.contains(&"exists #missing-banner".to_string()));
        assert!(entries.contains(&"click #continue".to_string()));
        assert!(!entries.contains(&"click #dismiss".to_string()));
    }

    #[tokio::test]
    async fn js_conditions_error_when_disabled_and_are_not_retried() {
        let driver = Arc::new(ScriptedDriver::default());
        let (handle, _rx) = session(driver.clone()).await;

        let mut step = Step::conditional(ConditionalBranch {
            condition: "js:document.title.length > 0".into(),
            true_steps: vec![],
            false_steps: None,
        });
        step.retry_options = Some(RetryOptions {
            max_retries: 5,
            delay: 0,
        });
        let mut workflow = Workflow::new("gated");
        workflow.steps = vec![step];

        let runner = WorkflowRunner::new(RunnerConfig {
            allow_js_conditions: false,
            step_delay_ms: 0,
            branch_step_delay_ms: 0,
            default_retry_delay_ms: 0,
            ..RunnerConfig::default()
        });
        let err = runner.run(&handle, &workflow, &no_params()).await.unwrap_err();
        assert!(matches!(err, Error::JsConditionsDisabled));
        assert!(!driver.entries().iter().any(|e| e.starts_with("eval")));
    }

    #[tokio::test]
    async fn screenshot_step_emits_a_workflow_frame() {
        let driver = Arc::new(ScriptedDriver::default());
        let (handle, mut rx) = session(driver).await;

        let mut workflow = Workflow::new("frame");
        workflow.steps = vec![Step::screenshot()];

        fast_runner()
            .run(&handle, &workflow, &no_params())
            .await
            .unwrap();

        let mut saw_frame = false;
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::WorkflowScreenshot { index, data } = event {
                assert_eq!(index, 0);
                assert!(!data.is_empty());
                saw_frame = true;
            }
        }
        assert!(saw_frame);
    }

    #[tokio::test]
    async fn run_emits_the_full_event_sequence() {
        let driver = Arc::new(ScriptedDriver::default());
        let (handle, mut rx) = session(driver).await;

        let mut workflow = Workflow::new("events");
        workflow.steps = vec![Step::navigate("https://example.com"), Step::wait(0)];

        fast_runner()
            .run(&handle, &workflow, &no_params())
            .await
            .unwrap();

        let kinds: Vec<String> = {
            let mut out = Vec::new();
            while let Ok(event) = rx.try_recv() {
                out.push(event.kind().to_string());
            }
            out
        };
        // Navigation fires its own events between the step markers.
        assert_eq!(kinds.first().map(String::as_str), Some("ready"));
        assert!(kinds.contains(&"workflow_started".to_string()));
        assert_eq!(
            kinds
                .iter()
                .filter(|k| k.as_str() == "workflow_step")
                .count(),
            2
        );
        assert_eq!(
            kinds
                .iter()
                .filter(|k| k.as_str() == "workflow_step_completed")
                .count(),
            2
        );
        assert_eq!(kinds.last().map(String::as_str), Some("workflow_complete"));
    }

    #[tokio::test]
    async fn missing_selector_aborts_with_workflow_error_event() {
        let driver = Arc::new(ScriptedDriver::default());
        let (handle, mut rx) = session(driver).await;

        let mut workflow = Workflow::new("abort");
        workflow.steps = vec![
            Step::wait_for_selector("#missing", Some(0)),
            Step::click("#never-reached"),
        ];

        let err = fast_runner()
            .run(&handle, &workflow, &no_params())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StepFailed { index: 0, .. }));

        let mut saw_error = false;
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::WorkflowError { index, action, .. } = event {
                assert_eq!(index, 0);
                assert_eq!(action, "waitForSelector");
                saw_error = true;
            }
        }
        assert!(saw_error);
    }
}
