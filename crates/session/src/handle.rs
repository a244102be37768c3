//! The session handle: a non-throwing facade over one live browser page.

use std::{sync::Arc, time::Duration};

use {
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    tokio::{
        sync::{Mutex, RwLock},
        task::JoinHandle,
        time::{Instant, MissedTickBehavior, interval_at},
    },
    tracing::{debug, info, warn},
};

use crate::{
    driver::{ActionTap, DriverFactory, PageDriver, PageRecordedEvent},
    error::{Result, SessionError},
    events::{EventSender, SessionEvent},
    types::{RecordedAction, SessionConfig, SessionState, normalize_url},
};

/// Drives one browser page and reports everything it does through the event
/// channel. Interaction methods return `bool` rather than `Result`; the
/// underlying error is logged and, where the UI needs it, emitted as an
/// event. The workflow runner uses the `try_*` methods instead when it needs
/// the error itself.
pub struct SessionHandle {
    config: SessionConfig,
    factory: Arc<dyn DriverFactory>,
    events: EventSender,
    driver: RwLock<Option<Arc<dyn PageDriver>>>,
    state: RwLock<SessionState>,
    tap: RwLock<Option<Arc<dyn ActionTap>>>,
    tick_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    #[must_use]
    pub fn new(config: SessionConfig, factory: Arc<dyn DriverFactory>, events: EventSender) -> Self {
        Self {
            config,
            factory,
            events,
            driver: RwLock::new(None),
            state: RwLock::new(SessionState::Uninitialized),
            tap: RwLock::new(None),
            tick_task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Launch the browser and start the screenshot tick. Returns `false`
    /// and stays uninitialized when the launch fails.
    pub async fn initialize(self: &Arc<Self>) -> bool {
        {
            let mut state = self.state.write().await;
            if !matches!(*state, SessionState::Uninitialized) {
                warn!(state = ?*state, "initialize ignored, session already started");
                return false;
            }
            *state = SessionState::Initializing;
        }

        match self.factory.launch(&self.config).await {
            Ok(driver) => {
                *self.driver.write().await = Some(driver);
                *self.state.write().await = SessionState::Ready;
                info!("browser session ready");
                self.emit(SessionEvent::Ready);

                let task = self.spawn_tick();
                *self.tick_task.lock().await = Some(task);
                true
            }
            Err(e) => {
                warn!(error = %e, "browser launch failed");
                *self.state.write().await = SessionState::Uninitialized;
                false
            }
        }
    }

    /// Navigate to `url`. Scheme-less input gets `https://` prepended before
    /// validation. Failures emit a `navigation_error` event and leave the
    /// page usable.
    pub async fn navigate(&self, url: &str) -> bool {
        let normalized = match normalize_url(url) {
            Ok(u) => u,
            Err(e) => {
                warn!(url, error = %e, "rejected navigation target");
                self.emit(SessionEvent::NavigationError {
                    url: url.to_string(),
                    error: e.to_string(),
                });
                return false;
            }
        };

        let Some(driver) = self.driver().await else {
            warn!("navigate called before initialize");
            return false;
        };

        *self.state.write().await = SessionState::Navigating;
        self.emit(SessionEvent::Loading {
            url: normalized.clone(),
        });

        let limit = Duration::from_millis(self.config.navigate_call_timeout_ms);
        match driver.goto(&normalized, limit).await {
            Ok(()) => {
                *self.state.write().await = SessionState::Ready;
                info!(url = %normalized, "navigation complete");
                self.emit(SessionEvent::Navigated {
                    url: normalized.clone(),
                });
                self.emit(SessionEvent::Loaded);
                self.record(RecordedAction::Navigate { url: normalized }).await;
                true
            }
            Err(e) => {
                warn!(url = %normalized, error = %e, "navigation failed");
                if let Err(stop_err) = driver.stop_loading().await {
                    debug!(error = %stop_err, "stop_loading after failed navigation");
                }
                *self.state.write().await = SessionState::Ready;
                self.emit(SessionEvent::NavigationError {
                    url: normalized,
                    error: e.to_string(),
                });
                false
            }
        }
    }

    /// Wait for `selector`, flash a highlight on it, then click it.
    pub async fn click(&self, selector: &str) -> bool {
        let Some(driver) = self.driver().await else {
            warn!("click called before initialize");
            return false;
        };

        let wait = Duration::from_millis(self.config.selector_timeout_ms);
        if let Err(e) = driver.wait_for_selector(selector, wait).await {
            warn!(selector, error = %e, "click target never appeared");
            return false;
        }

        self.flash_highlight(&driver, selector).await;

        match driver.click(selector).await {
            Ok(()) => {
                self.record(RecordedAction::Click {
                    selector: selector.to_string(),
                })
                .await;
                true
            }
            Err(e) => {
                warn!(selector, error = %e, "click failed");
                false
            }
        }
    }

    /// Click at raw viewport coordinates, clamped to the viewport bounds.
    /// Coordinate clicks are not mirrored into recordings because they do
    /// not replay reliably across layouts.
    pub async fn click_at_position(&self, x: f64, y: f64) -> bool {
        let Some(driver) = self.driver().await else {
            warn!("click_at_position called before initialize");
            return false;
        };

        let x = x.clamp(0.0, f64::from(self.config.viewport_width));
        let y = y.clamp(0.0, f64::from(self.config.viewport_height));

        match driver.click_at(x, y).await {
            Ok(()) => true,
            Err(e) => {
                warn!(x, y, error = %e, "coordinate click failed");
                false
            }
        }
    }

    /// Wait for `selector`, highlight it, then type `text` into it with the
    /// configured inter-keystroke delay.
    pub async fn type_text(&self, selector: &str, text: &str) -> bool {
        let Some(driver) = self.driver().await else {
            warn!("type_text called before initialize");
            return false;
        };

        let wait = Duration::from_millis(self.config.selector_timeout_ms);
        if let Err(e) = driver.wait_for_selector(selector, wait).await {
            warn!(selector, error = %e, "type target never appeared");
            return false;
        }

        self.flash_highlight(&driver, selector).await;

        let delay = Duration::from_millis(self.config.typing_delay_ms);
        match driver.type_text(selector, text, delay).await {
            Ok(()) => {
                self.record(RecordedAction::Type {
                    selector: selector.to_string(),
                    text: text.to_string(),
                })
                .await;
                true
            }
            Err(e) => {
                warn!(selector, error = %e, "typing failed");
                false
            }
        }
    }

    pub async fn screenshot(&self) -> Option<Vec<u8>> {
        let driver = self.driver().await?;
        match driver.screenshot().await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, "screenshot failed");
                None
            }
        }
    }

    pub async fn content(&self) -> Option<String> {
        let driver = self.driver().await?;
        match driver.content().await {
            Ok(html) => Some(html),
            Err(e) => {
                warn!(error = %e, "content fetch failed");
                None
            }
        }
    }

    pub async fn current_url(&self) -> Option<String> {
        let driver = self.driver().await?;
        match driver.current_url().await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(error = %e, "url fetch failed");
                None
            }
        }
    }

    /// Selector wait with an explicit bound, surfacing the error. A zero
    /// timeout checks exactly once.
    pub async fn try_wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<()> {
        let driver = self.driver().await.ok_or(SessionError::NotInitialized)?;
        driver
            .wait_for_selector(selector, Duration::from_millis(timeout_ms))
            .await
    }

    pub async fn try_selector_exists(&self, selector: &str) -> Result<bool> {
        let driver = self.driver().await.ok_or(SessionError::NotInitialized)?;
        driver.selector_exists(selector).await
    }

    pub async fn try_eval_truthy(&self, expr: &str) -> Result<bool> {
        let driver = self.driver().await.ok_or(SessionError::NotInitialized)?;
        driver.eval_truthy(expr).await
    }

    /// Install the in-page recorder listeners on the current page.
    pub async fn install_recorder(&self) -> bool {
        let Some(driver) = self.driver().await else {
            return false;
        };
        match driver.install_recorder().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "recorder install failed");
                false
            }
        }
    }

    /// Remove the in-page recorder listeners, best effort.
    pub async fn remove_recorder(&self) -> bool {
        let Some(driver) = self.driver().await else {
            return false;
        };
        match driver.remove_recorder().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "recorder removal failed");
                false
            }
        }
    }

    /// Attach or detach the observer that mirrors performed actions into a
    /// workflow draft.
    pub async fn set_action_tap(&self, tap: Option<Arc<dyn ActionTap>>) {
        *self.tap.write().await = tap;
    }

    /// Push an event to the consumer. Send failures mean the consumer is
    /// gone, which is not the session's problem.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Close the page and stop the tick. Safe to call more than once.
    pub async fn cleanup(&self) {
        if let Some(task) = self.tick_task.lock().await.take() {
            task.abort();
        }
        if let Some(driver) = self.driver.write().await.take() {
            if let Err(e) = driver.close().await {
                debug!(error = %e, "browser close during cleanup");
            }
        }
        *self.state.write().await = SessionState::Closed;
    }

    async fn driver(&self) -> Option<Arc<dyn PageDriver>> {
        self.driver.read().await.clone()
    }

    async fn record(&self, action: RecordedAction) {
        if let Some(tap) = self.tap.read().await.clone() {
            tap.on_action(action.clone());
        }
        match serde_json::to_value(&action) {
            Ok(step) => self.emit(SessionEvent::ActionRecorded { step }),
            Err(e) => debug!(error = %e, "recorded action did not serialize"),
        }
    }

    async fn flash_highlight(&self, driver: &Arc<dyn PageDriver>, selector: &str) {
        if driver.highlight(selector).await.is_ok() {
            tokio::time::sleep(Duration::from_millis(self.config.highlight_duration_ms)).await;
            if let Err(e) = driver.clear_highlight().await {
                debug!(error = %e, "highlight cleanup failed");
            }
        }
    }

    fn spawn_tick(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let period = Duration::from_millis(self.config.screenshot_interval_ms.max(1));
        tokio::spawn(async move {
            // First frame comes one full period after startup, not
            // immediately.
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(handle) = weak.upgrade() else {
                    break;
                };
                handle.tick_once().await;
            }
        })
    }

    /// One screenshot tick: emit a preview frame and, while a recording tap
    /// is attached, drain interactions captured inside the page.
    async fn tick_once(&self) {
        let Some(driver) = self.driver().await else {
            return;
        };

        match driver.screenshot().await {
            Ok(bytes) => self.emit(SessionEvent::Screenshot {
                data: BASE64.encode(bytes),
            }),
            Err(e) => {
                debug!(error = %e, "screenshot tick failed");
                return;
            }
        }

        if self.tap.read().await.is_some() {
            match driver.drain_recorded().await {
                Ok(events) => {
                    for event in events {
                        if let Some(action) = action_from_page_event(event) {
                            self.record(action).await;
                        }
                    }
                }
                Err(e) => debug!(error = %e, "recorder drain failed"),
            }
        }
    }
}

/// Map a raw in-page interaction to a recorded action. An interaction whose
/// selector could not be derived keeps its empty selector; replay skips
/// such steps rather than erroring.
fn action_from_page_event(event: PageRecordedEvent) -> Option<RecordedAction> {
    match event.kind.as_str() {
        "click" => Some(RecordedAction::Click {
            selector: event.selector,
        }),
        "input" => Some(RecordedAction::Type {
            selector: event.selector,
            text: event.value.unwrap_or_default(),
        }),
        other => {
            debug!(kind = other, "unknown recorded interaction kind");
            None
        }
    }
}
