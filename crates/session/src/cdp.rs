//! chromiumoxide-backed implementation of the page driver.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    chromiumoxide::{
        Browser, BrowserConfig as CdpBrowserConfig, Page,
        cdp::browser_protocol::{
            input::{
                DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
                DispatchMouseEventType, MouseButton,
            },
            network::{EnableParams as NetworkEnableParams, SetBlockedUrLsParams},
            page::{CaptureScreenshotFormat, StopLoadingParams},
        },
    },
    futures::StreamExt,
    tokio::{sync::Mutex, task::JoinHandle, time::timeout},
    tracing::{debug, warn},
};

use crate::{
    driver::{DriverFactory, PageDriver, PageRecordedEvent},
    error::{Result, SessionError},
    types::SessionConfig,
};

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Installs capture-phase click/change listeners that queue interactions in
/// a page global. Selectors degrade id -> class list -> structural
/// `nth-of-type` path -> empty string.
const RECORDER_INSTALL_JS: &str = r#"(() => {
  if (window.__soulpilotRecorder) { return true; }
  const cssPath = (el) => {
    try {
      if (!el || el.nodeType !== 1) { return ''; }
      if (el.id) { return '#' + el.id; }
      if (el.classList && el.classList.length > 0) {
        return el.tagName.toLowerCase() + '.' + Array.from(el.classList).join('.');
      }
      const parts = [];
      let node = el;
      while (node && node.nodeType === 1 && node.tagName !== 'HTML') {
        let index = 1;
        let sibling = node.previousElementSibling;
        while (sibling) {
          if (sibling.tagName === node.tagName) { index += 1; }
          sibling = sibling.previousElementSibling;
        }
        parts.unshift(node.tagName.toLowerCase() + ':nth-of-type(' + index + ')');
        node = node.parentElement;
      }
      return parts.join(' > ');
    } catch (_) {
      return '';
    }
  };
  const queue = [];
  const onClick = (e) => {
    queue.push({ kind: 'click', selector: cssPath(e.target) });
  };
  const onChange = (e) => {
    const t = e.target;
    if (t && /^(INPUT|TEXTAREA|SELECT)$/.test(t.tagName)) {
      queue.push({ kind: 'input', selector: cssPath(t), value: String(t.value) });
    }
  };
  document.addEventListener('click', onClick, true);
  document.addEventListener('change', onChange, true);
  window.__soulpilotRecorder = { queue, onClick, onChange };
  return true;
})()"#;

const RECORDER_REMOVE_JS: &str = r#"(() => {
  const r = window.__soulpilotRecorder;
  if (!r) { return false; }
  document.removeEventListener('click', r.onClick, true);
  document.removeEventListener('change', r.onChange, true);
  delete window.__soulpilotRecorder;
  return true;
})()"#;

const RECORDER_DRAIN_JS: &str = r#"(() => {
  const r = window.__soulpilotRecorder;
  if (!r) { return []; }
  return r.queue.splice(0, r.queue.length);
})()"#;

const CLEAR_HIGHLIGHT_JS: &str = r#"document.querySelectorAll('[data-soulpilot-highlight]').forEach((el) => {
  el.style.outline = '';
  el.style.outlineOffset = '';
  el.removeAttribute('data-soulpilot-highlight');
});"#;

/// Launches a headless Chrome/Chromium per session.
#[derive(Debug, Clone, Copy, Default)]
pub struct CdpDriverFactory;

impl CdpDriverFactory {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DriverFactory for CdpDriverFactory {
    async fn launch(&self, config: &SessionConfig) -> Result<Arc<dyn PageDriver>> {
        let mut builder = CdpBrowserConfig::builder();

        if !config.headless {
            builder = builder.with_head();
        }

        builder = builder
            .viewport(chromiumoxide::handler::viewport::Viewport {
                width: config.viewport_width,
                height: config.viewport_height,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            })
            .request_timeout(Duration::from_millis(config.navigation_timeout_ms));

        if let Some(ref path) = config.chrome_path {
            builder = builder.chrome_executable(path);
        }
        for arg in &config.chrome_args {
            builder = builder.arg(arg);
        }
        builder = builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox");

        let cdp_config = builder
            .build()
            .map_err(|e| SessionError::LaunchFailed(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(cdp_config)
            .await
            .map_err(|e| SessionError::LaunchFailed(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!(?event, "browser event");
            }
            debug!("browser event handler exited");
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| SessionError::LaunchFailed(e.to_string()))?;

        if let Err(e) = page.execute(NetworkEnableParams::default()).await {
            warn!(error = %e, "failed to enable network domain");
        } else if !config.blocked_url_patterns.is_empty() {
            let blocked = SetBlockedUrLsParams {
                urls: config.blocked_url_patterns.clone(),
            };
            if let Err(e) = page.execute(blocked).await {
                warn!(error = %e, "failed to install blocked url patterns");
            }
        }

        debug!(
            viewport_width = config.viewport_width,
            viewport_height = config.viewport_height,
            headless = config.headless,
            "launched browser page"
        );

        Ok(Arc::new(CdpDriver {
            page,
            browser: Mutex::new(Some(browser)),
            handler_task: Mutex::new(Some(handler_task)),
            script_timeout: Duration::from_millis(config.script_timeout_ms),
        }))
    }
}

/// One live page plus the browser process that owns it.
pub struct CdpDriver {
    page: Page,
    browser: Mutex<Option<Browser>>,
    handler_task: Mutex<Option<JoinHandle<()>>>,
    script_timeout: Duration,
}

impl CdpDriver {
    /// Evaluate a script for its side effects only.
    async fn eval_unit(&self, js: String) -> Result<()> {
        timeout(self.script_timeout, self.page.evaluate(js))
            .await
            .map_err(|_| SessionError::Timeout("script evaluation".into()))?
            .map_err(|e| SessionError::JsEvalFailed(e.to_string()))?;
        Ok(())
    }

    /// Evaluate a script and deserialize its return value.
    async fn eval_json<T>(&self, js: String) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        timeout(self.script_timeout, self.page.evaluate(js))
            .await
            .map_err(|_| SessionError::Timeout("script evaluation".into()))?
            .map_err(|e| SessionError::JsEvalFailed(e.to_string()))?
            .into_value()
            .map_err(|e| SessionError::JsEvalFailed(format!("{e:?}")))
    }

    fn selector_literal(selector: &str) -> Result<String> {
        Ok(serde_json::to_string(selector)?)
    }
}

#[async_trait]
impl PageDriver for CdpDriver {
    async fn goto(&self, url: &str, limit: Duration) -> Result<()> {
        match timeout(limit, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(SessionError::NavigationFailed(e.to_string())),
            Err(_) => Err(SessionError::Timeout(format!(
                "navigation to {url} exceeded {}ms",
                limit.as_millis()
            ))),
        }
    }

    async fn stop_loading(&self) -> Result<()> {
        self.page.execute(StopLoadingParams::default()).await?;
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, limit: Duration) -> Result<()> {
        let literal = Self::selector_literal(selector)?;
        let check = format!("document.querySelector({literal}) !== null");
        let deadline = Instant::now() + limit;

        loop {
            let found: bool = self.eval_json(check.clone()).await.unwrap_or(false);
            if found {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SessionError::Timeout(format!(
                    "selector {selector} not found after {}ms",
                    limit.as_millis()
                )));
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let literal = Self::selector_literal(selector)?;
        let js = format!(
            "(() => {{ const el = document.querySelector({literal}); \
             if (!el) {{ return false; }} el.click(); return true; }})()"
        );
        let clicked: bool = self.eval_json(js).await?;
        if clicked {
            Ok(())
        } else {
            Err(SessionError::ElementNotFound(selector.to_string()))
        }
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        let moved = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseMoved)
            .x(x)
            .y(y)
            .build()
            .map_err(SessionError::Cdp)?;
        self.page.execute(moved).await?;

        let press = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(SessionError::Cdp)?;
        self.page.execute(press).await?;

        let release = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(SessionError::Cdp)?;
        self.page.execute(release).await?;

        // Synthetic mouse events are not honored by every page script, so
        // also try a direct elementFromPoint click.
        let backup = format!(
            "(() => {{ const el = document.elementFromPoint({x}, {y}); \
             if (el) {{ el.click(); }} return !!el; }})()"
        );
        if let Err(e) = self.eval_unit(backup).await {
            debug!(error = %e, "elementFromPoint backup click failed");
        }

        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str, delay: Duration) -> Result<()> {
        let literal = Self::selector_literal(selector)?;
        let prepare = format!(
            "(() => {{ const el = document.querySelector({literal}); \
             if (!el) {{ return false; }} el.focus(); \
             if ('value' in el) {{ el.value = ''; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); }} \
             return true; }})()"
        );
        let focused: bool = self.eval_json(prepare).await?;
        if !focused {
            return Err(SessionError::ElementNotFound(selector.to_string()));
        }

        for c in text.chars() {
            let key_down = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::KeyDown)
                .text(c.to_string())
                .build()
                .map_err(SessionError::Cdp)?;
            self.page.execute(key_down).await?;

            let key_up = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::KeyUp)
                .text(c.to_string())
                .build()
                .map_err(SessionError::Cdp)?;
            self.page.execute(key_up).await?;

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        Ok(())
    }

    async fn highlight(&self, selector: &str) -> Result<()> {
        let literal = Self::selector_literal(selector)?;
        let js = format!(
            "(() => {{ const el = document.querySelector({literal}); \
             if (!el) {{ return false; }} \
             el.setAttribute('data-soulpilot-highlight', ''); \
             el.style.outline = '3px solid #ff6d00'; \
             el.style.outlineOffset = '2px'; return true; }})()"
        );
        self.eval_unit(js).await
    }

    async fn clear_highlight(&self) -> Result<()> {
        self.eval_unit(CLEAR_HIGHLIGHT_JS.to_string()).await
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.page
            .screenshot(
                chromiumoxide::page::ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(|e| SessionError::ScreenshotFailed(e.to_string()))
    }

    async fn content(&self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| SessionError::Cdp(e.to_string()))
    }

    async fn current_url(&self) -> Result<String> {
        let url = self.page.url().await?;
        Ok(url.unwrap_or_default())
    }

    async fn selector_exists(&self, selector: &str) -> Result<bool> {
        let literal = Self::selector_literal(selector)?;
        self.eval_json(format!("document.querySelector({literal}) !== null"))
            .await
    }

    async fn eval_truthy(&self, expr: &str) -> Result<bool> {
        self.eval_json(format!("!!({expr})")).await
    }

    async fn install_recorder(&self) -> Result<()> {
        let installed: bool = self.eval_json(RECORDER_INSTALL_JS.to_string()).await?;
        debug!(installed, "recorder listeners installed");
        Ok(())
    }

    async fn remove_recorder(&self) -> Result<()> {
        self.eval_unit(RECORDER_REMOVE_JS.to_string()).await
    }

    async fn drain_recorded(&self) -> Result<Vec<PageRecordedEvent>> {
        self.eval_json(RECORDER_DRAIN_JS.to_string()).await
    }

    async fn close(&self) -> Result<()> {
        // The handler task drives the CDP transport, so it must outlive the
        // close command or Chrome never hears it and wait() hangs.
        if let Some(mut browser) = self.browser.lock().await.take() {
            if let Err(e) = browser.close().await {
                debug!(error = %e, "browser close failed, killing process");
                let _ = browser.kill().await;
            }
            let _ = browser.wait().await;
        }
        if let Some(task) = self.handler_task.lock().await.take() {
            task.abort();
        }
        Ok(())
    }
}
