//! Supervises the session handle and recreates it when the browser dies.
//!
//! Liveness is inferred from the screenshot tick: every frame refreshes a
//! heartbeat timestamp, and a probe task recreates the session when the
//! heartbeat goes stale. Recreation is single-flight, concurrent requests
//! beyond the first are ignored.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    tokio::{
        sync::{Mutex, RwLock},
        task::JoinHandle,
    },
    tracing::{info, warn},
};

use crate::{
    driver::DriverFactory,
    events::SessionEvent,
    handle::SessionHandle,
    types::SessionConfig,
};

/// Callback receiving every session event, in order.
pub type EventConsumerFn = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Liveness probe tuning.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// How often the probe checks the heartbeat.
    pub probe_interval_ms: u64,
    /// How stale the heartbeat may get before the session is recreated.
    pub heartbeat_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 5_000,
            heartbeat_timeout_ms: 10_000,
        }
    }
}

pub struct SessionSupervisor {
    factory: Arc<dyn DriverFactory>,
    session_config: SessionConfig,
    health: HealthConfig,
    handle: RwLock<Option<Arc<SessionHandle>>>,
    consumer: RwLock<Option<EventConsumerFn>>,
    last_heartbeat_ms: AtomicU64,
    init_in_flight: AtomicBool,
    forward_task: Mutex<Option<JoinHandle<()>>>,
    probe_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionSupervisor {
    #[must_use]
    pub fn new(
        factory: Arc<dyn DriverFactory>,
        session_config: SessionConfig,
        health: HealthConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            factory,
            session_config,
            health,
            handle: RwLock::new(None),
            consumer: RwLock::new(None),
            last_heartbeat_ms: AtomicU64::new(0),
            init_in_flight: AtomicBool::new(false),
            forward_task: Mutex::new(None),
            probe_task: Mutex::new(None),
        })
    }

    /// Start the supervised session, wiring events to `consumer`, and start
    /// the liveness probe.
    pub async fn initialize(self: &Arc<Self>, consumer: EventConsumerFn) -> bool {
        *self.consumer.write().await = Some(consumer);
        let ok = self.recreate(false).await;
        self.ensure_probe().await;
        ok
    }

    /// Tear down the current session and start a fresh one. `automatic`
    /// marks probe-initiated resets in the emitted event.
    pub async fn recreate(self: &Arc<Self>, automatic: bool) -> bool {
        if self.init_in_flight.swap(true, Ordering::SeqCst) {
            warn!(automatic, "session recreate already in flight, ignored");
            return false;
        }

        info!(automatic, "recreating browser session");

        let previous = self.handle.write().await.take();
        let had_previous = previous.is_some();
        if let Some(old) = previous {
            old.cleanup().await;
        }
        if let Some(task) = self.forward_task.lock().await.take() {
            task.abort();
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = Arc::new(SessionHandle::new(
            self.session_config.clone(),
            self.factory.clone(),
            tx,
        ));

        let forwarder = {
            let supervisor = self.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if matches!(event, SessionEvent::Screenshot { .. }) {
                        supervisor
                            .last_heartbeat_ms
                            .store(now_ms(), Ordering::SeqCst);
                    }
                    if let Some(consumer) = supervisor.consumer.read().await.clone() {
                        consumer(event);
                    }
                }
            })
        };
        *self.forward_task.lock().await = Some(forwarder);

        self.last_heartbeat_ms.store(now_ms(), Ordering::SeqCst);
        let ok = handle.initialize().await;
        *self.handle.write().await = Some(handle);

        self.init_in_flight.store(false, Ordering::SeqCst);

        // First startup creates a session rather than replacing one, so it
        // is not reported as a reset.
        if had_previous {
            if let Some(consumer) = self.consumer.read().await.clone() {
                consumer(SessionEvent::BrowserReset { automatic });
            }
        }

        if !ok {
            warn!(automatic, "session recreate failed to launch a browser");
        }
        ok
    }

    /// User-requested reset.
    pub async fn reset(self: &Arc<Self>) -> bool {
        self.recreate(false).await
    }

    pub async fn handle(&self) -> Option<Arc<SessionHandle>> {
        self.handle.read().await.clone()
    }

    /// Stop the probe and close the session. Safe to call more than once.
    pub async fn cleanup(&self) {
        if let Some(task) = self.probe_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.forward_task.lock().await.take() {
            task.abort();
        }
        if let Some(handle) = self.handle.write().await.take() {
            handle.cleanup().await;
        }
    }

    async fn ensure_probe(self: &Arc<Self>) {
        let mut guard = self.probe_task.lock().await;
        if guard.is_some() {
            return;
        }

        let supervisor = self.clone();
        let interval = Duration::from_millis(self.health.probe_interval_ms.max(1));
        let timeout_ms = self.health.heartbeat_timeout_ms;
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if supervisor.init_in_flight.load(Ordering::SeqCst) {
                    continue;
                }
                let last = supervisor.last_heartbeat_ms.load(Ordering::SeqCst);
                if last == 0 {
                    continue;
                }
                let stale_ms = now_ms().saturating_sub(last);
                if stale_ms > timeout_ms {
                    info!(stale_ms, "heartbeat stale, recreating session");
                    supervisor.recreate(true).await;
                }
            }
        }));
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
