//! Browser session lifecycle for the soulpilot co-pilot core.
//!
//! One live Chrome/Chromium page is wrapped in a [`SessionHandle`] exposing a
//! small, non-throwing action surface (navigate/click/type/screenshot/read).
//! A [`SessionSupervisor`] owns at most one handle at a time, forwards its
//! events to a single consumer, and force-recreates the session when the
//! screenshot heartbeat goes silent.
//!
//! The actual browser is reached through the [`PageDriver`] trait so tests
//! (and embedders) can substitute a mock; [`CdpDriverFactory`] is the
//! chromiumoxide-backed production implementation.

pub mod cdp;
pub mod driver;
pub mod error;
pub mod events;
pub mod handle;
pub mod supervisor;
pub mod types;

pub use {
    cdp::CdpDriverFactory,
    driver::{ActionTap, DriverFactory, PageDriver, PageRecordedEvent},
    error::{Result, SessionError},
    events::{EventReceiver, EventSender, SessionEvent},
    handle::SessionHandle,
    supervisor::{EventConsumerFn, HealthConfig, SessionSupervisor},
    types::{RecordedAction, SessionConfig, SessionState},
};
