//! Workflow recording, storage, and replay.
//!
//! A [`Workflow`] is an ordered list of [`Step`]s captured from a live
//! browser session by the [`Recorder`] and replayed against one by the
//! [`WorkflowRunner`]. Workflows persist as a single pretty-printed JSON
//! document through the [`WorkflowStore`] trait; [`FileStore`] is the
//! on-disk implementation and [`MemoryStore`] backs tests.

pub mod error;
pub mod interpreter;
pub mod recorder;
pub mod store;
pub mod store_file;
pub mod store_memory;
pub mod types;

pub use {
    error::{Error, Result},
    interpreter::{RunnerConfig, WorkflowRunner, substitute},
    recorder::Recorder,
    store::WorkflowStore,
    store_file::FileStore,
    store_memory::MemoryStore,
    types::{
        ConditionalBranch, ParameterSpec, ParameterType, RetryOptions, Step, StepAction,
        StepPayload, Workflow, WorkflowPatch,
    },
};
