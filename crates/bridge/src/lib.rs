//! JSONL command bridge for embedding the co-pilot core in a desktop shell.
//!
//! The binary speaks newline-delimited JSON on stdio: commands arrive on
//! stdin, responses and session events leave on stdout. The [`Bridge`]
//! router itself is transport-agnostic and is reused directly in tests.

pub mod command;
pub mod router;

pub use {
    command::{Command, CommandResponse},
    router::Bridge,
};
