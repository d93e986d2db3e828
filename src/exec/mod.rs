// src/exec/mod.rs

//! Process execution layer.
//!
//! Runs the external download tool with `tokio::process::Command`, merges its
//! stdout and stderr into one stream of lines, and exposes exit status and
//! forced termination through [`ProcessHandle`].

pub mod runner;

pub use runner::{
    CommandSpec, ExitStatus, OutputLine, OutputStream, ProcessEvent, ProcessHandle, ProcessRunner,
};
