//! ComfyUI client library for the audio workflow worker.
//!
//! Provides a WebSocket connection with a process-wide client
//! identity, REST wrappers for workflow submission and output
//! retrieval, typed message parsing, and a blocking execution runner
//! that drives a workflow to completion.

pub mod api;
pub mod client;
pub mod messages;
pub mod runner;
