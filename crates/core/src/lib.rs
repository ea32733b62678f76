//! Domain types for audio workflow jobs.
//!
//! Holds the workflow-graph model (node lookup and mutation) and the
//! domain error type shared by the rest of the workspace.

pub mod error;
pub mod workflow;
