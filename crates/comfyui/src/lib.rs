//! ComfyUI worker integration.
//!
//! Wraps the collaborator that does the actual image generation: the
//! liveness HTTP endpoint, the command-line execution interface, and the
//! output directory artifacts are collected from. [`executor::JobExecutor`]
//! ties them together into the per-job state machine.

pub mod api;
pub mod artifacts;
pub mod executor;
pub mod health;
pub mod runner;
pub mod subprocess;
