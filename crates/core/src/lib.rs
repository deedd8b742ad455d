//! Domain types for the comfyq job dispatcher.
//!
//! Pure logic only: the job lifecycle, the failure taxonomy surfaced to
//! callers, poll/result views, and structural validation of workflow
//! documents. Nothing in this crate touches the network or filesystem.

pub mod error;
pub mod job;
pub mod types;
pub mod workflow;
