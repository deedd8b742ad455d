//! Job dispatch engine.
//!
//! Holds the [`registry::JobRegistry`], which maps opaque handles to job
//! state and runs submitted jobs off the request path.

pub mod registry;
