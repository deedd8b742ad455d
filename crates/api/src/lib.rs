//! HTTP front end for asynchronous ComfyUI workflow execution.
//!
//! Exposes submit/poll endpoints over a [`engine::registry::JobRegistry`]
//! plus a blocking `?wait=true` variant. The binary in `main.rs` wires the
//! configuration, worker collaborators and router together; integration
//! tests build the same router through [`router::build_app_router`].

pub mod background;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod router;
pub mod routes;
pub mod shutdown;
pub mod state;
