//! Request handlers.
//!
//! Handlers parse and validate the request, delegate to the job engine and
//! map errors via [`AppError`](crate::error::AppError).

pub mod workflow;
