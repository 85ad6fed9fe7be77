//! # sluice-server
//!
//! HTTP surface over the orchestrator. All routes live under `/api` and
//! every failure is returned as `{ "error", "reason" }` JSON.

pub mod error;
mod routes;
mod server;

pub use error::{ApiError, ApiResult, ErrorBody};
pub use server::{router, serve, AppState, SharedState};
