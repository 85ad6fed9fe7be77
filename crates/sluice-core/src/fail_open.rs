//! Fail-open utilities for graceful degradation
//!
//! Use these for auxiliary work whose failure must not abort the operation
//! that triggered it: audit logging and optional upstream context.
//!
//! DO NOT use fail-open for:
//! - Generation calls (no partial proposal may be created)
//! - Gated file writes
//! - Proposed change status transitions

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Execute an auxiliary operation, logging and swallowing any failure.
///
/// Returns `None` when the operation failed.
///
/// ```no_run
/// use sluice_core::fail_open::fail_open;
/// use sluice_core::Result;
///
/// async fn append_audit_entry() -> Result<i64> {
///     Ok(1)
/// }
///
/// async fn example() {
///     let id = fail_open("audit_log", || append_audit_entry()).await;
///     // id is None if the audit write failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}
