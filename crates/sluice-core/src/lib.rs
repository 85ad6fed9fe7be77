//! # sluice-core
//!
//! Core types for the sluice change-proposal service.
//!
//! sluice lets an operator request edits to files in a separate project tree.
//! Content transformation is delegated to an external text-generation service,
//! but every filesystem mutation goes through a reviewable gate:
//!
//! - Generated edits become `ProposedChange` rows in `pending` state
//! - Only an explicit accept writes to disk, re-validated at that moment
//! - Every accepted write and every analysis is appended to the audit log

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::{ReResolution, SluiceConfig};
pub use error::{Result, SluiceError};
pub use types::*;
