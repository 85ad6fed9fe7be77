//! # sluice-agent
//!
//! File access gate and text-generation plumbing for sluice.
//!
//! This crate implements the leaves of the change-proposal pipeline:
//! - `PathGuard`: is a path inside the target root, whitelisted and small enough
//! - `ContentFetcher`: gated reads, writes and candidate enumeration
//! - `GenerationClient`: one blocking round trip to the generation service
//! - `TaskScopeSelector`: cheap relevance filtering before the expensive call
//! - `extract_file_directives`: the `FILES_TO_MODIFY:` block parser
//! - `BlueprintFetcher`: optional upstream API shape for prompt context
//!
//! ## Key Pattern
//!
//! Every generation call is stateless. Callers pass an explicit
//! `Conversation` per request; nothing is shared between requests.

mod auth;
mod blueprint;
mod circuit_breaker;
mod client;
mod content;
mod directives;
mod path_guard;
mod scope;
mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use auth::get_api_key;
pub use blueprint::{format_blueprint, unavailable_note, Blueprint, BlueprintFetcher};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::{AnthropicClient, GenerationClient};
pub use content::{ContentFetcher, FileContent};
pub use directives::{extract_file_directives, DirectiveScan, FileDirective, DIRECTIVE_MARKER};
pub use path_guard::{normalize_relative, PathGuard};
pub use scope::{extract_selection, ScopeSelection, SelectionMiss, TaskScopeSelector};
pub use types::*;
