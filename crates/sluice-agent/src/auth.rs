//! API key lookup for the generation service
//!
//! The configured variable is checked first, then the two conventional names.

use sluice_core::{Result, SluiceError};
use std::env;

const FALLBACK_KEY_VARS: &[&str] = &["ANTHROPIC_API_KEY", "CLAUDE_API_KEY"];

/// Get the API key, preferring `configured_var`
pub fn get_api_key(configured_var: &str) -> Result<String> {
    let candidates = std::iter::once(configured_var)
        .chain(FALLBACK_KEY_VARS.iter().copied())
        .filter(|name| !name.is_empty());

    for name in candidates {
        if let Ok(key) = env::var(name) {
            if !key.trim().is_empty() {
                tracing::debug!("Using API key from {}", name);
                return Ok(key);
            }
        }
    }

    Err(SluiceError::Config(format!(
        "No API key found. Set {} (or ANTHROPIC_API_KEY / CLAUDE_API_KEY).",
        configured_var
    )))
}
