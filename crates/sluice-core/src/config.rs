//! Configuration management for sluice
//!
//! Settings are read from `sluice.toml` (or an explicit path), fall back to
//! defaults for anything missing, and are then overridden by environment
//! variables for the handful of values that differ per deployment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Result, SluiceError};

/// Default config file name, looked up in the working directory
pub const CONFIG_FILE: &str = "sluice.toml";

/// Service-level sluice configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SluiceConfig {
    /// The sandboxed project tree and its access rules
    #[serde(default)]
    pub target: TargetConfig,

    /// Text-generation service settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Target project's own API (blueprint source)
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Ticket resolution policy
    #[serde(default)]
    pub resolution: ResolutionConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Target tree access rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Directory boundary for every file operation
    #[serde(default = "default_target_root")]
    pub root: PathBuf,

    /// Whitelisted extensions, with leading dot
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    /// Byte ceiling for files that may be read or written
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Directory names skipped during recursive enumeration
    #[serde(default = "default_ignored_dirs")]
    pub ignored_dirs: Vec<String>,
}

/// Generation service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Model name (opus, sonnet, haiku)
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable containing the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Hard timeout for one round trip
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_analysis_tokens")]
    pub analysis_max_tokens: usize,

    #[serde(default = "default_selection_tokens")]
    pub selection_max_tokens: usize,

    #[serde(default = "default_probe_tokens")]
    pub probe_max_tokens: usize,
}

/// Upstream blueprint fetch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,

    /// Paths tried in order on the project's backend URL
    #[serde(default = "default_blueprint_paths")]
    pub blueprint_paths: Vec<String>,
}

/// What to do when a ticket with a settled suggestion is resolved again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReResolution {
    /// Start a new cycle and overwrite the suggestion status
    #[default]
    Overwrite,
    /// Refuse when the suggestion is already accepted or rejected
    RejectSettled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionConfig {
    #[serde(default)]
    pub re_resolution: ReResolution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

// Default value providers
fn default_target_root() -> PathBuf {
    PathBuf::from("./target-project")
}

fn default_allowed_extensions() -> Vec<String> {
    [
        ".md", ".txt", ".json", ".yaml", ".yml", ".py", ".config", ".html", ".css", ".js", ".jsx",
        ".ts", ".tsx",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_size() -> u64 {
    100 * 1024
}

fn default_ignored_dirs() -> Vec<String> {
    [
        ".git",
        "node_modules",
        "__pycache__",
        "venv",
        ".venv",
        "target",
        "dist",
        "build",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_generation_timeout() -> u64 {
    120
}

fn default_analysis_tokens() -> usize {
    4096
}

fn default_selection_tokens() -> usize {
    1024
}

fn default_probe_tokens() -> usize {
    2048
}

fn default_upstream_timeout() -> u64 {
    5
}

fn default_blueprint_paths() -> Vec<String> {
    vec!["/api/blueprint_json".to_string(), "/api/blueprint".to_string()]
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".sluice/sluice.db")
}

impl SluiceConfig {
    /// Load configuration from `path`, or `sluice.toml` in the working
    /// directory, or use defaults. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)?
        } else if path.is_some() {
            return Err(SluiceError::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| SluiceError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Write the default configuration to `path`
    pub fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| SluiceError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `SLUICE_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("SLUICE_TARGET_DIR") {
            self.target.root = PathBuf::from(root);
        }
        if let Ok(model) = std::env::var("SLUICE_MODEL") {
            self.generation.model = model;
        }
        if let Ok(bind) = std::env::var("SLUICE_BIND") {
            self.server.bind = bind;
        }
        if let Ok(db) = std::env::var("SLUICE_DB") {
            self.storage.path = PathBuf::from(db);
        }
    }

    /// Canonical absolute target root. Fails if the directory does not exist.
    pub fn resolved_target_root(&self) -> Result<PathBuf> {
        let root = self.target.root.canonicalize().map_err(|e| {
            SluiceError::Config(format!(
                "Target root {} is not accessible: {}",
                self.target.root.display(),
                e
            ))
        })?;

        if !root.is_dir() {
            return Err(SluiceError::Config(format!(
                "Target root {} is not a directory",
                root.display()
            )));
        }

        Ok(root)
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            root: default_target_root(),
            allowed_extensions: default_allowed_extensions(),
            max_file_size: default_max_file_size(),
            ignored_dirs: default_ignored_dirs(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_generation_timeout(),
            analysis_max_tokens: default_analysis_tokens(),
            selection_max_tokens: default_selection_tokens(),
            probe_max_tokens: default_probe_tokens(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_upstream_timeout(),
            blueprint_paths: default_blueprint_paths(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}
