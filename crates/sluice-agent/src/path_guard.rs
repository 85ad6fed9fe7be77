//! Path Guard - decides whether a file may be read or written
//!
//! A path passes when, evaluated against the live filesystem:
//! - its symlink-resolved absolute form is a strict descendant of the target root
//! - it exists and is a regular file
//! - its extension is whitelisted
//! - its size does not exceed the byte ceiling
//!
//! The result is only valid at the moment of the check. Callers re-check
//! immediately before every write; the remaining time-of-check/time-of-use
//! gap is accepted.

use sluice_core::config::TargetConfig;
use sluice_core::{Result, SluiceError};
use std::path::{Component, Path, PathBuf};

/// Canonical spelling of a model-supplied relative path: trimmed, with any
/// leading `./` segments removed. Used wherever generated paths are compared.
pub fn normalize_relative(path: &str) -> &str {
    let mut path = path.trim();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.trim_start_matches('/');
    }
    path
}

/// Gate for every file operation under the target root
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
    allowed_extensions: Vec<String>,
    max_file_size: u64,
}

impl PathGuard {
    /// Create a guard. The root is canonicalized once and never changes.
    pub fn new(
        root: impl AsRef<Path>,
        allowed_extensions: Vec<String>,
        max_file_size: u64,
    ) -> Result<Self> {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|e| {
            SluiceError::Config(format!(
                "Target root {} is not accessible: {}",
                root.display(),
                e
            ))
        })?;

        if !root.is_dir() {
            return Err(SluiceError::Config(format!(
                "Target root {} is not a directory",
                root.display()
            )));
        }

        Ok(Self {
            root,
            allowed_extensions,
            max_file_size,
        })
    }

    pub fn from_config(config: &TargetConfig) -> Result<Self> {
        Self::new(
            &config.root,
            config.allowed_extensions.clone(),
            config.max_file_size,
        )
    }

    /// Canonical target root
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// True iff `path` is currently safe to read or write
    pub fn validate(&self, path: &str) -> bool {
        self.check(path).is_ok()
    }

    /// Run every rule and return the canonical absolute path.
    ///
    /// Fails with `NotFound` when the file does not exist and with
    /// `Validation` for every other rule, carrying the reason.
    pub fn check(&self, path: &str) -> Result<PathBuf> {
        let candidate = self.lexical_candidate(path)?;

        let resolved = candidate.canonicalize().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SluiceError::NotFound(format!("File not found: {}", path))
            } else {
                SluiceError::Validation(format!("Cannot resolve {}: {}", path, e))
            }
        })?;

        // Symlinks may point anywhere; judge the resolved location
        if !self.is_strict_descendant(&resolved) {
            tracing::warn!("Rejected {}: resolves outside target root", path);
            return Err(SluiceError::Validation(format!(
                "Path outside target root: {}",
                path
            )));
        }

        let metadata = std::fs::metadata(&resolved)?;
        if !metadata.is_file() {
            return Err(SluiceError::Validation(format!("Not a regular file: {}", path)));
        }

        if !self.is_allowed_extension(&resolved) {
            return Err(SluiceError::Validation(format!(
                "File extension not allowed: {}",
                path
            )));
        }

        if metadata.len() > self.max_file_size {
            return Err(SluiceError::Validation(format!(
                "File too large: {} ({} bytes, limit {})",
                path,
                metadata.len(),
                self.max_file_size
            )));
        }

        Ok(resolved)
    }

    /// Whether the extension of `path` is whitelisted
    pub fn is_allowed_extension(&self, path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => {
                let dotted = format!(".{}", ext);
                self.allowed_extensions.iter().any(|allowed| *allowed == dotted)
            }
            None => false,
        }
    }

    /// Resolve a directory under the root (the root itself included)
    pub fn check_dir(&self, dir: &str) -> Result<PathBuf> {
        let candidate = if dir.is_empty() || dir == "." {
            self.root.clone()
        } else {
            self.lexical_candidate(dir)?
        };

        let resolved = candidate
            .canonicalize()
            .map_err(|_| SluiceError::NotFound(format!("Directory not found: {}", dir)))?;

        if resolved != self.root && !self.is_strict_descendant(&resolved) {
            return Err(SluiceError::Validation(format!(
                "Directory outside target root: {}",
                dir
            )));
        }
        if !resolved.is_dir() {
            return Err(SluiceError::NotFound(format!("Directory not found: {}", dir)));
        }

        Ok(resolved)
    }

    /// `/`-separated path relative to the root
    pub fn relative(&self, absolute: &Path) -> Option<String> {
        let rel = absolute.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        Some(parts.join("/"))
    }

    fn is_strict_descendant(&self, resolved: &Path) -> bool {
        resolved != self.root && resolved.starts_with(&self.root)
    }

    /// Join `path` onto the root and normalize `.`/`..` without touching the
    /// filesystem, rejecting anything that climbs above the root.
    fn lexical_candidate(&self, path: &str) -> Result<PathBuf> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(SluiceError::Validation("Empty path".to_string()));
        }

        let raw = Path::new(trimmed);
        let joined = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.root.join(raw)
        };

        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(SluiceError::Validation(format!(
                            "Path traversal not allowed: {}",
                            path
                        )));
                    }
                }
                Component::CurDir => {}
                other => normalized.push(other.as_os_str()),
            }
        }

        if !normalized.starts_with(&self.root) || normalized == self.root {
            tracing::warn!("Rejected {}: outside target root", path);
            return Err(SluiceError::Validation(format!(
                "Path outside target root: {}",
                path
            )));
        }

        Ok(normalized)
    }
}
