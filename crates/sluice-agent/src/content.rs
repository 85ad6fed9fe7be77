//! Content fetcher - guarded reads, writes and enumeration of the target tree

use crate::path_guard::PathGuard;
use serde::Serialize;
use sluice_core::config::TargetConfig;
use sluice_core::{FileReference, Result, SluiceError};
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

/// Text of one file read through the guard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    pub size: u64,
    pub extension: String,
}

/// Reads and lists files, always through a [`PathGuard`]
#[derive(Debug, Clone)]
pub struct ContentFetcher {
    guard: PathGuard,
    ignored_dirs: Vec<String>,
}

impl ContentFetcher {
    pub fn new(guard: PathGuard, ignored_dirs: Vec<String>) -> Self {
        Self {
            guard,
            ignored_dirs,
        }
    }

    pub fn from_config(config: &TargetConfig) -> Result<Self> {
        Ok(Self::new(
            PathGuard::from_config(config)?,
            config.ignored_dirs.clone(),
        ))
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// Read a file relative to the target root.
    ///
    /// Guard rejections come back as `Validation` (access denied), missing
    /// files as `NotFound`; raw filesystem errors never leak for those cases.
    pub fn read(&self, rel_path: &str) -> Result<FileContent> {
        let resolved = self.guard.check(rel_path).map_err(access_denied)?;

        let bytes = std::fs::read(&resolved)?;
        let content = String::from_utf8(bytes).map_err(|_| {
            SluiceError::Validation(format!("Access denied: {} is not UTF-8 text", rel_path))
        })?;

        let path = self
            .guard
            .relative(&resolved)
            .unwrap_or_else(|| rel_path.to_string());
        tracing::debug!("Read {} ({} bytes)", path, content.len());

        Ok(FileContent {
            size: content.len() as u64,
            extension: dotted_extension(&resolved),
            path,
            content,
        })
    }

    /// Overwrite an existing file, re-running the guard immediately before
    /// the write. New content above the size ceiling is refused.
    pub fn write(&self, rel_path: &str, content: &str) -> Result<()> {
        let resolved = self.guard.check(rel_path).map_err(access_denied)?;

        if content.len() as u64 > self.guard.max_file_size() {
            return Err(SluiceError::Validation(format!(
                "Access denied: new content for {} exceeds {} bytes",
                rel_path,
                self.guard.max_file_size()
            )));
        }

        std::fs::write(&resolved, content)?;
        tracing::info!("Wrote {} ({} bytes)", rel_path, content.len());
        Ok(())
    }

    /// Immediate children of `dir` with whitelisted extensions
    pub fn list_shallow(&self, dir: &str) -> Result<Vec<FileReference>> {
        let base = self.guard.check_dir(dir)?;

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&base)? {
            let entry = entry?;
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            if !metadata.is_file() {
                continue;
            }
            let path = entry.path();
            if !self.guard.is_allowed_extension(&path) {
                continue;
            }
            if let Some(rel) = self.guard.relative(&path) {
                files.push(FileReference {
                    path: rel,
                    size: metadata.len(),
                    extension: dotted_extension(&path),
                });
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    /// Every candidate file below `dir`.
    ///
    /// Skips ignored directory names and any hidden (dot-prefixed) segment,
    /// and applies the extension and size rules. Paths only, no content.
    pub fn list_recursive(&self, dir: &str) -> Result<Vec<FileReference>> {
        let base = self.guard.check_dir(dir)?;

        let walker = WalkDir::new(&base)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.is_skipped(e));

        let mut files = Vec::new();
        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !self.guard.is_allowed_extension(path) {
                continue;
            }
            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(_) => continue,
            };
            if size > self.guard.max_file_size() {
                continue;
            }
            if let Some(rel) = self.guard.relative(path) {
                files.push(FileReference {
                    path: rel,
                    size,
                    extension: dotted_extension(path),
                });
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!("Enumerated {} candidate files under {}", files.len(), dir);
        Ok(files)
    }

    fn is_skipped(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            return true;
        }
        entry.file_type().is_dir() && self.ignored_dirs.iter().any(|d| d.as_str() == name)
    }
}

fn dotted_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default()
}

fn access_denied(err: SluiceError) -> SluiceError {
    match err {
        SluiceError::Validation(reason) => {
            SluiceError::Validation(format!("Access denied: {}", reason))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fetcher_for(dir: &TempDir) -> ContentFetcher {
        let guard = PathGuard::new(
            dir.path(),
            vec![".md".to_string(), ".py".to_string()],
            1024,
        )
        .unwrap();
        ContentFetcher::new(guard, vec!["node_modules".to_string(), "build".to_string()])
    }

    fn seed(dir: &TempDir) {
        let root = dir.path();
        fs::write(root.join("README.md"), "# Shop").unwrap();
        fs::write(root.join("notes.bin"), "x").unwrap();
        fs::create_dir_all(root.join("src/api")).unwrap();
        fs::write(root.join("src/app.py"), "print('hi')").unwrap();
        fs::write(root.join("src/api/routes.py"), "ROUTES = []").unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("node_modules/pkg/index.md"), "vendored").unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD.md"), "ref").unwrap();
        fs::create_dir_all(root.join("docs/.drafts")).unwrap();
        fs::write(root.join("docs/.drafts/plan.md"), "draft").unwrap();
        fs::write(root.join("docs/big.md"), "x".repeat(2048)).unwrap();
    }

    #[test]
    fn test_read_returns_content() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let fetcher = fetcher_for(&dir);

        let file = fetcher.read("src/app.py").unwrap();
        assert_eq!(file.path, "src/app.py");
        assert_eq!(file.content, "print('hi')");
        assert_eq!(file.extension, ".py");
    }

    #[test]
    fn test_read_rejections_are_access_denied() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let fetcher = fetcher_for(&dir);

        let err = fetcher.read("notes.bin").unwrap_err();
        assert_eq!(err.reason(), "validation_error");
        assert!(err.to_string().contains("Access denied"));

        let err = fetcher.read("../outside.md").unwrap_err();
        assert_eq!(err.reason(), "validation_error");

        let err = fetcher.read("missing.md").unwrap_err();
        assert_eq!(err.reason(), "not_found");
    }

    #[test]
    fn test_list_shallow_filters_extensions() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let fetcher = fetcher_for(&dir);

        let files = fetcher.list_shallow(".").unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["README.md"]);

        let files = fetcher.list_shallow("src").unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["src/app.py"]);
    }

    #[test]
    fn test_list_recursive_skips_ignored_hidden_and_oversized() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let fetcher = fetcher_for(&dir);

        let files = fetcher.list_recursive(".").unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "src/api/routes.py", "src/app.py"]);
    }

    #[test]
    fn test_write_rechecks_guard() {
        let dir = TempDir::new().unwrap();
        seed(&dir);
        let fetcher = fetcher_for(&dir);

        fetcher.write("README.md", "# Shop\n\nUsage").unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("README.md")).unwrap(),
            "# Shop\n\nUsage"
        );

        assert!(fetcher.write("notes.bin", "y").is_err());
        assert!(fetcher.write("README.md", &"x".repeat(2000)).is_err());
        assert_eq!(
            fs::read_to_string(dir.path().join("README.md")).unwrap(),
            "# Shop\n\nUsage"
        );
    }
}
