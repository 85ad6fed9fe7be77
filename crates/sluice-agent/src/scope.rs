//! Task scope selector - the cheap first step of two-step task processing
//!
//! 1. Enumerate candidate files (paths and sizes, no content).
//! 2. Ask the generation service which of them matter for the task.
//!
//! The answer is pulled out of free text heuristically. A response without a
//! usable bracketed list is reported as [`ScopeSelection::NotFound`] rather
//! than an error, so false negatives are expected and callers must treat an
//! empty selection as "nothing selected", not "nothing relevant".

use crate::client::GenerationClient;
use crate::content::ContentFetcher;
use crate::path_guard::normalize_relative;
use crate::types::Conversation;
use regex::Regex;
use sluice_core::{FileReference, Result};
use std::sync::{Arc, OnceLock};

const SELECTION_SYSTEM_PROMPT: &str = "You are a helpful assistant that identifies relevant files \
for a task. Return only valid JSON arrays.";

static ARRAY_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn array_pattern() -> Option<&'static Regex> {
    ARRAY_PATTERN
        .get_or_init(|| Regex::new(r"(?s)\[.*?\]").ok())
        .as_ref()
}

/// Why no selection could be extracted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionMiss {
    /// Nothing to choose from; the service was not called
    NoCandidates,
    /// The response contained no bracketed substring
    NoArray,
    /// A bracketed substring was found but was not a list of strings
    Unparseable(String),
}

/// Tagged result of relevance selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeSelection {
    Extracted(Vec<String>),
    NotFound(SelectionMiss),
}

impl ScopeSelection {
    pub fn paths(&self) -> &[String] {
        match self {
            ScopeSelection::Extracted(paths) => paths,
            ScopeSelection::NotFound(_) => &[],
        }
    }

    /// Selected paths, empty when nothing could be extracted
    pub fn into_paths(self) -> Vec<String> {
        match self {
            ScopeSelection::Extracted(paths) => paths,
            ScopeSelection::NotFound(_) => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths().is_empty()
    }
}

/// Scan `text` for the first bracketed array of strings.
///
/// Prose around the array is tolerated. When the shortest bracketed span does
/// not parse (a path containing `]`, say) the span is widened to later closing
/// brackets before giving up.
pub fn extract_selection(text: &str) -> ScopeSelection {
    let start = match array_pattern().and_then(|re| re.find(text)) {
        Some(m) => m.start(),
        None => return ScopeSelection::NotFound(SelectionMiss::NoArray),
    };

    let tail = &text[start..];
    let mut first_error = None;

    for (idx, _) in tail.match_indices(']') {
        let candidate = &tail[..=idx];
        match serde_json::from_str::<Vec<String>>(candidate) {
            Ok(paths) => return ScopeSelection::Extracted(normalize_paths(paths)),
            Err(e) => {
                first_error.get_or_insert_with(|| e.to_string());
            }
        }
    }

    ScopeSelection::NotFound(SelectionMiss::Unparseable(
        first_error.unwrap_or_else(|| "no closing bracket".to_string()),
    ))
}

fn normalize_paths(paths: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(paths.len());
    for path in paths {
        let path = normalize_relative(&path);
        if path.is_empty() || seen.iter().any(|p: &String| p == path) {
            continue;
        }
        seen.push(path.to_string());
    }
    seen
}

/// Build the selection prompt listing every candidate with its size
pub fn build_selection_prompt(task: &str, candidates: &[FileReference]) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("Given this task: \"{}\"\n\n", task));
    prompt.push_str("Here are the available files in the project:\n");
    for file in candidates {
        prompt.push_str(&format!("- {} ({} bytes)\n", file.path, file.size));
    }
    prompt.push_str(
        "\nWhich files are most relevant to complete this task? \
         Return ONLY a JSON array of file paths, nothing else.\n",
    );
    prompt.push_str("Example: [\"src/index.js\", \"config.json\"]\n\n");
    prompt.push_str("Be selective - only include files that are directly relevant to the task.");

    prompt
}

/// Two-step relevance filter over the target tree
pub struct TaskScopeSelector {
    fetcher: Arc<ContentFetcher>,
    client: Arc<dyn GenerationClient>,
    max_tokens: usize,
}

impl TaskScopeSelector {
    pub fn new(
        fetcher: Arc<ContentFetcher>,
        client: Arc<dyn GenerationClient>,
        max_tokens: usize,
    ) -> Self {
        Self {
            fetcher,
            client,
            max_tokens,
        }
    }

    /// Pick the files relevant to `task`.
    ///
    /// A failed generation call is an error; an unusable answer is not.
    pub async fn select(&self, task: &str) -> Result<ScopeSelection> {
        let candidates = self.fetcher.list_recursive(".")?;
        if candidates.is_empty() {
            tracing::warn!("No candidate files under target root; skipping selection");
            return Ok(ScopeSelection::NotFound(SelectionMiss::NoCandidates));
        }

        let prompt = build_selection_prompt(task, &candidates);
        let response = self
            .client
            .generate(
                SELECTION_SYSTEM_PROMPT,
                &Conversation::single(prompt),
                self.max_tokens,
            )
            .await?;

        let selection = extract_selection(&response);
        match &selection {
            ScopeSelection::Extracted(paths) => {
                tracing::info!(
                    "Selected {} of {} candidate files",
                    paths.len(),
                    candidates.len()
                )
            }
            ScopeSelection::NotFound(miss) => {
                tracing::warn!("No file selection in response: {:?}", miss)
            }
        }

        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_guard::PathGuard;
    use crate::testing::ScriptedClient;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_extract_tolerates_prose() {
        let selection =
            extract_selection("Sure! The relevant files are:\n[\"src/cart.py\", \"./README.md\"]\nGood luck.");
        assert_eq!(
            selection,
            ScopeSelection::Extracted(vec!["src/cart.py".to_string(), "README.md".to_string()])
        );
    }

    #[test]
    fn test_no_array_is_not_found_not_error() {
        // A false negative: the model named a file but not in array form
        let selection = extract_selection("You should look at src/cart.py.");
        assert_eq!(selection, ScopeSelection::NotFound(SelectionMiss::NoArray));
        assert!(selection.into_paths().is_empty());
    }

    #[test]
    fn test_unparseable_array_is_reported() {
        let selection = extract_selection("Files: [src/cart.py, README.md]");
        assert!(matches!(
            selection,
            ScopeSelection::NotFound(SelectionMiss::Unparseable(_))
        ));
    }

    #[test]
    fn test_widens_past_bracket_inside_path() {
        let selection = extract_selection(r#"["pages/[id].tsx", "a.md"] trailing ]"#);
        assert_eq!(
            selection.paths(),
            &["pages/[id].tsx".to_string(), "a.md".to_string()]
        );
    }

    #[test]
    fn test_empty_array_and_dedup() {
        assert_eq!(extract_selection("[]"), ScopeSelection::Extracted(vec![]));
        assert_eq!(
            extract_selection(r#"["a.md", "./a.md", " "]"#).paths(),
            &["a.md".to_string()]
        );
    }

    fn selector_for(dir: &TempDir, client: Arc<ScriptedClient>) -> TaskScopeSelector {
        let guard = PathGuard::new(dir.path(), vec![".md".to_string()], 1024).unwrap();
        let fetcher = Arc::new(ContentFetcher::new(guard, vec![]));
        TaskScopeSelector::new(fetcher, client, 256)
    }

    #[tokio::test]
    async fn test_select_sends_candidates() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("README.md"), "# Shop").unwrap();
        fs::write(dir.path().join("CHANGELOG.md"), "v1").unwrap();

        let client = Arc::new(ScriptedClient::new());
        client.push_response("[\"README.md\"]");
        let selector = selector_for(&dir, client.clone());

        let selection = selector.select("add a usage section").await.unwrap();
        assert_eq!(selection.paths(), &["README.md".to_string()]);

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].max_tokens, 256);
        let prompt = requests[0].conversation.last_user_text().unwrap().to_string();
        assert!(prompt.contains("- CHANGELOG.md (2 bytes)"));
        assert!(prompt.contains("add a usage section"));
    }

    #[tokio::test]
    async fn test_select_without_candidates_skips_service() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(ScriptedClient::new());
        let selector = selector_for(&dir, client.clone());

        let selection = selector.select("anything").await.unwrap();
        assert_eq!(selection, ScopeSelection::NotFound(SelectionMiss::NoCandidates));
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_select_propagates_generation_failure() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("README.md"), "# Shop").unwrap();
        let client = Arc::new(ScriptedClient::new());
        client.push_failure("service down");
        let selector = selector_for(&dir, client);

        let err = selector.select("anything").await.unwrap_err();
        assert_eq!(err.reason(), "generation_failure");
    }
}
