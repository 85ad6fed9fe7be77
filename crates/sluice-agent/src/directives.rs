//! Suggestion parser - pulls file-edit directives out of generated text
//!
//! Generated analyses end with a block like:
//!
//! ```text
//! FILES_TO_MODIFY:
//! - src/app.py: handle empty carts
//! - README.md: document the new flag
//! ```
//!
//! Extraction is approximate. A response without the marker is reported as
//! [`DirectiveScan::MarkerMissing`], which is distinct from a block whose
//! lines were all malformed.

use crate::path_guard::normalize_relative;
use serde::Serialize;

/// Literal that opens a directive block
pub const DIRECTIVE_MARKER: &str = "FILES_TO_MODIFY:";

/// One requested edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDirective {
    pub path: String,
    pub instruction: String,
}

/// Outcome of scanning a response for a directive block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveScan {
    /// The marker was present. `directives` may still be empty when every
    /// line was malformed; `skipped_lines` counts those.
    Found {
        directives: Vec<FileDirective>,
        skipped_lines: usize,
    },
    /// No marker anywhere in the text
    MarkerMissing,
}

impl DirectiveScan {
    pub fn directives(&self) -> &[FileDirective] {
        match self {
            DirectiveScan::Found { directives, .. } => directives,
            DirectiveScan::MarkerMissing => &[],
        }
    }

    pub fn into_directives(self) -> Vec<FileDirective> {
        match self {
            DirectiveScan::Found { directives, .. } => directives,
            DirectiveScan::MarkerMissing => Vec::new(),
        }
    }

    pub fn marker_found(&self) -> bool {
        matches!(self, DirectiveScan::Found { .. })
    }
}

/// Extract directives from the last directive block in `text`.
///
/// Lines must read `- <path>: <instruction>`; anything else is skipped.
/// Order follows first appearance. A repeated path keeps its first position
/// and takes the later instruction.
pub fn extract_file_directives(text: &str) -> DirectiveScan {
    let block = match text.rfind(DIRECTIVE_MARKER) {
        Some(idx) => &text[idx + DIRECTIVE_MARKER.len()..],
        None => return DirectiveScan::MarkerMissing,
    };

    let mut directives: Vec<FileDirective> = Vec::new();
    let mut skipped_lines = 0;

    for line in block.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_directive_line(line) {
            Some(directive) => {
                if let Some(existing) = directives.iter_mut().find(|d| d.path == directive.path) {
                    tracing::debug!("Directive for {} repeated; later instruction wins", directive.path);
                    existing.instruction = directive.instruction;
                } else {
                    directives.push(directive);
                }
            }
            None => skipped_lines += 1,
        }
    }

    DirectiveScan::Found {
        directives,
        skipped_lines,
    }
}

fn parse_directive_line(line: &str) -> Option<FileDirective> {
    let rest = line.strip_prefix("- ")?;
    let (path, instruction) = rest.split_once(':')?;

    let path = normalize_relative(path.trim().trim_matches('`'));
    if path.is_empty() {
        return None;
    }

    Some(FileDirective {
        path: path.to_string(),
        instruction: instruction.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_directives_in_source_order() {
        let text = "The cart total ignores discounts.\n\n\
                    FILES_TO_MODIFY:\n\
                    - src/cart.py: apply discounts before tax\n\
                    - README.md: mention discount rules\n";

        let scan = extract_file_directives(text);
        assert!(scan.marker_found());
        assert_eq!(
            scan.directives(),
            &[
                FileDirective {
                    path: "src/cart.py".to_string(),
                    instruction: "apply discounts before tax".to_string(),
                },
                FileDirective {
                    path: "README.md".to_string(),
                    instruction: "mention discount rules".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_missing_marker_is_distinct_from_empty_block() {
        assert_eq!(
            extract_file_directives("No changes needed."),
            DirectiveScan::MarkerMissing
        );

        let scan = extract_file_directives("FILES_TO_MODIFY:\nnothing useful here\n");
        assert_eq!(
            scan,
            DirectiveScan::Found {
                directives: vec![],
                skipped_lines: 1,
            }
        );
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let text = "FILES_TO_MODIFY:\n\
                    * src/a.py: wrong bullet\n\
                    - no colon here\n\
                    -  : empty path\n\
                      - `src/b.py`: keep this one\n";

        match extract_file_directives(text) {
            DirectiveScan::Found {
                directives,
                skipped_lines,
            } => {
                assert_eq!(directives.len(), 1);
                assert_eq!(directives[0].path, "src/b.py");
                assert_eq!(skipped_lines, 3);
            }
            DirectiveScan::MarkerMissing => panic!("marker should be found"),
        }
    }

    #[test]
    fn test_repeated_path_later_instruction_wins() {
        let text = "FILES_TO_MODIFY:\n\
                    - a.md: first\n\
                    - b.md: other\n\
                    - a.md: second\n";

        let directives = extract_file_directives(text).into_directives();
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[0].path, "a.md");
        assert_eq!(directives[0].instruction, "second");
        assert_eq!(directives[1].path, "b.md");
    }

    #[test]
    fn test_only_last_block_counts() {
        let text = "Format is FILES_TO_MODIFY: followed by lines.\n\
                    - old.md: from the prose\n\n\
                    FILES_TO_MODIFY:\n\
                    - new.md: the real one\n";

        let directives = extract_file_directives(text).into_directives();
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].path, "new.md");
    }

    #[test]
    fn test_instruction_may_contain_colons_and_be_empty() {
        let text = "FILES_TO_MODIFY:\n- config.json: set timeout: 30\n- app.py:\n";
        let directives = extract_file_directives(text).into_directives();
        assert_eq!(directives[0].instruction, "set timeout: 30");
        assert_eq!(directives[1].path, "app.py");
        assert_eq!(directives[1].instruction, "");
    }

    #[test]
    fn test_dot_slash_paths_are_normalized() {
        let text = "FILES_TO_MODIFY:\n- ./README.md: tweak\n- `./src/cart.py`: fix\n- README.md: again\n";
        let directives = extract_file_directives(text).into_directives();
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[0].path, "README.md");
        assert_eq!(directives[0].instruction, "again");
        assert_eq!(directives[1].path, "src/cart.py");
    }
}
