//! Domain types shared across sluice crates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SluiceError;

/// Lifecycle status of a single proposed file change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Pending => "pending",
            ChangeStatus::Accepted => "accepted",
            ChangeStatus::Rejected => "rejected",
        }
    }

    /// Accepted and rejected are terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChangeStatus::Pending)
    }
}

impl std::fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChangeStatus {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChangeStatus::Pending),
            "accepted" => Ok(ChangeStatus::Accepted),
            "rejected" => Ok(ChangeStatus::Rejected),
            other => Err(SluiceError::Validation(format!(
                "Invalid change status: {}",
                other
            ))),
        }
    }
}

/// Outcome requested when resolving a pending change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOutcome {
    Accepted,
    Rejected,
}

impl From<ChangeOutcome> for ChangeStatus {
    fn from(outcome: ChangeOutcome) -> Self {
        match outcome {
            ChangeOutcome::Accepted => ChangeStatus::Accepted,
            ChangeOutcome::Rejected => ChangeStatus::Rejected,
        }
    }
}

/// Ticket-level summary of the current AI resolution cycle.
///
/// Independent of the status of any individual `ProposedChange`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    Pending,
    Accepted,
    Rejected,
}

impl SuggestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionStatus::Pending => "pending",
            SuggestionStatus::Accepted => "accepted",
            SuggestionStatus::Rejected => "rejected",
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, SuggestionStatus::Pending)
    }
}

impl std::str::FromStr for SuggestionStatus {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SuggestionStatus::Pending),
            "accepted" => Ok(SuggestionStatus::Accepted),
            "rejected" => Ok(SuggestionStatus::Rejected),
            other => Err(SluiceError::Validation(format!(
                "Invalid suggestion status: {}",
                other
            ))),
        }
    }
}

/// Ticket workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    #[default]
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TicketStatus::Open),
            "in_progress" => Ok(TicketStatus::InProgress),
            "resolved" => Ok(TicketStatus::Resolved),
            "closed" => Ok(TicketStatus::Closed),
            other => Err(SluiceError::Validation(format!(
                "Invalid ticket status: {}. Use open, in_progress, resolved or closed.",
                other
            ))),
        }
    }
}

/// Ticket category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketCategory {
    Bug,
    Feature,
    Task,
    Improvement,
}

impl TicketCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketCategory::Bug => "bug",
            TicketCategory::Feature => "feature",
            TicketCategory::Task => "task",
            TicketCategory::Improvement => "improvement",
        }
    }
}

impl std::str::FromStr for TicketCategory {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bug" => Ok(TicketCategory::Bug),
            "feature" => Ok(TicketCategory::Feature),
            "task" => Ok(TicketCategory::Task),
            "improvement" => Ok(TicketCategory::Improvement),
            other => Err(SluiceError::Validation(format!(
                "Invalid category: {}. Use bug, feature, task or improvement.",
                other
            ))),
        }
    }
}

/// Ticket priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(SluiceError::Validation(format!(
                "Invalid priority: {}",
                other
            ))),
        }
    }
}

/// A work ticket that the orchestrator can resolve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub category: TicketCategory,
    pub status: TicketStatus,
    pub priority: Priority,
    pub project_id: Option<i64>,
    /// Raw generated response from the latest resolution cycle
    pub ai_suggestion: Option<String>,
    pub ai_suggestion_status: Option<SuggestionStatus>,
    /// Files whose content was sent for analysis, in selection order
    pub ai_files_analyzed: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to open a ticket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTicket {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: TicketCategory,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub project_id: Option<i64>,
}

/// A target project and the URLs of its own running service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub title: String,
    pub path: String,
    pub description: Option<String>,
    pub frontend_url: Option<String>,
    pub backend_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProject {
    pub title: String,
    pub path: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub frontend_url: Option<String>,
    #[serde(default)]
    pub backend_url: Option<String>,
}

/// A reviewable, not-yet-applied file edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedChange {
    pub id: i64,
    pub ticket_id: Option<i64>,
    /// Path relative to the target root
    pub file_path: String,
    /// Snapshot of the file when the change was proposed
    pub original_content: String,
    pub proposed_content: String,
    pub description: String,
    pub status: ChangeStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Fields for a new proposed change. Always stored as `pending`.
#[derive(Debug, Clone)]
pub struct NewProposedChange {
    pub ticket_id: Option<i64>,
    pub file_path: String,
    pub original_content: String,
    pub proposed_content: String,
    pub description: String,
}

/// Kind of change recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Modify,
    Delete,
    Analyze,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "create",
            ChangeType::Modify => "modify",
            ChangeType::Delete => "delete",
            ChangeType::Analyze => "analyze",
        }
    }
}

impl std::str::FromStr for ChangeType {
    type Err = SluiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(ChangeType::Create),
            "modify" => Ok(ChangeType::Modify),
            "delete" => Ok(ChangeType::Delete),
            "analyze" => Ok(ChangeType::Analyze),
            other => Err(SluiceError::Validation(format!(
                "Invalid change type: {}",
                other
            ))),
        }
    }
}

/// Append-only audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub ticket_id: Option<i64>,
    pub project_id: Option<i64>,
    pub files_affected: Vec<String>,
    pub change_type: ChangeType,
    pub summary: String,
    /// Excerpt of the generated response
    pub response_excerpt: Option<String>,
}

/// A stored audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeHistoryEntry {
    pub id: i64,
    #[serde(flatten)]
    pub record: ChangeRecord,
    pub created_at: DateTime<Utc>,
}

/// A candidate file under the target root. Computed on demand, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReference {
    /// Path relative to the target root, `/`-separated
    pub path: String,
    pub size: u64,
    /// Extension including the leading dot, e.g. `.md`
    pub extension: String,
}

/// Truncate to at most `max_chars` characters on a char boundary
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_status_roundtrip_strings() {
        for status in [
            ChangeStatus::Pending,
            ChangeStatus::Accepted,
            ChangeStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<ChangeStatus>().unwrap(), status);
        }
        assert!("applied".parse::<ChangeStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ChangeStatus::Pending.is_terminal());
        assert!(ChangeStatus::Accepted.is_terminal());
        assert!(ChangeStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_outcome_maps_to_status() {
        assert_eq!(
            ChangeStatus::from(ChangeOutcome::Accepted),
            ChangeStatus::Accepted
        );
        assert_eq!(
            ChangeStatus::from(ChangeOutcome::Rejected),
            ChangeStatus::Rejected
        );
    }

    #[test]
    fn test_ticket_status_serde_snake_case() {
        let json = serde_json::to_string(&TicketStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        assert_eq!(
            "in_progress".parse::<TicketStatus>().unwrap(),
            TicketStatus::InProgress
        );
    }

    #[test]
    fn test_new_ticket_defaults() {
        let ticket: NewTicket =
            serde_json::from_str(r#"{"title": "Broken link", "category": "bug"}"#).unwrap();
        assert_eq!(ticket.priority, Priority::Medium);
        assert!(ticket.project_id.is_none());
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("hello", 10), "hello");
        assert_eq!(excerpt("hello", 2), "he");
        assert_eq!(excerpt("héllo", 2), "hé");
        assert_eq!(excerpt("", 3), "");
    }
}
