//! Database layer for sluice using Turso.
//!
//! Architecture:
//!   - Database file: .sluice/sluice.db
//!   - WAL mode: Write-Ahead Logging for concurrent reads during writes
//!   - Schema: projects, tickets, proposed_changes, changes_history
//!   - Timestamps are stored as RFC 3339 text, lists as JSON arrays
//!
//! Row ids are allocated under a process-wide write lock, which also makes
//! multi-statement checks (one pending change per path, pending-only
//! resolution) atomic with respect to other writers in this process.

use chrono::{DateTime, Utc};
use sluice_core::{
    ChangeHistoryEntry, ChangeRecord, ChangeStatus, NewProject, NewProposedChange, NewTicket,
    Project, ProposedChange, SluiceError, SuggestionStatus, Ticket, TicketStatus,
};
use std::path::Path;
use tokio::sync::Mutex;
use turso::{params, Builder, Connection};

/// Database connection wrapper for Turso
pub struct Database {
    conn: Connection,
    path: String,
    write_lock: Mutex<()>,
}

/// Database errors
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("turso error: {0}")]
    Turso(#[from] turso::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Proposed change #{id} is already {status}")]
    AlreadyResolved { id: i64, status: ChangeStatus },

    #[error("{0}")]
    Conflict(String),

    #[error("invalid stored value: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<DbError> for SluiceError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => SluiceError::NotFound(what),
            DbError::AlreadyResolved { id, status } => SluiceError::StateConflict {
                id,
                status: status.to_string(),
            },
            DbError::Conflict(msg) => SluiceError::Conflict(msg),
            DbError::Io(e) => SluiceError::Io(e),
            other => SluiceError::Storage(other.to_string()),
        }
    }
}

const TICKET_COLUMNS: &str = "id, title, description, category, status, priority, project_id, \
     ai_suggestion, ai_suggestion_status, ai_files_analyzed, created_at, updated_at";

const PROJECT_COLUMNS: &str =
    "id, title, path, description, frontend_url, backend_url, created_at";

const CHANGE_COLUMNS: &str = "id, ticket_id, file_path, original_content, proposed_content, \
     description, status, created_at, resolved_at";

impl Database {
    /// Open the database at `path`, creating the file and parent directory
    /// if needed.
    ///
    /// ```no_run
    /// use sluice_storage::Database;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let db = Database::open(".sluice/sluice.db").await?;
    /// db.init_schema().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        // PRAGMA statements may return rows, so go through query()
        let _ = conn.query("PRAGMA journal_mode=WAL", params![]).await?;
        let _ = conn.query("PRAGMA busy_timeout=5000", params![]).await?;

        tracing::debug!("Opened database at {}", path_str);

        Ok(Database {
            conn,
            path: path_str,
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the database file path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Create tables and indexes. Idempotent.
    pub async fn init_schema(&self) -> Result<()> {
        let statements = vec![
            r#"CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                path TEXT NOT NULL,
                description TEXT,
                frontend_url TEXT,
                backend_url TEXT,
                created_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS tickets (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                category TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'open',
                priority TEXT NOT NULL DEFAULT 'medium',
                project_id INTEGER,
                ai_suggestion TEXT,
                ai_suggestion_status TEXT,
                ai_files_analyzed TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS proposed_changes (
                id INTEGER PRIMARY KEY,
                ticket_id INTEGER,
                file_path TEXT NOT NULL,
                original_content TEXT NOT NULL,
                proposed_content TEXT NOT NULL,
                description TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                resolved_at TEXT
            )"#,
            r#"CREATE TABLE IF NOT EXISTS changes_history (
                id INTEGER PRIMARY KEY,
                ticket_id INTEGER,
                project_id INTEGER,
                files_affected TEXT NOT NULL,
                change_type TEXT NOT NULL,
                summary TEXT NOT NULL,
                response_excerpt TEXT,
                created_at TEXT NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status)",
            "CREATE INDEX IF NOT EXISTS idx_changes_status ON proposed_changes(status)",
            "CREATE INDEX IF NOT EXISTS idx_changes_ticket ON proposed_changes(ticket_id)",
            "CREATE INDEX IF NOT EXISTS idx_changes_path ON proposed_changes(file_path, status)",
        ];

        for stmt in statements {
            self.conn.execute(stmt, params![]).await?;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    pub async fn create_project(&self, project: &NewProject) -> Result<Project> {
        let _guard = self.write_lock.lock().await;
        let id = self.next_id("projects").await?;
        let now = Utc::now();

        self.conn
            .execute(
                "INSERT INTO projects (id, title, path, description, frontend_url, backend_url, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    project.title.clone(),
                    project.path.clone(),
                    project.description.clone(),
                    project.frontend_url.clone(),
                    project.backend_url.clone(),
                    now.to_rfc3339(),
                ],
            )
            .await?;

        tracing::info!("Created project #{} ({})", id, project.title);
        self.get_project(id).await
    }

    pub async fn get_project(&self, id: i64) -> Result<Project> {
        let query = format!("SELECT {} FROM projects WHERE id = ?", PROJECT_COLUMNS);
        let mut rows = self.conn.query(&query, params![id]).await?;

        match rows.next().await? {
            Some(row) => parse_project_row(&row),
            None => Err(DbError::NotFound(format!("Project #{}", id))),
        }
    }

    /// All projects, oldest first
    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let query = format!("SELECT {} FROM projects ORDER BY id ASC", PROJECT_COLUMNS);
        let mut rows = self.conn.query(&query, params![]).await?;

        let mut projects = Vec::new();
        while let Some(row) = rows.next().await? {
            projects.push(parse_project_row(&row)?);
        }
        Ok(projects)
    }

    // ------------------------------------------------------------------
    // Tickets
    // ------------------------------------------------------------------

    pub async fn create_ticket(&self, ticket: &NewTicket) -> Result<Ticket> {
        if let Some(project_id) = ticket.project_id {
            self.get_project(project_id).await?;
        }

        let _guard = self.write_lock.lock().await;
        let id = self.next_id("tickets").await?;
        let now = Utc::now().to_rfc3339();

        self.conn
            .execute(
                "INSERT INTO tickets (id, title, description, category, status, priority, project_id,
                                      ai_files_analyzed, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, '[]', ?, ?)",
                params![
                    id,
                    ticket.title.clone(),
                    ticket.description.clone(),
                    ticket.category.as_str(),
                    TicketStatus::Open.as_str(),
                    ticket.priority.as_str(),
                    opt_int(ticket.project_id),
                    now.clone(),
                    now,
                ],
            )
            .await?;

        tracing::info!("Created ticket #{}: {}", id, ticket.title);
        self.get_ticket(id).await
    }

    pub async fn get_ticket(&self, id: i64) -> Result<Ticket> {
        let query = format!("SELECT {} FROM tickets WHERE id = ?", TICKET_COLUMNS);
        let mut rows = self.conn.query(&query, params![id]).await?;

        match rows.next().await? {
            Some(row) => parse_ticket_row(&row),
            None => Err(DbError::NotFound(format!("Ticket #{}", id))),
        }
    }

    /// Tickets, newest first, optionally filtered by status
    pub async fn list_tickets(&self, status: Option<TicketStatus>) -> Result<Vec<Ticket>> {
        let mut query = format!("SELECT {} FROM tickets", TICKET_COLUMNS);
        let mut params_vec: Vec<turso::Value> = Vec::new();

        if let Some(status) = status {
            query.push_str(" WHERE status = ?");
            params_vec.push(status.as_str().to_string().into());
        }
        query.push_str(" ORDER BY id DESC");

        let mut rows = self.conn.query(&query, params_vec).await?;
        let mut tickets = Vec::new();
        while let Some(row) = rows.next().await? {
            tickets.push(parse_ticket_row(&row)?);
        }
        Ok(tickets)
    }

    pub async fn update_ticket_status(&self, id: i64, status: TicketStatus) -> Result<Ticket> {
        let _guard = self.write_lock.lock().await;
        self.get_ticket(id).await?;

        self.conn
            .execute(
                "UPDATE tickets SET status = ?, updated_at = ? WHERE id = ?",
                params![status.as_str(), Utc::now().to_rfc3339(), id],
            )
            .await?;

        self.get_ticket(id).await
    }

    /// Store the latest analysis on a ticket and mark the suggestion pending
    pub async fn set_ai_suggestion(
        &self,
        id: i64,
        suggestion: &str,
        files_analyzed: &[String],
    ) -> Result<Ticket> {
        let files_json = serde_json::to_string(files_analyzed)?;

        let _guard = self.write_lock.lock().await;
        self.get_ticket(id).await?;

        self.conn
            .execute(
                "UPDATE tickets
                 SET ai_suggestion = ?, ai_suggestion_status = ?, ai_files_analyzed = ?, updated_at = ?
                 WHERE id = ?",
                params![
                    suggestion,
                    SuggestionStatus::Pending.as_str(),
                    files_json,
                    Utc::now().to_rfc3339(),
                    id,
                ],
            )
            .await?;

        self.get_ticket(id).await
    }

    /// Settle the suggestion status, optionally moving the ticket status too
    pub async fn set_ai_status(
        &self,
        id: i64,
        status: SuggestionStatus,
        ticket_status: Option<TicketStatus>,
    ) -> Result<Ticket> {
        let _guard = self.write_lock.lock().await;
        self.get_ticket(id).await?;
        let now = Utc::now().to_rfc3339();

        match ticket_status {
            Some(ticket_status) => {
                self.conn
                    .execute(
                        "UPDATE tickets SET ai_suggestion_status = ?, status = ?, updated_at = ? WHERE id = ?",
                        params![status.as_str(), ticket_status.as_str(), now, id],
                    )
                    .await?;
            }
            None => {
                self.conn
                    .execute(
                        "UPDATE tickets SET ai_suggestion_status = ?, updated_at = ? WHERE id = ?",
                        params![status.as_str(), now, id],
                    )
                    .await?;
            }
        }

        self.get_ticket(id).await
    }

    // ------------------------------------------------------------------
    // Proposed changes
    // ------------------------------------------------------------------

    /// Insert a pending change unless another change for the same path is
    /// still pending. The check and the insert happen under the write lock.
    pub async fn insert_proposed_change(&self, change: &NewProposedChange) -> Result<ProposedChange> {
        let _guard = self.write_lock.lock().await;

        let mut rows = self
            .conn
            .query(
                "SELECT id FROM proposed_changes WHERE file_path = ? AND status = ? LIMIT 1",
                params![change.file_path.clone(), ChangeStatus::Pending.as_str()],
            )
            .await?;
        if let Some(row) = rows.next().await? {
            let existing: i64 = row.get(0)?;
            return Err(DbError::Conflict(format!(
                "{} already has pending change #{}",
                change.file_path, existing
            )));
        }
        drop(rows);

        let id = self.next_id("proposed_changes").await?;
        self.conn
            .execute(
                "INSERT INTO proposed_changes (id, ticket_id, file_path, original_content,
                                               proposed_content, description, status, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    opt_int(change.ticket_id),
                    change.file_path.clone(),
                    change.original_content.clone(),
                    change.proposed_content.clone(),
                    change.description.clone(),
                    ChangeStatus::Pending.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await?;

        self.get_proposed_change(id).await
    }

    pub async fn get_proposed_change(&self, id: i64) -> Result<ProposedChange> {
        let query = format!("SELECT {} FROM proposed_changes WHERE id = ?", CHANGE_COLUMNS);
        let mut rows = self.conn.query(&query, params![id]).await?;

        match rows.next().await? {
            Some(row) => parse_change_row(&row),
            None => Err(DbError::NotFound(format!("Proposed change #{}", id))),
        }
    }

    /// Every pending change, oldest first
    pub async fn list_pending_changes(&self) -> Result<Vec<ProposedChange>> {
        let query = format!(
            "SELECT {} FROM proposed_changes WHERE status = ? ORDER BY id ASC",
            CHANGE_COLUMNS
        );
        self.collect_changes(&query, vec![ChangeStatus::Pending.as_str().to_string().into()])
            .await
    }

    /// Every change for a ticket, any status, oldest first
    pub async fn list_changes_for_ticket(&self, ticket_id: i64) -> Result<Vec<ProposedChange>> {
        let query = format!(
            "SELECT {} FROM proposed_changes WHERE ticket_id = ? ORDER BY id ASC",
            CHANGE_COLUMNS
        );
        self.collect_changes(&query, vec![ticket_id.into()]).await
    }

    /// Move a pending change to a terminal status.
    ///
    /// Fails with `AlreadyResolved` when the change is not pending.
    pub async fn mark_change_resolved(&self, id: i64, status: ChangeStatus) -> Result<ProposedChange> {
        if !status.is_terminal() {
            return Err(DbError::Conflict(format!(
                "Cannot move proposed change #{} back to {}",
                id, status
            )));
        }

        let _guard = self.write_lock.lock().await;
        let current = self.get_proposed_change(id).await?;
        if current.status != ChangeStatus::Pending {
            return Err(DbError::AlreadyResolved {
                id,
                status: current.status,
            });
        }

        self.conn
            .execute(
                "UPDATE proposed_changes SET status = ?, resolved_at = ? WHERE id = ? AND status = ?",
                params![
                    status.as_str(),
                    Utc::now().to_rfc3339(),
                    id,
                    ChangeStatus::Pending.as_str(),
                ],
            )
            .await?;

        self.get_proposed_change(id).await
    }

    async fn collect_changes(
        &self,
        query: &str,
        params_vec: Vec<turso::Value>,
    ) -> Result<Vec<ProposedChange>> {
        let mut rows = self.conn.query(query, params_vec).await?;
        let mut changes = Vec::new();
        while let Some(row) = rows.next().await? {
            changes.push(parse_change_row(&row)?);
        }
        Ok(changes)
    }

    // ------------------------------------------------------------------
    // Audit log
    // ------------------------------------------------------------------

    pub async fn record_change(&self, record: &ChangeRecord) -> Result<i64> {
        let files_json = serde_json::to_string(&record.files_affected)?;

        let _guard = self.write_lock.lock().await;
        let id = self.next_id("changes_history").await?;

        self.conn
            .execute(
                "INSERT INTO changes_history (id, ticket_id, project_id, files_affected, change_type,
                                              summary, response_excerpt, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    opt_int(record.ticket_id),
                    opt_int(record.project_id),
                    files_json,
                    record.change_type.as_str(),
                    record.summary.clone(),
                    record.response_excerpt.clone(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await?;

        tracing::debug!("Recorded {} change #{}", record.change_type.as_str(), id);
        Ok(id)
    }

    /// Most recent audit entries first
    pub async fn list_change_history(&self, limit: usize) -> Result<Vec<ChangeHistoryEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, ticket_id, project_id, files_affected, change_type, summary,
                        response_excerpt, created_at
                 FROM changes_history ORDER BY id DESC LIMIT ?",
                params![limit as i64],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(parse_history_row(&row)?);
        }
        Ok(entries)
    }

    /// Next row id for `table`. Callers must hold the write lock.
    async fn next_id(&self, table: &str) -> Result<i64> {
        let query = format!("SELECT COALESCE(MAX(id), 0) + 1 FROM {}", table);
        let mut rows = self.conn.query(&query, params![]).await?;

        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(1),
        }
    }
}

fn opt_int(value: Option<i64>) -> turso::Value {
    match value {
        Some(v) => turso::Value::Integer(v),
        None => turso::Value::Null,
    }
}

fn get_opt_int(row: &turso::Row, idx: usize) -> Result<Option<i64>> {
    match row.get_value(idx)? {
        turso::Value::Integer(v) => Ok(Some(v)),
        turso::Value::Null => Ok(None),
        other => Err(DbError::Corrupt(format!(
            "expected integer in column {}, got {:?}",
            idx, other
        ))),
    }
}

fn parse_time(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Corrupt(format!("failed to parse {}: {}", column, e)))
}

fn parse_enum<T: std::str::FromStr<Err = SluiceError>>(value: &str) -> Result<T> {
    value.parse::<T>().map_err(|e| DbError::Corrupt(e.to_string()))
}

fn parse_json_list(value: &str) -> Result<Vec<String>> {
    if value.is_empty() || value == "null" {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(value)?)
}

fn parse_project_row(row: &turso::Row) -> Result<Project> {
    let created_at: String = row.get(6)?;

    Ok(Project {
        id: row.get(0)?,
        title: row.get(1)?,
        path: row.get(2)?,
        description: row.get(3)?,
        frontend_url: row.get(4)?,
        backend_url: row.get(5)?,
        created_at: parse_time(&created_at, "created_at")?,
    })
}

fn parse_ticket_row(row: &turso::Row) -> Result<Ticket> {
    let category: String = row.get(3)?;
    let status: String = row.get(4)?;
    let priority: String = row.get(5)?;
    let ai_status: Option<String> = row.get(8)?;
    let files_json: String = row.get(9)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(Ticket {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        category: parse_enum(&category)?,
        status: parse_enum(&status)?,
        priority: parse_enum(&priority)?,
        project_id: get_opt_int(row, 6)?,
        ai_suggestion: row.get(7)?,
        ai_suggestion_status: ai_status.as_deref().map(parse_enum).transpose()?,
        ai_files_analyzed: parse_json_list(&files_json)?,
        created_at: parse_time(&created_at, "created_at")?,
        updated_at: parse_time(&updated_at, "updated_at")?,
    })
}

fn parse_change_row(row: &turso::Row) -> Result<ProposedChange> {
    let status: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let resolved_at: Option<String> = row.get(8)?;

    Ok(ProposedChange {
        id: row.get(0)?,
        ticket_id: get_opt_int(row, 1)?,
        file_path: row.get(2)?,
        original_content: row.get(3)?,
        proposed_content: row.get(4)?,
        description: row.get(5)?,
        status: parse_enum(&status)?,
        created_at: parse_time(&created_at, "created_at")?,
        resolved_at: resolved_at
            .as_deref()
            .map(|s| parse_time(s, "resolved_at"))
            .transpose()?,
    })
}

fn parse_history_row(row: &turso::Row) -> Result<ChangeHistoryEntry> {
    let files_json: String = row.get(3)?;
    let change_type: String = row.get(4)?;
    let created_at: String = row.get(7)?;

    Ok(ChangeHistoryEntry {
        id: row.get(0)?,
        record: ChangeRecord {
            ticket_id: get_opt_int(row, 1)?,
            project_id: get_opt_int(row, 2)?,
            files_affected: parse_json_list(&files_json)?,
            change_type: parse_enum(&change_type)?,
            summary: row.get(5)?,
            response_excerpt: row.get(6)?,
        },
        created_at: parse_time(&created_at, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_error_maps_to_sluice_error() {
        let err: SluiceError = DbError::NotFound("Ticket #4".to_string()).into();
        assert_eq!(err.reason(), "not_found");

        let err: SluiceError = DbError::AlreadyResolved {
            id: 7,
            status: ChangeStatus::Accepted,
        }
        .into();
        assert_eq!(err.reason(), "state_conflict");
        assert_eq!(err.to_string(), "Proposed change #7 is already accepted");

        let err: SluiceError = DbError::Corrupt("bad".to_string()).into();
        assert_eq!(err.reason(), "storage_error");
    }

    #[test]
    fn test_parse_json_list_tolerates_empty() {
        assert!(parse_json_list("").unwrap().is_empty());
        assert!(parse_json_list("null").unwrap().is_empty());
        assert_eq!(parse_json_list(r#"["a.md"]"#).unwrap(), vec!["a.md"]);
    }
}
