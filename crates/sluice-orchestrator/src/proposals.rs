//! Change proposal store - owns the ProposedChange lifecycle
//!
//! ```text
//! pending --accept--> accepted   (terminal, gated write performed)
//! pending --reject--> rejected   (terminal, no write)
//! ```
//!
//! No other transitions exist. Creating a proposal never touches the
//! filesystem. Accepting re-runs the path guard and writes before the status
//! is committed, so a failed write leaves the change pending.
//!
//! Accepts are serialized per file path by an in-process lease, and storage
//! refuses a second pending change for a path that already has one.

use sluice_agent::ContentFetcher;
use sluice_core::fail_open::fail_open;
use sluice_core::{
    excerpt, ChangeOutcome, ChangeRecord, ChangeStatus, ChangeType, NewProposedChange,
    ProposedChange, Result, SluiceError,
};
use sluice_storage::Database;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const SUMMARY_CHARS: usize = 200;
const CONTENT_EXCERPT_CHARS: usize = 500;

/// Persisted proposals plus the gated apply step
pub struct ChangeProposalStore {
    db: Arc<Database>,
    fetcher: Arc<ContentFetcher>,
    leases: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChangeProposalStore {
    pub fn new(db: Arc<Database>, fetcher: Arc<ContentFetcher>) -> Self {
        Self {
            db,
            fetcher,
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Record a new pending change. Never writes to the target tree.
    pub async fn create(&self, change: NewProposedChange) -> Result<ProposedChange> {
        if change.file_path.trim().is_empty() {
            return Err(SluiceError::Validation("file_path is required".to_string()));
        }

        let created = self.db.insert_proposed_change(&change).await?;
        tracing::info!(
            "Created proposed change #{} for {}",
            created.id,
            created.file_path
        );
        Ok(created)
    }

    pub async fn get(&self, id: i64) -> Result<ProposedChange> {
        Ok(self.db.get_proposed_change(id).await?)
    }

    pub async fn list_pending(&self) -> Result<Vec<ProposedChange>> {
        Ok(self.db.list_pending_changes().await?)
    }

    pub async fn list_for_ticket(&self, ticket_id: i64) -> Result<Vec<ProposedChange>> {
        Ok(self.db.list_changes_for_ticket(ticket_id).await?)
    }

    /// Whether any pending change targets `file_path`
    pub async fn has_pending_for_path(&self, file_path: &str) -> Result<bool> {
        Ok(self
            .list_pending()
            .await?
            .iter()
            .any(|change| change.file_path == file_path))
    }

    /// Move a pending change to its terminal status.
    ///
    /// Fails with `StateConflict` when the change is no longer pending. On
    /// accept, a failed write is returned and the change stays pending.
    pub async fn resolve(&self, id: i64, outcome: ChangeOutcome) -> Result<ProposedChange> {
        let change = self.db.get_proposed_change(id).await?;
        if change.status.is_terminal() {
            return Err(conflict(&change));
        }

        let lease = self.lease_for(&change.file_path);
        let result = {
            let _held = lease.lock().await;
            self.resolve_leased(id, outcome).await
        };
        self.release_lease(&change.file_path, lease);
        result
    }

    async fn resolve_leased(&self, id: i64, outcome: ChangeOutcome) -> Result<ProposedChange> {
        // Another resolver may have won while we waited for the lease
        let change = self.db.get_proposed_change(id).await?;
        if change.status.is_terminal() {
            return Err(conflict(&change));
        }

        match outcome {
            ChangeOutcome::Accepted => {
                if let Err(e) = self.fetcher.write(&change.file_path, &change.proposed_content) {
                    tracing::warn!(
                        "Apply of change #{} to {} failed, leaving it pending: {}",
                        id,
                        change.file_path,
                        e
                    );
                    return Err(e);
                }

                let resolved = self
                    .db
                    .mark_change_resolved(id, ChangeStatus::Accepted)
                    .await?;
                tracing::info!("Applied change #{} to {}", id, resolved.file_path);

                let record = ChangeRecord {
                    ticket_id: resolved.ticket_id,
                    project_id: None,
                    files_affected: vec![resolved.file_path.clone()],
                    change_type: ChangeType::Modify,
                    summary: excerpt(&resolved.description, SUMMARY_CHARS),
                    response_excerpt: Some(excerpt(
                        &resolved.proposed_content,
                        CONTENT_EXCERPT_CHARS,
                    )),
                };
                fail_open("audit_log", || async {
                    Ok::<_, SluiceError>(self.db.record_change(&record).await?)
                })
                .await;

                Ok(resolved)
            }
            ChangeOutcome::Rejected => {
                let resolved = self
                    .db
                    .mark_change_resolved(id, ChangeStatus::Rejected)
                    .await?;
                tracing::info!("Rejected change #{} for {}", id, resolved.file_path);
                Ok(resolved)
            }
        }
    }

    fn lease_for(&self, file_path: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut leases = self
            .leases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        leases
            .entry(file_path.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the path's lease once no other resolver holds a handle to it
    fn release_lease(&self, file_path: &str, lease: Arc<tokio::sync::Mutex<()>>) {
        let mut leases = self
            .leases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // One handle in the map plus ours
        if leases
            .get(file_path)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lease) && Arc::strong_count(entry) == 2)
        {
            leases.remove(file_path);
        }
    }
}

fn conflict(change: &ProposedChange) -> SluiceError {
    SluiceError::StateConflict {
        id: change.id,
        status: change.status.to_string(),
    }
}
