//! Ticket resolution orchestrator
//!
//! Top-level workflow combining ticket context, the optional upstream
//! blueprint, relevance selection, analysis, directive parsing and the
//! proposal store:
//!
//! ```text
//! resolve(ticket)
//!   ├─ blueprint (best effort, degrades to a note)
//!   ├─ TaskScopeSelector::select          fatal if nothing selected
//!   ├─ read selected files                fatal if none readable
//!   ├─ GenerationClient::generate         fatal on failure
//!   ├─ persist suggestion on the ticket
//!   ├─ reject the ticket's still-pending changes from the last cycle
//!   └─ per directive in the analyzed set: propose() (skipped on failure)
//! ```
//!
//! `analyze_task` runs the same first four steps for a free-form task and
//! stops there:
//!
//! ```text
//! analyze_task(task) -> files_analyzed, total_chars, response
//! ```

use crate::prompt::{
    build_analysis_prompt, build_chat_prompt, build_probe_prompt, build_proposal_prompt,
    build_ticket_task, directive_instruction, strip_code_fence, ANALYSIS_SYSTEM_PROMPT,
    CHAT_SYSTEM_PROMPT, PROBE_SYSTEM_PROMPT, PROPOSAL_SYSTEM_PROMPT,
};
use crate::proposals::ChangeProposalStore;
use serde::Serialize;
use sluice_agent::{
    extract_file_directives, format_blueprint, unavailable_note, BlueprintFetcher,
    ContentFetcher, Conversation, FileContent, GenerationClient, TaskScopeSelector,
};
use sluice_core::fail_open::fail_open;
use sluice_core::{
    excerpt, ChangeOutcome, ChangeRecord, ChangeStatus, ChangeType, NewProposedChange, Project,
    ProposedChange, ReResolution, Result, SluiceConfig, SluiceError, SuggestionStatus,
    TicketStatus,
};
use sluice_storage::Database;
use std::sync::Arc;

const SUMMARY_CHARS: usize = 200;
const ANALYSIS_EXCERPT_CHARS: usize = 1000;

/// Token budgets and policy for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub analysis_max_tokens: usize,
    pub selection_max_tokens: usize,
    pub probe_max_tokens: usize,
    pub re_resolution: ReResolution,
}

impl OrchestratorSettings {
    pub fn from_config(config: &SluiceConfig) -> Self {
        Self {
            analysis_max_tokens: config.generation.analysis_max_tokens,
            selection_max_tokens: config.generation.selection_max_tokens,
            probe_max_tokens: config.generation.probe_max_tokens,
            re_resolution: config.resolution.re_resolution,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&SluiceConfig::default())
    }
}

/// A change created for one directive during `resolve`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProposalRef {
    pub file: String,
    pub change_id: i64,
}

/// Result of one resolution cycle
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionReport {
    pub ticket_id: i64,
    pub suggestion: String,
    pub files_analyzed: Vec<String>,
    pub proposed_changes: Vec<ProposalRef>,
    /// Pending changes from the previous cycle, rejected by this one
    pub superseded_changes: Vec<i64>,
    /// Whether the response contained a directive block at all
    pub directives_found: bool,
}

/// Result of a standalone two-step analysis
#[derive(Debug, Clone, Serialize)]
pub struct TaskAnalysis {
    pub files_analyzed: Vec<String>,
    pub total_files: usize,
    pub total_chars: usize,
    pub response: String,
}

/// Action on a ticket's current suggestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketAction {
    Accept,
    Reject,
    Probe { message: String },
}

impl TicketAction {
    /// Parse the wire form `{action, message?}`
    pub fn parse(action: &str, message: Option<&str>) -> Result<Self> {
        match action.trim() {
            "accept" => Ok(TicketAction::Accept),
            "reject" => Ok(TicketAction::Reject),
            "probe" => {
                let message = message.map(str::trim).unwrap_or_default();
                if message.is_empty() {
                    return Err(SluiceError::Validation(
                        "Message required for probe action".to_string(),
                    ));
                }
                Ok(TicketAction::Probe {
                    message: message.to_string(),
                })
            }
            _ => Err(SluiceError::Validation(
                "Invalid action. Use: accept, reject, or probe".to_string(),
            )),
        }
    }
}

/// A pending change that could not be applied during ticket accept
#[derive(Debug, Clone, Serialize)]
pub struct FailedApply {
    pub change_id: i64,
    pub file_path: String,
    pub error: String,
}

/// Outcome of [`TicketResolutionOrchestrator::act`]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionOutcome {
    Accept {
        applied_changes: Vec<String>,
        failed_changes: Vec<FailedApply>,
    },
    Reject {
        rejected_changes: Vec<i64>,
    },
    Probe {
        response: String,
    },
}

/// Top-level propose / resolve / act workflow
pub struct TicketResolutionOrchestrator {
    db: Arc<Database>,
    fetcher: Arc<ContentFetcher>,
    client: Arc<dyn GenerationClient>,
    proposals: Arc<ChangeProposalStore>,
    selector: TaskScopeSelector,
    blueprints: BlueprintFetcher,
    settings: OrchestratorSettings,
}

impl TicketResolutionOrchestrator {
    pub fn new(
        db: Arc<Database>,
        fetcher: Arc<ContentFetcher>,
        client: Arc<dyn GenerationClient>,
        blueprints: BlueprintFetcher,
        settings: OrchestratorSettings,
    ) -> Self {
        let proposals = Arc::new(ChangeProposalStore::new(db.clone(), fetcher.clone()));
        let selector = TaskScopeSelector::new(
            fetcher.clone(),
            client.clone(),
            settings.selection_max_tokens,
        );

        Self {
            db,
            fetcher,
            client,
            proposals,
            selector,
            blueprints,
            settings,
        }
    }

    /// Wire everything from configuration
    pub fn from_config(
        config: &SluiceConfig,
        db: Arc<Database>,
        client: Arc<dyn GenerationClient>,
    ) -> Result<Self> {
        let fetcher = Arc::new(ContentFetcher::from_config(&config.target)?);
        let blueprints = BlueprintFetcher::new(&config.upstream)?;
        Ok(Self::new(
            db,
            fetcher,
            client,
            blueprints,
            OrchestratorSettings::from_config(config),
        ))
    }

    pub fn proposals(&self) -> &Arc<ChangeProposalStore> {
        &self.proposals
    }

    pub fn fetcher(&self) -> &Arc<ContentFetcher> {
        &self.fetcher
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn model_name(&self) -> String {
        self.client.model_name()
    }

    /// Generate a full replacement for one file and store it as pending.
    ///
    /// Nothing is written to the target tree. A generation failure creates
    /// no proposal.
    pub async fn propose(
        &self,
        ticket_id: Option<i64>,
        file_path: &str,
        instruction: &str,
    ) -> Result<ProposedChange> {
        if instruction.trim().is_empty() {
            return Err(SluiceError::Validation("instruction is required".to_string()));
        }
        if let Some(ticket_id) = ticket_id {
            self.db.get_ticket(ticket_id).await?;
        }

        let original = self.fetcher.read(file_path)?;

        // Fail before spending a generation call
        if self.proposals.has_pending_for_path(&original.path).await? {
            return Err(SluiceError::Conflict(format!(
                "{} already has a pending proposed change",
                original.path
            )));
        }

        tracing::info!("Requesting proposed change for {}", original.path);
        let response = self
            .client
            .generate(
                PROPOSAL_SYSTEM_PROMPT,
                &Conversation::single(build_proposal_prompt(instruction, &original.content)),
                self.settings.analysis_max_tokens,
            )
            .await?;
        let proposed_content = strip_code_fence(&response, &original.content);

        self.proposals
            .create(NewProposedChange {
                ticket_id,
                file_path: original.path,
                original_content: original.content,
                proposed_content,
                description: instruction.to_string(),
            })
            .await
    }

    /// Run one resolution cycle for a ticket
    pub async fn resolve(&self, ticket_id: i64) -> Result<ResolutionReport> {
        let ticket = self.db.get_ticket(ticket_id).await?;

        if self.settings.re_resolution == ReResolution::RejectSettled {
            if let Some(status) = ticket.ai_suggestion_status.filter(|s| s.is_settled()) {
                return Err(SluiceError::Conflict(format!(
                    "Ticket #{} suggestion is already {}",
                    ticket.id,
                    status.as_str()
                )));
            }
        }

        let project = self.project_for(ticket.project_id).await;
        let task = build_ticket_task(&ticket, project.as_ref());

        tracing::info!("Resolving ticket #{}", ticket.id);
        let analysis = self.analyze(&task, project.as_ref()).await?;
        let TaskAnalysis {
            files_analyzed,
            response: suggestion,
            ..
        } = analysis;

        self.db
            .set_ai_suggestion(ticket.id, &suggestion, &files_analyzed)
            .await?;

        self.audit(ChangeRecord {
            ticket_id: Some(ticket.id),
            project_id: project.as_ref().map(|p| p.id),
            files_affected: files_analyzed.clone(),
            change_type: ChangeType::Analyze,
            summary: excerpt(&ticket.title, SUMMARY_CHARS),
            response_excerpt: Some(excerpt(&suggestion, ANALYSIS_EXCERPT_CHARS)),
        })
        .await;

        // Proposals from an earlier cycle no longer match the stored suggestion
        let superseded_changes = self.supersede_pending(ticket.id).await?;

        let scan = extract_file_directives(&suggestion);
        let directives_found = scan.marker_found();
        let mut proposed_changes = Vec::new();

        for directive in scan.into_directives() {
            if !files_analyzed.contains(&directive.path) {
                tracing::debug!(
                    "Skipping directive for {}: not in the analyzed set",
                    directive.path
                );
                continue;
            }

            let instruction = directive_instruction(&ticket.title, &directive.instruction);
            match self
                .propose(Some(ticket.id), &directive.path, &instruction)
                .await
            {
                Ok(change) => proposed_changes.push(ProposalRef {
                    file: change.file_path,
                    change_id: change.id,
                }),
                Err(e) => tracing::warn!(
                    "Skipping proposal for {} on ticket #{}: {}",
                    directive.path,
                    ticket.id,
                    e
                ),
            }
        }

        tracing::info!(
            "Ticket #{} resolved with {} proposed changes",
            ticket.id,
            proposed_changes.len()
        );

        Ok(ResolutionReport {
            ticket_id: ticket.id,
            suggestion,
            files_analyzed,
            proposed_changes,
            superseded_changes,
            directives_found,
        })
    }

    /// Two-step processing of a free-form task: select, read, analyze.
    ///
    /// Nothing is proposed; the analysis is recorded in the audit log.
    pub async fn analyze_task(
        &self,
        task: &str,
        project_id: Option<i64>,
    ) -> Result<TaskAnalysis> {
        let task = task.trim();
        if task.is_empty() {
            return Err(SluiceError::Validation(
                "Task description required".to_string(),
            ));
        }
        if let Some(id) = project_id {
            self.db.get_project(id).await?;
        }

        let project = self.project_for(project_id).await;
        let analysis = self.analyze(task, project.as_ref()).await?;

        self.audit(ChangeRecord {
            ticket_id: None,
            project_id: project.as_ref().map(|p| p.id),
            files_affected: analysis.files_analyzed.clone(),
            change_type: ChangeType::Analyze,
            summary: excerpt(task, SUMMARY_CHARS),
            response_excerpt: Some(excerpt(&analysis.response, ANALYSIS_EXCERPT_CHARS)),
        })
        .await;

        Ok(analysis)
    }

    /// Free-form conversation about a ticket. No state changes.
    pub async fn chat(&self, ticket_id: i64, message: &str) -> Result<String> {
        let message = message.trim();
        if message.is_empty() {
            return Err(SluiceError::Validation("Message required".to_string()));
        }
        let ticket = self.db.get_ticket(ticket_id).await?;

        self.client
            .generate(
                CHAT_SYSTEM_PROMPT,
                &Conversation::single(build_chat_prompt(&ticket, message)),
                self.settings.probe_max_tokens,
            )
            .await
    }

    /// Accept, reject or probe the ticket's current suggestion
    pub async fn act(&self, ticket_id: i64, action: TicketAction) -> Result<ActionOutcome> {
        let ticket = self.db.get_ticket(ticket_id).await?;

        match action {
            TicketAction::Accept => {
                let mut applied_changes = Vec::new();
                let mut failed_changes = Vec::new();

                for change in self.pending_for(ticket.id).await? {
                    match self.proposals.resolve(change.id, ChangeOutcome::Accepted).await {
                        Ok(applied) => applied_changes.push(applied.file_path),
                        Err(e) => {
                            tracing::warn!("Could not apply change #{}: {}", change.id, e);
                            failed_changes.push(FailedApply {
                                change_id: change.id,
                                file_path: change.file_path,
                                error: e.to_string(),
                            });
                        }
                    }
                }

                self.db
                    .set_ai_status(
                        ticket.id,
                        SuggestionStatus::Accepted,
                        Some(TicketStatus::Resolved),
                    )
                    .await?;

                Ok(ActionOutcome::Accept {
                    applied_changes,
                    failed_changes,
                })
            }
            TicketAction::Reject => {
                let mut rejected_changes = Vec::new();

                for change in self.pending_for(ticket.id).await? {
                    match self.proposals.resolve(change.id, ChangeOutcome::Rejected).await {
                        Ok(rejected) => rejected_changes.push(rejected.id),
                        Err(e) => tracing::warn!("Could not reject change #{}: {}", change.id, e),
                    }
                }

                self.db
                    .set_ai_status(ticket.id, SuggestionStatus::Rejected, None)
                    .await?;

                Ok(ActionOutcome::Reject { rejected_changes })
            }
            TicketAction::Probe { message } => {
                let response = self
                    .client
                    .generate(
                        PROBE_SYSTEM_PROMPT,
                        &Conversation::single(build_probe_prompt(&ticket, &message)),
                        self.settings.probe_max_tokens,
                    )
                    .await?;

                self.audit(ChangeRecord {
                    ticket_id: Some(ticket.id),
                    project_id: ticket.project_id,
                    files_affected: ticket.ai_files_analyzed.clone(),
                    change_type: ChangeType::Analyze,
                    summary: excerpt(&message, SUMMARY_CHARS),
                    response_excerpt: Some(excerpt(&response, ANALYSIS_EXCERPT_CHARS)),
                })
                .await;

                Ok(ActionOutcome::Probe { response })
            }
        }
    }

    async fn pending_for(&self, ticket_id: i64) -> Result<Vec<ProposedChange>> {
        Ok(self
            .proposals
            .list_for_ticket(ticket_id)
            .await?
            .into_iter()
            .filter(|change| change.status == ChangeStatus::Pending)
            .collect())
    }

    /// The given project, or the first configured one
    async fn project_for(&self, project_id: Option<i64>) -> Option<Project> {
        let result = match project_id {
            Some(id) => self.db.get_project(id).await.map(Some),
            None => self
                .db
                .list_projects()
                .await
                .map(|projects| projects.into_iter().next()),
        };

        match result {
            Ok(project) => project,
            Err(e) => {
                tracing::warn!("Continuing without project context: {}", e);
                None
            }
        }
    }

    /// Selection, reads and the analysis call shared by tickets and tasks
    async fn analyze(&self, task: &str, project: Option<&Project>) -> Result<TaskAnalysis> {
        let api_context = self.api_context(project).await;

        let selection = self.selector.select(task).await?;
        if selection.is_empty() {
            return Err(SluiceError::NoRelevantFiles(
                "No relevant files found for this task".to_string(),
            ));
        }

        let files = self.read_selected(selection.paths());
        if files.is_empty() {
            return Err(SluiceError::NoRelevantFiles(
                "Could not read any of the relevant files".to_string(),
            ));
        }
        let files_analyzed: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
        let total_chars: usize = files.iter().map(|f| f.content.len()).sum();

        tracing::info!("Analyzing {} files ({} chars)", files.len(), total_chars);
        let response = self
            .client
            .generate(
                ANALYSIS_SYSTEM_PROMPT,
                &Conversation::single(build_analysis_prompt(task, &api_context, &files)),
                self.settings.analysis_max_tokens,
            )
            .await?;

        Ok(TaskAnalysis {
            total_files: files_analyzed.len(),
            files_analyzed,
            total_chars,
            response,
        })
    }

    /// Reject every pending change of a ticket, returning their ids
    async fn supersede_pending(&self, ticket_id: i64) -> Result<Vec<i64>> {
        let mut superseded = Vec::new();
        for change in self.pending_for(ticket_id).await? {
            match self.proposals.resolve(change.id, ChangeOutcome::Rejected).await {
                Ok(rejected) => superseded.push(rejected.id),
                Err(e) => tracing::warn!("Could not supersede change #{}: {}", change.id, e),
            }
        }
        if !superseded.is_empty() {
            tracing::info!(
                "Superseded {} pending change(s) on ticket #{}",
                superseded.len(),
                ticket_id
            );
        }
        Ok(superseded)
    }

    async fn api_context(&self, project: Option<&Project>) -> String {
        let backend_url = match project.and_then(|p| p.backend_url.as_deref()) {
            Some(url) if !url.trim().is_empty() => url,
            _ => {
                return unavailable_note(&SluiceError::UpstreamUnavailable(
                    "No project backend URL configured".to_string(),
                ))
            }
        };

        match self.blueprints.fetch(backend_url).await {
            Ok(blueprint) => format_blueprint(&blueprint),
            Err(e) => {
                tracing::warn!("Continuing without API blueprint: {}", e);
                unavailable_note(&e)
            }
        }
    }

    fn read_selected(&self, paths: &[String]) -> Vec<FileContent> {
        paths
            .iter()
            .filter_map(|path| match self.fetcher.read(path) {
                Ok(file) => Some(file),
                Err(e) => {
                    tracing::warn!("Skipping selected file {}: {}", path, e);
                    None
                }
            })
            .collect()
    }

    async fn audit(&self, record: ChangeRecord) {
        fail_open("audit_log", || async {
            Ok::<_, SluiceError>(self.db.record_change(&record).await?)
        })
        .await;
    }
}
