//! Request handlers
//!
//! Handlers stay thin: decode the request, call the orchestrator or the
//! store, and shape the JSON reply. Lifecycle rules live below this layer.

use crate::error::{ApiError, ApiResult};
use crate::server::SharedState;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sluice_agent::FileContent;
use sluice_core::{
    ChangeHistoryEntry, ChangeOutcome, FileReference, NewProject, NewTicket, Project,
    ProposedChange, Ticket, TicketStatus,
};
use sluice_orchestrator::{ActionOutcome, ResolutionReport, TaskAnalysis, TicketAction};

const DEFAULT_HISTORY_LIMIT: usize = 50;

// ----------------------------------------------------------------------
// Status and files
// ----------------------------------------------------------------------

/// GET /api/status
pub async fn status(State(app): State<SharedState>) -> Json<Value> {
    let guard = app.orchestrator.fetcher().guard();
    Json(json!({
        "status": "ok",
        "service": "sluice",
        "target_root": guard.root().display().to_string(),
        "allowed_extensions": guard.allowed_extensions(),
        "max_file_size": guard.max_file_size(),
        "model": app.orchestrator.model_name(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    #[serde(default)]
    pub directory: String,
}

#[derive(Debug, Serialize)]
pub struct FileListing {
    pub directory: String,
    pub files: Vec<FileReference>,
}

/// GET /api/files?directory=
pub async fn list_files(
    State(app): State<SharedState>,
    query: Result<Query<FilesQuery>, QueryRejection>,
) -> ApiResult<Json<FileListing>> {
    let Query(query) = query?;
    let files = app.orchestrator.fetcher().list_shallow(&query.directory)?;
    Ok(Json(FileListing {
        directory: query.directory,
        files,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ReadFileRequest {
    pub path: String,
}

/// POST /api/file/read
pub async fn read_file(
    State(app): State<SharedState>,
    payload: Result<Json<ReadFileRequest>, JsonRejection>,
) -> ApiResult<Json<FileContent>> {
    let Json(request) = payload?;
    Ok(Json(app.orchestrator.fetcher().read(&request.path)?))
}

// ----------------------------------------------------------------------
// Tickets and projects
// ----------------------------------------------------------------------

/// POST /api/tickets
pub async fn create_ticket(
    State(app): State<SharedState>,
    payload: Result<Json<NewTicket>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Ticket>)> {
    let Json(ticket) = payload?;
    if ticket.title.trim().is_empty() {
        return Err(ApiError::validation("title is required"));
    }
    let created = app.orchestrator.db().create_ticket(&ticket).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
pub struct TicketsQuery {
    pub status: Option<String>,
}

/// GET /api/tickets?status=
pub async fn list_tickets(
    State(app): State<SharedState>,
    query: Result<Query<TicketsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Ticket>>> {
    let Query(query) = query?;
    let status = query
        .status
        .as_deref()
        .map(str::parse::<TicketStatus>)
        .transpose()?;
    Ok(Json(app.orchestrator.db().list_tickets(status).await?))
}

/// GET /api/tickets/:id
pub async fn get_ticket(
    State(app): State<SharedState>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Ticket>> {
    let Path(id) = path?;
    Ok(Json(app.orchestrator.db().get_ticket(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

/// PUT /api/tickets/:id/status
pub async fn update_ticket_status(
    State(app): State<SharedState>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> ApiResult<Json<Ticket>> {
    let Path(id) = path?;
    let Json(update) = payload?;
    let status: TicketStatus = update.status.parse()?;
    Ok(Json(
        app.orchestrator.db().update_ticket_status(id, status).await?,
    ))
}

/// POST /api/projects
pub async fn create_project(
    State(app): State<SharedState>,
    payload: Result<Json<NewProject>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let Json(project) = payload?;
    if project.title.trim().is_empty() {
        return Err(ApiError::validation("title is required"));
    }
    let created = app.orchestrator.db().create_project(&project).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/projects
pub async fn list_projects(State(app): State<SharedState>) -> ApiResult<Json<Vec<Project>>> {
    Ok(Json(app.orchestrator.db().list_projects().await?))
}

// ----------------------------------------------------------------------
// Proposed changes
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ProposeRequest {
    pub file_path: String,
    pub instruction: String,
}

#[derive(Debug, Serialize)]
pub struct ProposeResponse {
    pub status: &'static str,
    pub change_id: i64,
    pub file_path: String,
    pub original_content: String,
    pub proposed_content: String,
    pub description: String,
}

/// POST /api/tickets/:id/propose-change
pub async fn propose_change(
    State(app): State<SharedState>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ProposeRequest>, JsonRejection>,
) -> ApiResult<Json<ProposeResponse>> {
    let Path(ticket_id) = path?;
    let Json(request) = payload?;
    let change = app
        .orchestrator
        .propose(Some(ticket_id), &request.file_path, &request.instruction)
        .await?;

    Ok(Json(ProposeResponse {
        status: "proposed",
        change_id: change.id,
        file_path: change.file_path,
        original_content: change.original_content,
        proposed_content: change.proposed_content,
        description: change.description,
    }))
}

/// POST /api/proposed-changes/:id/accept
pub async fn accept_change(
    State(app): State<SharedState>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = path?;
    let change = app
        .orchestrator
        .proposals()
        .resolve(id, ChangeOutcome::Accepted)
        .await?;

    Ok(Json(json!({
        "status": "applied",
        "change_id": change.id,
        "file_path": change.file_path,
    })))
}

/// POST /api/proposed-changes/:id/reject
pub async fn reject_change(
    State(app): State<SharedState>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = path?;
    let change = app
        .orchestrator
        .proposals()
        .resolve(id, ChangeOutcome::Rejected)
        .await?;

    Ok(Json(json!({
        "status": "rejected",
        "change_id": change.id,
    })))
}

/// GET /api/proposed-changes
pub async fn list_pending_changes(
    State(app): State<SharedState>,
) -> ApiResult<Json<Vec<ProposedChange>>> {
    Ok(Json(app.orchestrator.proposals().list_pending().await?))
}

/// GET /api/proposed-changes/:id
pub async fn get_change(
    State(app): State<SharedState>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<ProposedChange>> {
    let Path(id) = path?;
    Ok(Json(app.orchestrator.proposals().get(id).await?))
}

/// GET /api/tickets/:id/proposed-changes
pub async fn list_ticket_changes(
    State(app): State<SharedState>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<Vec<ProposedChange>>> {
    let Path(ticket_id) = path?;
    app.orchestrator.db().get_ticket(ticket_id).await?;
    Ok(Json(
        app.orchestrator.proposals().list_for_ticket(ticket_id).await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// GET /api/changes?limit=
pub async fn list_history(
    State(app): State<SharedState>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ChangeHistoryEntry>>> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(app.orchestrator.db().list_change_history(limit).await?))
}

// ----------------------------------------------------------------------
// Ticket resolution
// ----------------------------------------------------------------------

/// POST /api/tickets/:id/ai-resolve
pub async fn ai_resolve(
    State(app): State<SharedState>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Json<ResolutionReport>> {
    let Path(ticket_id) = path?;
    Ok(Json(app.orchestrator.resolve(ticket_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    pub message: Option<String>,
}

/// POST /api/tickets/:id/ai-action
pub async fn ai_action(
    State(app): State<SharedState>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> ApiResult<Json<ActionOutcome>> {
    let Path(ticket_id) = path?;
    let Json(request) = payload?;
    let action = TicketAction::parse(&request.action, request.message.as_deref())?;
    Ok(Json(app.orchestrator.act(ticket_id, action).await?))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
}

/// POST /api/tickets/:id/chat
pub async fn ticket_chat(
    State(app): State<SharedState>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Path(ticket_id) = path?;
    let Json(request) = payload?;
    let response = app.orchestrator.chat(ticket_id, &request.message).await?;
    Ok(Json(json!({
        "status": "success",
        "response": response,
    })))
}

// ----------------------------------------------------------------------
// Free-form tasks
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    #[serde(default)]
    pub task: String,
    pub project_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub analysis: TaskAnalysis,
}

/// POST /api/task
pub async fn analyze_task(
    State(app): State<SharedState>,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> ApiResult<Json<TaskResponse>> {
    let Json(request) = payload?;
    let analysis = app
        .orchestrator
        .analyze_task(&request.task, request.project_id)
        .await?;
    Ok(Json(TaskResponse {
        status: "success",
        analysis,
    }))
}
