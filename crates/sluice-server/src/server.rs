//! Axum router and listener

use crate::routes;
use axum::{
    routing::{get, post, put},
    Router,
};
use sluice_orchestrator::TicketResolutionOrchestrator;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state
pub struct AppState {
    pub orchestrator: TicketResolutionOrchestrator,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(orchestrator: TicketResolutionOrchestrator) -> SharedState {
        Arc::new(Self { orchestrator })
    }
}

/// Build the full `/api` router
pub fn router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/status", get(routes::status))
        .route("/files", get(routes::list_files))
        .route("/file/read", post(routes::read_file))
        .route(
            "/tickets",
            get(routes::list_tickets).post(routes::create_ticket),
        )
        .route("/tickets/:id", get(routes::get_ticket))
        .route("/tickets/:id/status", put(routes::update_ticket_status))
        .route("/tickets/:id/propose-change", post(routes::propose_change))
        .route(
            "/tickets/:id/proposed-changes",
            get(routes::list_ticket_changes),
        )
        .route("/tickets/:id/ai-resolve", post(routes::ai_resolve))
        .route("/tickets/:id/ai-action", post(routes::ai_action))
        .route("/tickets/:id/chat", post(routes::ticket_chat))
        .route("/task", post(routes::analyze_task))
        .route(
            "/projects",
            get(routes::list_projects).post(routes::create_project),
        )
        .route("/proposed-changes", get(routes::list_pending_changes))
        .route("/proposed-changes/:id", get(routes::get_change))
        .route("/proposed-changes/:id/accept", post(routes::accept_change))
        .route("/proposed-changes/:id/reject", post(routes::reject_change))
        .route("/changes", get(routes::list_history));

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API until ctrl-c
pub async fn serve(state: SharedState, bind: &str) -> anyhow::Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not install ctrl-c handler: {}", e);
        std::future::pending::<()>().await;
    }
}
