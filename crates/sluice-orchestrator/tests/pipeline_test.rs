//! End-to-end tests for the proposal pipeline
//!
//! A scripted generation client stands in for the external service; the
//! target tree and database live in temp directories.

use sluice_agent::testing::ScriptedClient;
use sluice_core::{
    ChangeOutcome, ChangeStatus, ChangeType, NewTicket, Priority, ReResolution, SluiceConfig,
    SuggestionStatus, Ticket, TicketCategory, TicketStatus,
};
use sluice_orchestrator::{ActionOutcome, TicketAction, TicketResolutionOrchestrator};
use sluice_storage::Database;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

const ANALYSIS: &str = "The cart total ignores discounts because `total` sums raw prices.\n\n\
FILES_TO_MODIFY:\n\
- README.md: document discount rules\n\
- src/cart.py: apply discounts before summing\n\
- src/unseen.py: not part of the analyzed set\n";

struct Harness {
    orchestrator: TicketResolutionOrchestrator,
    client: Arc<ScriptedClient>,
    db: Arc<Database>,
    target: TempDir,
    _db_dir: TempDir,
}

impl Harness {
    fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.target.path().join(rel)).unwrap()
    }

    async fn ticket(&self) -> Ticket {
        self.db
            .create_ticket(&NewTicket {
                title: "Cart total wrong".to_string(),
                description: Some("Discounts are not applied at checkout".to_string()),
                category: TicketCategory::Bug,
                priority: Priority::High,
                project_id: None,
            })
            .await
            .unwrap()
    }

    /// Script a full resolution: selection, analysis, one reply per directive
    fn script_resolution(&self) {
        self.client.push_response(r#"["README.md", "src/cart.py"]"#);
        self.client.push_response(ANALYSIS);
        self.client.push_response("# Shop\n\nDiscounts apply before tax.\n");
        self.client
            .push_response("```python\ndef total(items):\n    return sum(i.net for i in items)\n```");
    }
}

async fn harness_with(re_resolution: ReResolution) -> Harness {
    let target = TempDir::new().unwrap();
    fs::write(target.path().join("README.md"), "# Shop\n").unwrap();
    fs::create_dir_all(target.path().join("src")).unwrap();
    fs::write(
        target.path().join("src/cart.py"),
        "def total(items):\n    return sum(items)\n",
    )
    .unwrap();
    fs::write(target.path().join("src/unseen.py"), "x = 1\n").unwrap();

    let db_dir = TempDir::new().unwrap();
    let db = Database::open(db_dir.path().join("sluice.db")).await.unwrap();
    db.init_schema().await.unwrap();
    let db = Arc::new(db);

    let mut config = SluiceConfig::default();
    config.target.root = target.path().to_path_buf();
    config.resolution.re_resolution = re_resolution;

    let client = Arc::new(ScriptedClient::new());
    let orchestrator =
        TicketResolutionOrchestrator::from_config(&config, db.clone(), client.clone()).unwrap();

    Harness {
        orchestrator,
        client,
        db,
        target,
        _db_dir: db_dir,
    }
}

async fn harness() -> Harness {
    harness_with(ReResolution::Overwrite).await
}

#[tokio::test]
async fn test_propose_accept_then_conflict() {
    let h = harness().await;
    h.client.push_response("# Shop\n\n## Usage\nRun `shop serve`.\n");

    let change = h
        .orchestrator
        .propose(None, "README.md", "add usage section")
        .await
        .unwrap();
    assert_eq!(change.status, ChangeStatus::Pending);
    assert_eq!(change.original_content, "# Shop\n");
    assert_eq!(change.description, "add usage section");
    // Proposing never writes
    assert_eq!(h.read("README.md"), "# Shop\n");

    let proposals = h.orchestrator.proposals();
    proposals
        .resolve(change.id, ChangeOutcome::Accepted)
        .await
        .unwrap();
    assert_eq!(h.read("README.md"), "# Shop\n\n## Usage\nRun `shop serve`.\n");
    assert_eq!(
        proposals.get(change.id).await.unwrap().status,
        ChangeStatus::Accepted
    );

    let err = proposals
        .resolve(change.id, ChangeOutcome::Accepted)
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "state_conflict");
}

#[tokio::test]
async fn test_propose_failure_creates_nothing() {
    let h = harness().await;
    h.client.push_failure("rate limited");

    let err = h
        .orchestrator
        .propose(None, "README.md", "add usage section")
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "generation_failure");
    assert!(h.orchestrator.proposals().list_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_propose_rejects_unsafe_paths_without_calling_service() {
    let h = harness().await;

    let err = h
        .orchestrator
        .propose(None, "../etc/passwd.md", "anything")
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "validation_error");

    let err = h
        .orchestrator
        .propose(None, "missing.md", "anything")
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "not_found");
    assert_eq!(h.client.call_count(), 0);
}

#[tokio::test]
async fn test_resolve_creates_one_change_per_analyzed_directive() {
    let h = harness().await;
    let ticket = h.ticket().await;
    h.script_resolution();

    let report = h.orchestrator.resolve(ticket.id).await.unwrap();
    assert!(report.directives_found);
    assert_eq!(report.files_analyzed, vec!["README.md", "src/cart.py"]);
    assert_eq!(report.proposed_changes.len(), 2);
    assert_eq!(report.proposed_changes[0].file, "README.md");
    assert_eq!(report.proposed_changes[1].file, "src/cart.py");

    let changes = h.orchestrator.proposals().list_for_ticket(ticket.id).await.unwrap();
    assert_eq!(changes.len(), 2);
    assert!(changes.iter().all(|c| c.status == ChangeStatus::Pending));
    assert!(changes.iter().all(|c| c.ticket_id == Some(ticket.id)));
    // Enclosing fence removed from the proposal
    assert!(changes[1].proposed_content.starts_with("def total(items):"));

    let stored = h.db.get_ticket(ticket.id).await.unwrap();
    assert_eq!(stored.ai_suggestion.as_deref(), Some(ANALYSIS));
    assert_eq!(stored.ai_suggestion_status, Some(SuggestionStatus::Pending));
    assert_eq!(stored.ai_files_analyzed, vec!["README.md", "src/cart.py"]);

    let requests = h.client.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests[1].prompt().contains("=== src/cart.py ==="));
    assert!(requests[1]
        .prompt()
        .contains("[Target API context unavailable: No project backend URL configured]"));
    assert!(requests[3]
        .prompt()
        .contains("Instruction: Cart total wrong: apply discounts before summing"));

    // Nothing written until accepted
    assert_eq!(h.read("README.md"), "# Shop\n");

    let history = h.db.list_change_history(10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].record.change_type, ChangeType::Analyze);
}

#[tokio::test]
async fn test_resolve_without_selection_leaves_ticket_untouched() {
    let h = harness().await;
    let ticket = h.ticket().await;
    h.client.push_response("I am not sure which files matter.");

    let err = h.orchestrator.resolve(ticket.id).await.unwrap_err();
    assert_eq!(err.reason(), "no_relevant_files");
    assert_eq!(h.client.call_count(), 1);

    let stored = h.db.get_ticket(ticket.id).await.unwrap();
    assert!(stored.ai_suggestion.is_none());
    assert!(stored.ai_suggestion_status.is_none());
}

#[tokio::test]
async fn test_resolve_with_unreadable_selection_fails() {
    let h = harness().await;
    let ticket = h.ticket().await;
    h.client.push_response(r#"["ghost.md", "../outside.md"]"#);

    let err = h.orchestrator.resolve(ticket.id).await.unwrap_err();
    assert_eq!(err.reason(), "no_relevant_files");
}

#[tokio::test]
async fn test_resolve_generation_failure_leaves_no_partial_state() {
    let h = harness().await;
    let ticket = h.ticket().await;
    h.client.push_response(r#"["README.md"]"#);
    h.client.push_failure("service unavailable");

    let err = h.orchestrator.resolve(ticket.id).await.unwrap_err();
    assert_eq!(err.reason(), "generation_failure");

    let stored = h.db.get_ticket(ticket.id).await.unwrap();
    assert!(stored.ai_suggestion.is_none());
    assert!(h.orchestrator.proposals().list_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resolve_skips_failed_directive_proposals() {
    let h = harness().await;
    let ticket = h.ticket().await;
    h.client.push_response(r#"["README.md", "src/cart.py"]"#);
    h.client.push_response(ANALYSIS);
    h.client.push_response("# Shop\n\nDiscounts apply before tax.\n");
    h.client.push_failure("timed out");

    let report = h.orchestrator.resolve(ticket.id).await.unwrap();
    assert_eq!(report.proposed_changes.len(), 1);
    assert_eq!(report.proposed_changes[0].file, "README.md");
}

#[tokio::test]
async fn test_resolve_without_directive_block() {
    let h = harness().await;
    let ticket = h.ticket().await;
    h.client.push_response(r#"["README.md"]"#);
    h.client.push_response("Nothing needs to change.");

    let report = h.orchestrator.resolve(ticket.id).await.unwrap();
    assert!(!report.directives_found);
    assert!(report.proposed_changes.is_empty());
    assert_eq!(
        h.db.get_ticket(ticket.id).await.unwrap().ai_suggestion_status,
        Some(SuggestionStatus::Pending)
    );
}

#[tokio::test]
async fn test_accept_action_applies_and_resolves_ticket() {
    let h = harness().await;
    let ticket = h.ticket().await;
    h.script_resolution();
    h.orchestrator.resolve(ticket.id).await.unwrap();

    let outcome = h.orchestrator.act(ticket.id, TicketAction::Accept).await.unwrap();
    match outcome {
        ActionOutcome::Accept {
            applied_changes,
            failed_changes,
        } => {
            assert_eq!(applied_changes, vec!["README.md", "src/cart.py"]);
            assert!(failed_changes.is_empty());
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert_eq!(h.read("README.md"), "# Shop\n\nDiscounts apply before tax.\n");
    assert!(h.read("src/cart.py").contains("i.net"));

    let stored = h.db.get_ticket(ticket.id).await.unwrap();
    assert_eq!(stored.status, TicketStatus::Resolved);
    assert_eq!(stored.ai_suggestion_status, Some(SuggestionStatus::Accepted));
}

#[tokio::test]
async fn test_accept_action_is_best_effort() {
    let h = harness().await;
    let ticket = h.ticket().await;
    h.script_resolution();
    h.orchestrator.resolve(ticket.id).await.unwrap();

    fs::remove_file(h.target.path().join("README.md")).unwrap();

    let outcome = h.orchestrator.act(ticket.id, TicketAction::Accept).await.unwrap();
    match outcome {
        ActionOutcome::Accept {
            applied_changes,
            failed_changes,
        } => {
            assert_eq!(applied_changes, vec!["src/cart.py"]);
            assert_eq!(failed_changes.len(), 1);
            assert_eq!(failed_changes[0].file_path, "README.md");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    // Ticket is settled regardless of individual write outcomes
    let stored = h.db.get_ticket(ticket.id).await.unwrap();
    assert_eq!(stored.status, TicketStatus::Resolved);
    assert_eq!(stored.ai_suggestion_status, Some(SuggestionStatus::Accepted));
}

#[tokio::test]
async fn test_reject_action_never_writes() {
    let h = harness().await;
    let ticket = h.ticket().await;
    h.script_resolution();
    h.orchestrator.resolve(ticket.id).await.unwrap();

    let outcome = h.orchestrator.act(ticket.id, TicketAction::Reject).await.unwrap();
    match outcome {
        ActionOutcome::Reject { rejected_changes } => assert_eq!(rejected_changes.len(), 2),
        other => panic!("unexpected outcome: {:?}", other),
    }

    assert_eq!(h.read("README.md"), "# Shop\n");
    let changes = h.orchestrator.proposals().list_for_ticket(ticket.id).await.unwrap();
    assert!(changes.iter().all(|c| c.status == ChangeStatus::Rejected));

    let stored = h.db.get_ticket(ticket.id).await.unwrap();
    assert_eq!(stored.ai_suggestion_status, Some(SuggestionStatus::Rejected));
    assert_eq!(stored.status, TicketStatus::Open);
}

#[tokio::test]
async fn test_probe_has_no_proposal_side_effects() {
    let h = harness().await;
    let ticket = h.ticket().await;
    h.script_resolution();
    h.orchestrator.resolve(ticket.id).await.unwrap();
    h.client.push_response("Because prices include tax already.");

    let action = TicketAction::parse("probe", Some("Why before tax?")).unwrap();
    let outcome = h.orchestrator.act(ticket.id, action).await.unwrap();
    match outcome {
        ActionOutcome::Probe { response } => {
            assert_eq!(response, "Because prices include tax already.")
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let last = h.client.requests().pop().unwrap();
    assert!(last.prompt().contains("Previous AI suggestion: The cart total ignores discounts"));
    assert!(last.prompt().ends_with("User's follow-up question: Why before tax?"));

    let changes = h.orchestrator.proposals().list_for_ticket(ticket.id).await.unwrap();
    assert!(changes.iter().all(|c| c.status == ChangeStatus::Pending));
    assert_eq!(
        h.db.get_ticket(ticket.id).await.unwrap().ai_suggestion_status,
        Some(SuggestionStatus::Pending)
    );
}

#[test]
fn test_action_parsing() {
    assert_eq!(TicketAction::parse("accept", None).unwrap(), TicketAction::Accept);
    assert_eq!(
        TicketAction::parse("probe", Some("  ")).unwrap_err().reason(),
        "validation_error"
    );
    assert_eq!(
        TicketAction::parse("merge", None).unwrap_err().reason(),
        "validation_error"
    );
}

#[tokio::test]
async fn test_reject_settled_policy_blocks_re_resolution() {
    let h = harness_with(ReResolution::RejectSettled).await;
    let ticket = h.ticket().await;
    h.script_resolution();
    h.orchestrator.resolve(ticket.id).await.unwrap();
    h.orchestrator.act(ticket.id, TicketAction::Reject).await.unwrap();

    let calls_before = h.client.call_count();
    let err = h.orchestrator.resolve(ticket.id).await.unwrap_err();
    assert_eq!(err.reason(), "state_conflict");
    assert_eq!(h.client.call_count(), calls_before);
}

#[tokio::test]
async fn test_overwrite_policy_starts_new_cycle() {
    let h = harness().await;
    let ticket = h.ticket().await;
    h.script_resolution();
    h.orchestrator.resolve(ticket.id).await.unwrap();
    h.orchestrator.act(ticket.id, TicketAction::Reject).await.unwrap();

    h.script_resolution();
    let report = h.orchestrator.resolve(ticket.id).await.unwrap();
    assert_eq!(report.proposed_changes.len(), 2);
    assert_eq!(
        h.db.get_ticket(ticket.id).await.unwrap().ai_suggestion_status,
        Some(SuggestionStatus::Pending)
    );
}

#[tokio::test]
async fn test_pending_change_blocks_duplicate_directive_proposal() {
    let h = harness().await;
    h.client.push_response("# Shop\n\nManual proposal.\n");
    h.orchestrator
        .propose(None, "README.md", "manual edit")
        .await
        .unwrap();

    let ticket = h.ticket().await;
    h.client.push_response(r#"["README.md", "src/cart.py"]"#);
    h.client.push_response(ANALYSIS);
    h.client.push_response("def total(items):\n    return 0\n");

    let report = h.orchestrator.resolve(ticket.id).await.unwrap();
    assert_eq!(report.proposed_changes.len(), 1);
    assert_eq!(report.proposed_changes[0].file, "src/cart.py");
}

#[tokio::test]
async fn test_re_resolution_supersedes_pending_changes() {
    let h = harness().await;
    let ticket = h.ticket().await;
    h.script_resolution();
    let first = h.orchestrator.resolve(ticket.id).await.unwrap();
    assert!(first.superseded_changes.is_empty());

    h.client.push_response(r#"["README.md", "src/cart.py"]"#);
    h.client.push_response(ANALYSIS);
    h.client.push_response("# Shop\n\nDiscounts apply after tax.\n");
    h.client
        .push_response("def total(items):\n    return sum(i.gross for i in items)\n");
    let second = h.orchestrator.resolve(ticket.id).await.unwrap();

    assert_eq!(second.proposed_changes.len(), 2);
    let old_ids: Vec<i64> = first.proposed_changes.iter().map(|p| p.change_id).collect();
    assert_eq!(second.superseded_changes, old_ids);
    for id in &old_ids {
        assert_eq!(
            h.orchestrator.proposals().get(*id).await.unwrap().status,
            ChangeStatus::Rejected
        );
    }

    h.orchestrator.act(ticket.id, TicketAction::Accept).await.unwrap();
    assert_eq!(h.read("README.md"), "# Shop\n\nDiscounts apply after tax.\n");
    assert_eq!(
        h.read("src/cart.py"),
        "def total(items):\n    return sum(i.gross for i in items)\n"
    );
}

#[tokio::test]
async fn test_failed_re_resolution_keeps_pending_changes() {
    let h = harness().await;
    let ticket = h.ticket().await;
    h.script_resolution();
    h.orchestrator.resolve(ticket.id).await.unwrap();

    h.client.push_response(r#"["README.md"]"#);
    h.client.push_failure("overloaded");
    let err = h.orchestrator.resolve(ticket.id).await.unwrap_err();
    assert_eq!(err.reason(), "generation_failure");

    let changes = h.orchestrator.proposals().list_for_ticket(ticket.id).await.unwrap();
    assert_eq!(changes.len(), 2);
    assert!(changes.iter().all(|c| c.status == ChangeStatus::Pending));
    assert_eq!(
        h.db.get_ticket(ticket.id).await.unwrap().ai_suggestion.as_deref(),
        Some(ANALYSIS)
    );
}

#[tokio::test]
async fn test_dot_slash_directive_matches_analyzed_file() {
    let h = harness().await;
    let ticket = h.ticket().await;
    h.client.push_response(r#"["./README.md"]"#);
    h.client
        .push_response("Document it.\n\nFILES_TO_MODIFY:\n- ./README.md: document discounts\n");
    h.client.push_response("# Shop\n\nDiscounts.\n");

    let report = h.orchestrator.resolve(ticket.id).await.unwrap();
    assert_eq!(report.files_analyzed, vec!["README.md"]);
    assert_eq!(report.proposed_changes.len(), 1);
    assert_eq!(report.proposed_changes[0].file, "README.md");
}

#[tokio::test]
async fn test_analyze_task_reports_and_audits_without_proposing() {
    let h = harness().await;
    h.client.push_response(r#"["README.md", "src/cart.py"]"#);
    h.client.push_response(ANALYSIS);

    let analysis = h
        .orchestrator
        .analyze_task("Explain the cart total", None)
        .await
        .unwrap();
    assert_eq!(analysis.files_analyzed, vec!["README.md", "src/cart.py"]);
    assert_eq!(analysis.total_files, 2);
    assert_eq!(
        analysis.total_chars,
        "# Shop\n".len() + "def total(items):\n    return sum(items)\n".len()
    );
    assert_eq!(analysis.response, ANALYSIS);
    assert!(h.client.requests()[1]
        .prompt()
        .starts_with("Task: Explain the cart total\n\n"));

    // Directives in the response are not turned into proposals
    assert!(h.orchestrator.proposals().list_pending().await.unwrap().is_empty());
    let history = h.db.list_change_history(10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].record.change_type, ChangeType::Analyze);
    assert_eq!(history[0].record.ticket_id, None);
    assert_eq!(history[0].record.summary, "Explain the cart total");
}

#[tokio::test]
async fn test_analyze_task_validation_and_empty_selection() {
    let h = harness().await;
    let err = h.orchestrator.analyze_task("   ", None).await.unwrap_err();
    assert_eq!(err.reason(), "validation_error");
    assert_eq!(h.client.call_count(), 0);

    h.client.push_response("[]");
    let err = h
        .orchestrator
        .analyze_task("Explain the cart total", None)
        .await
        .unwrap_err();
    assert_eq!(err.reason(), "no_relevant_files");
    assert!(h.db.list_change_history(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_has_no_side_effects() {
    let h = harness().await;
    let ticket = h.ticket().await;
    h.client.push_response("Look at src/cart.py first.");

    let reply = h
        .orchestrator
        .chat(ticket.id, "Where should I look?")
        .await
        .unwrap();
    assert_eq!(reply, "Look at src/cart.py first.");

    let requests = h.client.requests();
    let prompt = requests[0].prompt();
    assert!(prompt.starts_with(&format!("Discussing ticket #{}:", ticket.id)));
    assert!(prompt.contains("Status: open"));
    assert!(prompt.ends_with("User message: Where should I look?"));

    let stored = h.db.get_ticket(ticket.id).await.unwrap();
    assert_eq!(stored.status, TicketStatus::Open);
    assert_eq!(stored.ai_suggestion, None);
    assert!(h.db.list_change_history(10).await.unwrap().is_empty());

    let err = h.orchestrator.chat(ticket.id, "").await.unwrap_err();
    assert_eq!(err.reason(), "validation_error");
    let err = h.orchestrator.chat(999, "hello").await.unwrap_err();
    assert_eq!(err.reason(), "not_found");
}
