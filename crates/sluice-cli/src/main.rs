//! Sluice CLI - review-gated AI changes for a sandboxed project tree
//!
//! Usage:
//!   sluice init                          Write sluice.toml and create the database
//!   sluice serve                         Run the HTTP API
//!   sluice ticket create <title> ...     Open a ticket
//!   sluice resolve <ticket>              Analyze a ticket and propose changes
//!   sluice task <description>            Analyze a free-form task, propose nothing
//!   sluice chat <ticket> <message>       Discuss a ticket
//!   sluice act <ticket> accept|reject    Apply or discard a ticket's proposals
//!   sluice propose <file> <instruction>  Propose a single-file change
//!   sluice accept <change>               Apply one proposed change

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use sluice_agent::AnthropicClient;
use sluice_core::config::CONFIG_FILE;
use sluice_core::{
    ChangeOutcome, NewProject, NewTicket, Priority, ProposedChange, SluiceConfig, Ticket,
    TicketCategory, TicketStatus,
};
use sluice_orchestrator::{ActionOutcome, TicketAction, TicketResolutionOrchestrator};
use sluice_server::AppState;
use sluice_storage::Database;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sluice")]
#[command(author, version, about = "Review-gated AI changes for a sandboxed project tree")]
struct Cli {
    /// Config file (defaults to ./sluice.toml when present)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file and create the database
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Run the HTTP API
    Serve {
        /// Bind address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Ticket management
    Ticket {
        #[command(subcommand)]
        action: TicketCommands,
    },

    /// Project management
    Project {
        #[command(subcommand)]
        action: ProjectCommands,
    },

    /// Analyze a ticket and propose one change per listed file
    Resolve {
        /// Ticket ID
        ticket: i64,
    },

    /// Analyze a free-form task against the target tree without proposing
    Task {
        /// What to analyze
        task: String,

        /// Project whose upstream blueprint to include
        #[arg(long)]
        project: Option<i64>,
    },

    /// Discuss a ticket without changing it
    Chat {
        /// Ticket ID
        ticket: i64,

        message: String,
    },

    /// Accept, reject or probe a ticket's current suggestion
    Act {
        /// Ticket ID
        ticket: i64,

        action: CliAction,

        /// Follow-up question (required for probe)
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Propose a full replacement for one file
    Propose {
        /// File path relative to the target root
        file: String,

        /// What to change
        instruction: String,

        /// Associate the proposal with a ticket
        #[arg(long)]
        ticket: Option<i64>,
    },

    /// Apply a pending proposed change
    Accept {
        /// Proposed change ID
        change: i64,
    },

    /// Discard a pending proposed change
    Reject {
        /// Proposed change ID
        change: i64,
    },

    /// List pending proposed changes
    Changes {
        /// Show every change for this ticket instead
        #[arg(long)]
        ticket: Option<i64>,
    },

    /// Show the change history
    History {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// List files in a directory of the target tree
    Files {
        #[arg(default_value = "")]
        directory: String,
    },
}

#[derive(Subcommand)]
enum TicketCommands {
    /// Open a ticket
    Create {
        title: String,

        #[arg(long, default_value = "task")]
        category: CliCategory,

        #[arg(short, long, default_value = "medium")]
        priority: CliPriority,

        #[arg(short, long)]
        description: Option<String>,

        /// Project ID
        #[arg(long)]
        project: Option<i64>,
    },

    /// List tickets, newest first
    List {
        #[arg(long)]
        status: Option<CliStatus>,
    },

    /// Show one ticket with its latest suggestion
    Show { id: i64 },

    /// Change a ticket's status
    Status { id: i64, status: CliStatus },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Register a project
    Create {
        title: String,

        /// Path of the project on disk
        path: String,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(long)]
        frontend_url: Option<String>,

        /// Base URL the API blueprint is fetched from
        #[arg(long)]
        backend_url: Option<String>,
    },

    /// List projects
    List,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliCategory {
    Bug,
    Feature,
    Task,
    Improvement,
}

impl From<CliCategory> for TicketCategory {
    fn from(c: CliCategory) -> Self {
        match c {
            CliCategory::Bug => TicketCategory::Bug,
            CliCategory::Feature => TicketCategory::Feature,
            CliCategory::Task => TicketCategory::Task,
            CliCategory::Improvement => TicketCategory::Improvement,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl From<CliPriority> for Priority {
    fn from(p: CliPriority) -> Self {
        match p {
            CliPriority::Low => Priority::Low,
            CliPriority::Medium => Priority::Medium,
            CliPriority::High => Priority::High,
            CliPriority::Critical => Priority::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliStatus {
    Open,
    #[value(alias = "in_progress")]
    InProgress,
    Resolved,
    Closed,
}

impl From<CliStatus> for TicketStatus {
    fn from(s: CliStatus) -> Self {
        match s {
            CliStatus::Open => TicketStatus::Open,
            CliStatus::InProgress => TicketStatus::InProgress,
            CliStatus::Resolved => TicketStatus::Resolved,
            CliStatus::Closed => TicketStatus::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliAction {
    Accept,
    Reject,
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // --verbose wins over RUST_LOG
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // init runs before any config exists
    if let Commands::Init { force } = cli.command {
        return cmd_init(cli.config, force).await;
    }

    let config = SluiceConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    let out = Output { json: cli.json };

    match cli.command {
        // handled above
        Commands::Init { .. } => Ok(()),
        Commands::Serve { bind } => cmd_serve(&config, bind).await,
        Commands::Ticket { action } => cmd_ticket(&config, &out, action).await,
        Commands::Project { action } => cmd_project(&config, &out, action).await,
        Commands::Resolve { ticket } => cmd_resolve(&config, &out, ticket).await,
        Commands::Task { task, project } => cmd_task(&config, &out, task, project).await,
        Commands::Chat { ticket, message } => cmd_chat(&config, &out, ticket, message).await,
        Commands::Act {
            ticket,
            action,
            message,
        } => cmd_act(&config, &out, ticket, action, message).await,
        Commands::Propose {
            file,
            instruction,
            ticket,
        } => cmd_propose(&config, &out, ticket, file, instruction).await,
        Commands::Accept { change } => {
            cmd_resolve_change(&config, &out, change, ChangeOutcome::Accepted).await
        }
        Commands::Reject { change } => {
            cmd_resolve_change(&config, &out, change, ChangeOutcome::Rejected).await
        }
        Commands::Changes { ticket } => cmd_changes(&config, &out, ticket).await,
        Commands::History { limit } => cmd_history(&config, &out, limit).await,
        Commands::Files { directory } => cmd_files(&config, &out, directory).await,
    }
}

/// Human or JSON rendering of command results
struct Output {
    json: bool,
}

impl Output {
    /// Print `value` as JSON when requested, otherwise run `human`
    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human(value);
        }
        Ok(())
    }
}

async fn open_db(config: &SluiceConfig) -> Result<Arc<Database>> {
    let db = Database::open(&config.storage.path)
        .await
        .with_context(|| {
            format!(
                "Failed to open database at {}",
                config.storage.path.display()
            )
        })?;
    db.init_schema()
        .await
        .context("Failed to initialize database schema")?;
    Ok(Arc::new(db))
}

async fn open_orchestrator(config: &SluiceConfig) -> Result<TicketResolutionOrchestrator> {
    let db = open_db(config).await?;
    let client = AnthropicClient::from_config(&config.generation)
        .context("Failed to configure generation client")?;

    TicketResolutionOrchestrator::from_config(config, db, Arc::new(client)).with_context(|| {
        format!(
            "Failed to prepare target root {}",
            config.target.root.display()
        )
    })
}

async fn cmd_init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    SluiceConfig::write_default(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    let config = SluiceConfig::load(Some(&path)).context("Failed to reload config")?;
    open_db(&config).await?;

    println!("Initialized sluice");
    println!("Created:");
    println!("  {}", path.display());
    println!("  {}", config.storage.path.display());
    println!("\nNext steps:");
    println!(
        "  1. Point target.root at the project to expose (now {})",
        config.target.root.display()
    );
    println!("  2. Export {}", config.generation.api_key_env);
    println!("  3. Run 'sluice serve'");

    Ok(())
}

async fn cmd_serve(config: &SluiceConfig, bind: Option<String>) -> Result<()> {
    let orchestrator = open_orchestrator(config).await?;
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());

    let guard = orchestrator.fetcher().guard();
    info!("Target root: {}", guard.root().display());
    info!(
        "Allowed extensions: {}",
        guard.allowed_extensions().join(" ")
    );
    info!("Model: {}", orchestrator.model_name());

    sluice_server::serve(AppState::new(orchestrator), &bind).await
}

async fn cmd_ticket(config: &SluiceConfig, out: &Output, action: TicketCommands) -> Result<()> {
    let db = open_db(config).await?;

    match action {
        TicketCommands::Create {
            title,
            category,
            priority,
            description,
            project,
        } => {
            if title.trim().is_empty() {
                bail!("Ticket title must not be empty");
            }
            let ticket = db
                .create_ticket(&NewTicket {
                    title,
                    description,
                    category: category.into(),
                    priority: priority.into(),
                    project_id: project,
                })
                .await
                .context("Failed to create ticket")?;
            out.emit(&ticket, |t| println!("Created ticket #{}: {}", t.id, t.title))
        }
        TicketCommands::List { status } => {
            let tickets = db.list_tickets(status.map(Into::into)).await?;
            out.emit(&tickets, |tickets| {
                if tickets.is_empty() {
                    println!("No tickets found");
                    return;
                }
                for t in tickets {
                    println!(
                        "#{:<4} [{}] {:<8} {:<11} {}",
                        t.id,
                        t.status.as_str(),
                        t.priority.as_str(),
                        t.category.as_str(),
                        t.title
                    );
                }
            })
        }
        TicketCommands::Show { id } => {
            let ticket = db.get_ticket(id).await?;
            out.emit(&ticket, print_ticket)
        }
        TicketCommands::Status { id, status } => {
            let ticket = db.update_ticket_status(id, status.into()).await?;
            out.emit(&ticket, |t| {
                println!("Ticket #{} is now {}", t.id, t.status.as_str())
            })
        }
    }
}

fn print_ticket(t: &Ticket) {
    println!("Ticket #{}: {}", t.id, t.title);
    println!("  Category: {}", t.category.as_str());
    println!("  Priority: {}", t.priority.as_str());
    println!("  Status:   {}", t.status.as_str());
    if let Some(project_id) = t.project_id {
        println!("  Project:  #{}", project_id);
    }
    if let Some(description) = &t.description {
        println!("\n{}", description);
    }
    if let Some(suggestion) = &t.ai_suggestion {
        let status = t
            .ai_suggestion_status
            .map(|s| s.as_str())
            .unwrap_or("none");
        println!("\nSuggestion ({}):", status);
        println!("  Files analyzed: {}", t.ai_files_analyzed.join(", "));
        println!("\n{}", suggestion);
    }
}

async fn cmd_project(config: &SluiceConfig, out: &Output, action: ProjectCommands) -> Result<()> {
    let db = open_db(config).await?;

    match action {
        ProjectCommands::Create {
            title,
            path,
            description,
            frontend_url,
            backend_url,
        } => {
            let project = db
                .create_project(&NewProject {
                    title,
                    path,
                    description,
                    frontend_url,
                    backend_url,
                })
                .await
                .context("Failed to create project")?;
            out.emit(&project, |p| {
                println!("Created project #{}: {}", p.id, p.title)
            })
        }
        ProjectCommands::List => {
            let projects = db.list_projects().await?;
            out.emit(&projects, |projects| {
                if projects.is_empty() {
                    println!("No projects found");
                }
                for p in projects {
                    println!(
                        "#{:<4} {} ({}) backend: {}",
                        p.id,
                        p.title,
                        p.path,
                        p.backend_url.as_deref().unwrap_or("-")
                    );
                }
            })
        }
    }
}

async fn cmd_resolve(config: &SluiceConfig, out: &Output, ticket_id: i64) -> Result<()> {
    let orchestrator = open_orchestrator(config).await?;
    let report = orchestrator
        .resolve(ticket_id)
        .await
        .with_context(|| format!("Failed to resolve ticket #{}", ticket_id))?;

    out.emit(&report, |r| {
        println!("{}", r.suggestion);
        println!("\nFiles analyzed: {}", r.files_analyzed.join(", "));
        if r.proposed_changes.is_empty() {
            println!("No changes proposed");
        } else {
            println!("Proposed changes:");
            for change in &r.proposed_changes {
                println!("  #{} {}", change.change_id, change.file);
            }
            println!("\nReview with 'sluice changes --ticket {}'", r.ticket_id);
        }
    })
}

async fn cmd_task(
    config: &SluiceConfig,
    out: &Output,
    task: String,
    project_id: Option<i64>,
) -> Result<()> {
    let orchestrator = open_orchestrator(config).await?;
    let analysis = orchestrator
        .analyze_task(&task, project_id)
        .await
        .context("Failed to analyze task")?;

    out.emit(&analysis, |a| {
        println!("{}", a.response);
        println!(
            "\nFiles analyzed ({}, {} chars): {}",
            a.total_files,
            a.total_chars,
            a.files_analyzed.join(", ")
        );
    })
}

#[derive(Serialize)]
struct ChatReply {
    ticket_id: i64,
    response: String,
}

async fn cmd_chat(
    config: &SluiceConfig,
    out: &Output,
    ticket_id: i64,
    message: String,
) -> Result<()> {
    let orchestrator = open_orchestrator(config).await?;
    let response = orchestrator
        .chat(ticket_id, &message)
        .await
        .with_context(|| format!("Failed to discuss ticket #{}", ticket_id))?;

    out.emit(&ChatReply { ticket_id, response }, |reply| {
        println!("{}", reply.response)
    })
}

async fn cmd_act(
    config: &SluiceConfig,
    out: &Output,
    ticket_id: i64,
    action: CliAction,
    message: Option<String>,
) -> Result<()> {
    let name = match action {
        CliAction::Accept => "accept",
        CliAction::Reject => "reject",
        CliAction::Probe => "probe",
    };
    let action = TicketAction::parse(name, message.as_deref())?;

    let orchestrator = open_orchestrator(config).await?;
    let outcome = orchestrator
        .act(ticket_id, action)
        .await
        .with_context(|| format!("Failed to {} ticket #{}", name, ticket_id))?;

    out.emit(&outcome, |outcome| match outcome {
        ActionOutcome::Accept {
            applied_changes,
            failed_changes,
        } => {
            println!("Applied {} change(s)", applied_changes.len());
            for path in applied_changes {
                println!("  {}", path);
            }
            for failed in failed_changes {
                println!(
                    "  FAILED #{} {}: {}",
                    failed.change_id, failed.file_path, failed.error
                );
            }
        }
        ActionOutcome::Reject { rejected_changes } => {
            println!("Rejected {} change(s)", rejected_changes.len());
        }
        ActionOutcome::Probe { response } => println!("{}", response),
    })
}

async fn cmd_propose(
    config: &SluiceConfig,
    out: &Output,
    ticket_id: Option<i64>,
    file: String,
    instruction: String,
) -> Result<()> {
    let orchestrator = open_orchestrator(config).await?;
    let change = orchestrator
        .propose(ticket_id, &file, &instruction)
        .await
        .with_context(|| format!("Failed to propose a change for {}", file))?;

    out.emit(&change, |c| {
        println!("Proposed change #{} for {}", c.id, c.file_path);
        println!("Apply with 'sluice accept {}'", c.id);
    })
}

async fn cmd_resolve_change(
    config: &SluiceConfig,
    out: &Output,
    change_id: i64,
    outcome: ChangeOutcome,
) -> Result<()> {
    let orchestrator = open_orchestrator(config).await?;
    let change = orchestrator
        .proposals()
        .resolve(change_id, outcome)
        .await
        .with_context(|| format!("Failed to resolve change #{}", change_id))?;

    out.emit(&change, |c| {
        println!("Change #{} {}: {}", c.id, c.status, c.file_path)
    })
}

async fn cmd_changes(config: &SluiceConfig, out: &Output, ticket: Option<i64>) -> Result<()> {
    let db = open_db(config).await?;
    let changes = match ticket {
        Some(id) => db.list_changes_for_ticket(id).await?,
        None => db.list_pending_changes().await?,
    };

    out.emit(&changes, |changes| {
        if changes.is_empty() {
            println!("No proposed changes");
        }
        for c in changes {
            print_change(c);
        }
    })
}

fn print_change(c: &ProposedChange) {
    let ticket = c
        .ticket_id
        .map(|id| format!("ticket #{}", id))
        .unwrap_or_else(|| "no ticket".to_string());
    println!(
        "#{:<4} [{}] {} ({}) {}",
        c.id, c.status, c.file_path, ticket, c.description
    );
}

async fn cmd_history(config: &SluiceConfig, out: &Output, limit: usize) -> Result<()> {
    let db = open_db(config).await?;
    let history = db.list_change_history(limit).await?;

    out.emit(&history, |history| {
        if history.is_empty() {
            println!("No recorded changes");
        }
        for entry in history {
            println!(
                "{} {:<8} {} [{}]",
                entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                entry.record.change_type.as_str(),
                entry.record.summary,
                entry.record.files_affected.join(", ")
            );
        }
    })
}

async fn cmd_files(config: &SluiceConfig, out: &Output, directory: String) -> Result<()> {
    let orchestrator = open_orchestrator(config).await?;
    let files = orchestrator.fetcher().list_shallow(&directory)?;

    out.emit(&files, |files| {
        for f in files {
            println!("{:>8}  {}", f.size, f.path);
        }
    })
}
