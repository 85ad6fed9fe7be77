//! # sluice-orchestrator
//!
//! Review-gated change proposals for a sandboxed project tree.
//!
//! - [`ChangeProposalStore`] owns the `pending -> accepted | rejected`
//!   lifecycle and performs the only filesystem writes, at accept time.
//! - [`TicketResolutionOrchestrator`] turns a ticket into an analysis plus
//!   one pending proposal per directive, and applies or discards them on
//!   request.

mod orchestrator;
pub mod prompt;
mod proposals;

pub use orchestrator::{
    ActionOutcome, FailedApply, OrchestratorSettings, ProposalRef, ResolutionReport,
    TaskAnalysis, TicketAction, TicketResolutionOrchestrator,
};
pub use proposals::ChangeProposalStore;
