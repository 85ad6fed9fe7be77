//! sluice storage - relational store for the change-proposal pipeline
//!
//! Backed by an embedded Turso database file (default `.sluice/sluice.db`)
//! in WAL mode.
//!
//! # Tables
//!
//! ```text
//! projects          target projects and their service URLs
//! tickets           work items plus the latest AI resolution cycle
//! proposed_changes  reviewable file edits (pending -> accepted | rejected)
//! changes_history   append-only audit log
//! ```
//!
//! # Example Usage
//!
//! ```no_run
//! use sluice_core::{NewTicket, TicketCategory, Priority};
//! use sluice_storage::Database;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::open(".sluice/sluice.db").await?;
//! db.init_schema().await?;
//!
//! let ticket = db
//!     .create_ticket(&NewTicket {
//!         title: "Checkout total ignores discounts".to_string(),
//!         description: None,
//!         category: TicketCategory::Bug,
//!         priority: Priority::High,
//!         project_id: None,
//!     })
//!     .await?;
//! println!("Opened ticket #{}", ticket.id);
//! # Ok(())
//! # }
//! ```

pub mod db;

pub use db::{Database, DbError, Result};
