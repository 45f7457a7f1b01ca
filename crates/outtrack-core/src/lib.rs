//! outtrack-core library.
//!
//! Reconstructs per-outage lifecycle histories from a revision history of
//! full-state snapshot dumps:
//!
//! - [`history`] turns revisions of one tracked file into an ordered,
//!   deduplicated snapshot stream
//! - [`enrich`] attaches decoded positions and place names
//! - [`tracker`] matches outages across snapshots and classifies them as
//!   Initial, Update or Missing
//! - [`store`] persists lifecycle events and derived summaries in SQLite
//! - [`ingest`] wires them together for one resumable run
//!
//! # Conventions
//!
//! - **Errors**: one `thiserror` enum per module; every fatal error maps to
//!   an [`error::ErrorCode`].
//! - **Logging**: `tracing` macros with structured fields.

pub mod config;
pub mod enrich;
pub mod error;
pub mod history;
pub mod ingest;
pub mod lock;
pub mod model;
pub mod store;
pub mod tracker;

pub use error::ErrorCode;
pub use ingest::{IngestError, IngestReport};
