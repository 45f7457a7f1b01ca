//! `outtrack status`: checkpoint, totals and the most recently seen active
//! outages.

use std::io::{self, Write};
use std::path::Path;

use clap::Args;
use outtrack_core::model::time::format_rfc3339;
use outtrack_core::store::query::{StoreStats, store_stats};
use outtrack_core::store::{OutageSummary, summary, try_open_store};
use serde::Serialize;

use super::ConfigArgs;
use crate::output::{OutputMode, kv, render, section};

/// Arguments for `outtrack status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Number of active outages to list.
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

/// Report payload for `outtrack status`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    database: String,
    initialized: bool,
    #[serde(flatten)]
    stats: StoreStats,
    recent_active: Vec<OutageSummary>,
}

/// Execute `outtrack status`. A missing database reports an empty store.
///
/// # Errors
///
/// Returns an error if the database exists but cannot be read.
pub fn run_status(
    args: &StatusArgs,
    config: &ConfigArgs,
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<()> {
    let config = config.resolve(project_root)?;
    let database = config.database_file.display().to_string();

    let report = match try_open_store(&config.database_file)? {
        Some(conn) => StatusReport {
            database,
            initialized: true,
            stats: store_stats(&conn)?,
            recent_active: summary::active(&conn, args.limit)?,
        },
        None => StatusReport {
            database,
            initialized: false,
            stats: StoreStats::default(),
            recent_active: Vec::new(),
        },
    };

    render(output, &report, render_human)
}

fn render_human(report: &StatusReport, w: &mut dyn Write) -> io::Result<()> {
    section(w, "status")?;
    kv(w, "database", &report.database)?;
    if !report.initialized {
        return writeln!(w, "no event store yet; run `outtrack ingest`");
    }

    let stats = &report.stats;
    kv(
        w,
        "checkpoint",
        stats.checkpoint.map_or_else(|| "-".to_string(), format_rfc3339),
    )?;
    kv(
        w,
        "first observed",
        stats.first_observed.map_or_else(|| "-".to_string(), format_rfc3339),
    )?;
    kv(
        w,
        "outages",
        format!(
            "{} ({} active, {} resolved)",
            stats.outages, stats.active, stats.resolved
        ),
    )?;
    kv(w, "events", stats.events.to_string())?;
    for (kind, count) in &stats.events_by_kind {
        kv(w, &format!("  {kind}"), count.to_string())?;
    }

    if report.recent_active.is_empty() {
        return Ok(());
    }
    writeln!(w)?;
    section(w, "recently seen active outages")?;
    for outage in &report.recent_active {
        let place = outage
            .neighborhood
            .as_deref()
            .or(outage.county.as_deref())
            .unwrap_or("-");
        writeln!(
            w,
            "{:>6}  {}  {:>6} cust  {:<16} {}",
            outage.outage_id.0,
            format_rfc3339(outage.last_observed),
            outage.max_customers_affected,
            outage.last_cause,
            place
        )?;
    }
    Ok(())
}
