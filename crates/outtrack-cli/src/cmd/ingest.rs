//! `outtrack ingest`: replay every snapshot after the checkpoint.

use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use clap::Args;
use outtrack_core::IngestReport;
use outtrack_core::model::time::format_rfc3339;
use serde::Serialize;

use super::ConfigArgs;
use crate::output::{OutputMode, kv, render, section};

/// Arguments for `outtrack ingest`.
#[derive(Args, Debug, Default)]
pub struct IngestArgs {}

#[derive(Debug, Serialize)]
struct SkippedRevisions {
    same_time: usize,
    absent: usize,
    unchanged: usize,
}

/// JSON payload for `outtrack ingest`.
#[derive(Debug, Serialize)]
pub struct IngestSummary {
    database: String,
    resumed_after: Option<DateTime<Utc>>,
    observed_through: Option<DateTime<Utc>>,
    revisions_walked: usize,
    snapshots: usize,
    initial: usize,
    updated: usize,
    missing: usize,
    active: usize,
    skipped: SkippedRevisions,
    elapsed_ms: u128,
}

impl IngestSummary {
    fn new(database: &Path, report: &IngestReport) -> Self {
        Self {
            database: database.display().to_string(),
            resumed_after: report.resumed_after,
            observed_through: report.observed_through,
            revisions_walked: report.stream.walked,
            snapshots: report.snapshots,
            initial: report.initial,
            updated: report.updated,
            missing: report.missing,
            active: report.active,
            skipped: SkippedRevisions {
                same_time: report.stream.same_time,
                absent: report.stream.absent,
                unchanged: report.stream.unchanged,
            },
            elapsed_ms: report.elapsed.as_millis(),
        }
    }
}

/// Execute `outtrack ingest`.
///
/// # Errors
///
/// Returns the [`outtrack_core::IngestError`] that stopped the run.
pub fn run_ingest(
    _args: &IngestArgs,
    config: &ConfigArgs,
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<()> {
    let config = config.resolve(project_root)?;
    let report = outtrack_core::ingest::run(&config)?;
    let summary = IngestSummary::new(&config.database_file, &report);
    render(output, &summary, render_human)
}

fn render_human(summary: &IngestSummary, w: &mut dyn Write) -> io::Result<()> {
    section(w, "ingest")?;
    kv(w, "database", &summary.database)?;
    kv(
        w,
        "resumed after",
        summary.resumed_after.map_or_else(|| "(fresh store)".to_string(), format_rfc3339),
    )?;
    kv(
        w,
        "observed through",
        summary.observed_through.map_or_else(|| "(nothing new)".to_string(), format_rfc3339),
    )?;
    kv(w, "snapshots", summary.snapshots.to_string())?;
    kv(
        w,
        "events",
        format!(
            "{} initial, {} update, {} missing",
            summary.initial, summary.updated, summary.missing
        ),
    )?;
    kv(w, "active outages", summary.active.to_string())?;
    kv(
        w,
        "skipped revisions",
        format!(
            "{} same-time, {} absent, {} unchanged",
            summary.skipped.same_time, summary.skipped.absent, summary.skipped.unchanged
        ),
    )?;
    kv(w, "elapsed", format!("{}ms", summary.elapsed_ms))
}
