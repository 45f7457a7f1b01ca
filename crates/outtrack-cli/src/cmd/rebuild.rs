use std::io::Write;
use std::path::Path;

use anyhow::Context;
use outtrack_core::lock::IngestLock;
use outtrack_core::store::summary::rebuild_summaries;
use serde::Serialize;

use super::{ConfigArgs, open_existing_store_for_writing};
use crate::output::{OutputMode, render};

#[derive(Debug, Serialize)]
struct RebuildOutput {
    database: String,
    outages: usize,
    elapsed_ms: u128,
}

/// Run `outtrack rebuild-summaries`: recompute every summary from the event
/// log while holding the writer lock.
///
/// # Errors
///
/// Returns an error if the lock cannot be taken or the rebuild fails; the
/// previous summaries are then kept.
pub fn run_rebuild(
    config: &ConfigArgs,
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<()> {
    let config = config.resolve(project_root)?;
    let _lock = IngestLock::acquire(&config.database_file, config.lock_timeout())?;
    let mut conn = open_existing_store_for_writing(&config)?;

    let report = rebuild_summaries(&mut conn).context("rebuilding summaries")?;
    let payload = RebuildOutput {
        database: config.database_file.display().to_string(),
        outages: report.outage_count,
        elapsed_ms: report.elapsed.as_millis(),
    };
    render(output, &payload, |p, w| {
        writeln!(
            w,
            "rebuild-summaries: outages={} elapsed={}ms",
            p.outages, p.elapsed_ms
        )
    })
}
