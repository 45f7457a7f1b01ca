use std::io::{self, Write};
use std::path::Path;

use outtrack_core::ErrorCode;
use outtrack_core::store::summary::verify_summaries;
use outtrack_core::store::{OutageSummary, SummaryMismatch};
use serde::Serialize;

use super::{ConfigArgs, open_existing_store};
use crate::output::{CodedError, OutputMode, render};

#[derive(Debug, Serialize)]
struct VerifyOutput {
    database: String,
    ok: bool,
    mismatches: Vec<SummaryMismatch>,
}

/// Run `outtrack verify`: replay each outage's events and compare the
/// result with its stored summary.
///
/// # Errors
///
/// Returns a `SummaryMismatch` error when any summary disagrees.
pub fn run_verify(
    config: &ConfigArgs,
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<()> {
    let config = config.resolve(project_root)?;
    let conn = open_existing_store(&config)?;
    let mismatches = verify_summaries(&conn)?;

    let payload = VerifyOutput {
        database: config.database_file.display().to_string(),
        ok: mismatches.is_empty(),
        mismatches,
    };
    render(output, &payload, render_human)?;

    if payload.ok {
        Ok(())
    } else {
        Err(CodedError::new(
            ErrorCode::SummaryMismatch,
            format!("verify: {} summaries differ from their events", payload.mismatches.len()),
        )
        .into())
    }
}

fn render_human(payload: &VerifyOutput, w: &mut dyn Write) -> io::Result<()> {
    for mismatch in &payload.mismatches {
        let describe = |summary: Option<&OutageSummary>| {
            summary.map_or_else(
                || "none".to_string(),
                |s| {
                    format!(
                        "observations={} resolved={} max_cust={}",
                        s.observations, s.resolved, s.max_customers_affected
                    )
                },
            )
        };
        writeln!(
            w,
            "FAIL outage {} stored [{}] replayed [{}]",
            mismatch.outage_id,
            describe(mismatch.stored.as_ref()),
            describe(mismatch.replayed.as_ref())
        )?;
    }
    if payload.ok {
        writeln!(w, "verify: success")
    } else {
        writeln!(w, "verify: failed")
    }
}
