//! `outtrack history <id>`: one outage's event log and cached summary.

use std::io::{self, Write};
use std::path::Path;

use clap::Args;
use outtrack_core::ErrorCode;
use outtrack_core::model::OutageId;
use outtrack_core::model::time::format_rfc3339;
use outtrack_core::store::query::{OutageRecord, StoredEvent, events_for, get_outage};
use outtrack_core::store::{OutageSummary, summary};
use serde::Serialize;

use super::{ConfigArgs, open_existing_store};
use crate::output::{CodedError, OutputMode, kv, render, section};

/// Arguments for `outtrack history`.
#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Outage ID assigned by the store.
    pub id: i64,
}

#[derive(Debug, Serialize)]
struct HistoryOutput {
    #[serde(flatten)]
    outage: OutageRecord,
    summary: Option<OutageSummary>,
    events: Vec<StoredEvent>,
}

/// Execute `outtrack history`.
///
/// # Errors
///
/// Returns an `OutageNotFound` error for unknown IDs.
pub fn run_history(
    args: &HistoryArgs,
    config: &ConfigArgs,
    output: OutputMode,
    project_root: &Path,
) -> anyhow::Result<()> {
    let config = config.resolve(project_root)?;
    let conn = open_existing_store(&config)?;
    let id = OutageId(args.id);

    let Some(outage) = get_outage(&conn, id)? else {
        return Err(
            CodedError::new(ErrorCode::OutageNotFound, format!("outage {id} not found")).into(),
        );
    };
    let payload = HistoryOutput {
        outage,
        summary: summary::load(&conn, id)?,
        events: events_for(&conn, id)?,
    };
    render(output, &payload, render_human)
}

fn render_human(payload: &HistoryOutput, w: &mut dyn Write) -> io::Result<()> {
    let outage = &payload.outage;
    section(w, &format!("outage {}", outage.outage_id))?;
    kv(w, "source id", &outage.source_id)?;
    kv(w, "identity", &outage.identity_key)?;
    if let (Some(lon), Some(lat)) = (outage.longitude, outage.latitude) {
        kv(w, "position", format!("{lat:.5}, {lon:.5}"))?;
    }
    if let Some(county) = &outage.county {
        kv(w, "county", county)?;
    }
    if let Some(neighborhood) = &outage.neighborhood {
        kv(w, "neighborhood", neighborhood)?;
    }
    if let Some(summary) = &payload.summary {
        kv(w, "resolved", summary.resolved.to_string())?;
        kv(
            w,
            "customers",
            format!(
                "{}..{}",
                summary.min_customers_affected, summary.max_customers_affected
            ),
        )?;
    }

    writeln!(w)?;
    section(w, "events")?;
    for event in &payload.events {
        let customers = if event.customers_masked {
            format!("<{}", event.customers_affected)
        } else {
            event.customers_affected.to_string()
        };
        writeln!(
            w,
            "{}  {:<8} {:>6} cust  {:<16} etr {}",
            format_rfc3339(event.observed_at),
            event.kind.as_str(),
            customers,
            event.cause,
            event.etr.map_or_else(|| "-".to_string(), format_rfc3339)
        )?;
    }
    Ok(())
}
