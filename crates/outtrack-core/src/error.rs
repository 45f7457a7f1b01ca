use std::fmt;

/// Machine-readable error codes for operators and wrapper scripts.
///
/// Every fatal ingestion failure maps to exactly one code, so a failed run
/// can be classified from its last log line alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    RepositoryUnavailable,
    CheckpointNotInHistory,
    SnapshotDecodeFailed,
    AmbiguousIdentity,
    ObservationOutOfOrder,
    EnrichmentFailed,
    PersistenceFailed,
    SummaryMismatch,
    OutageNotFound,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::RepositoryUnavailable => "E1002",
            Self::CheckpointNotInHistory => "E2001",
            Self::ObservationOutOfOrder => "E2002",
            Self::SnapshotDecodeFailed => "E3001",
            Self::AmbiguousIdentity => "E3002",
            Self::EnrichmentFailed => "E4001",
            Self::PersistenceFailed => "E5001",
            Self::SummaryMismatch => "E5002",
            Self::OutageNotFound => "E5003",
            Self::LockContention => "E5004",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::RepositoryUnavailable => "Snapshot repository unavailable",
            Self::CheckpointNotInHistory => "Checkpoint revision not found in history",
            Self::ObservationOutOfOrder => "Observation older than the last checkpoint",
            Self::SnapshotDecodeFailed => "Snapshot could not be decoded",
            Self::AmbiguousIdentity => "Two outages share one identity key",
            Self::EnrichmentFailed => "Snapshot enrichment failed",
            Self::PersistenceFailed => "Event store write failed",
            Self::SummaryMismatch => "Stored summary differs from event replay",
            Self::OutageNotFound => "Outage not found",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in outtrack.toml and retry."),
            Self::RepositoryUnavailable => {
                Some("Check --repo-path or --repo-remote and network access.")
            }
            Self::CheckpointNotInHistory => Some(
                "The history was rewritten past the last checkpoint. Ingest into a fresh database.",
            ),
            Self::ObservationOutOfOrder => {
                Some("Snapshots must be observed in strictly increasing time order.")
            }
            Self::SnapshotDecodeFailed | Self::AmbiguousIdentity => {
                Some("Inspect the snapshot at the logged revision time; the run stopped before it.")
            }
            Self::EnrichmentFailed => Some("Check the encoded geometry in the logged snapshot and the places file."),
            Self::PersistenceFailed => Some("Check disk space and database permissions, then rerun."),
            Self::SummaryMismatch => Some("Run `outtrack rebuild-summaries` to recompute summaries."),
            Self::OutageNotFound => None,
            Self::LockContention => {
                Some("Retry after the other `outtrack` process releases its lock.")
            }
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
