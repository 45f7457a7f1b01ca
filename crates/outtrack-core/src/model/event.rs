//! Lifecycle events and the tracked-outage aggregate they belong to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::identity::IdentityKey;
use super::outage::RawOutage;

/// The three lifecycle transitions an outage goes through.
///
/// The string form is what the `outage_events.event_kind` column stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    /// First time this outage was seen.
    Initial,
    /// Seen again; state refreshed.
    Update,
    /// No longer published. Terminal.
    Missing,
}

/// Error returned when parsing an unknown event kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventKind {
    /// The unrecognised input string.
    pub raw: String,
}

impl fmt::Display for UnknownEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown event kind '{}': expected one of Initial, Update, Missing",
            self.raw
        )
    }
}

impl std::error::Error for UnknownEventKind {}

impl EventKind {
    pub const ALL: [Self; 3] = [Self::Initial, Self::Update, Self::Missing];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "Initial",
            Self::Update => "Update",
            Self::Missing => "Missing",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Missing)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Initial" => Ok(Self::Initial),
            "Update" => Ok(Self::Update),
            "Missing" => Ok(Self::Missing),
            _ => Err(UnknownEventKind { raw: s.to_string() }),
        }
    }
}

impl Serialize for EventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Surrogate ID the store assigns to a tracked outage. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutageId(pub i64);

impl fmt::Display for OutageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One lifecycle transition at one observation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub observed_at: DateTime<Utc>,
    pub kind: EventKind,
}

/// The persisted unit: a surrogate ID, the latest observed state, and the
/// events recorded for it so far.
///
/// Invariants: events are strictly increasing in `observed_at`, the first is
/// [`EventKind::Initial`], and nothing follows [`EventKind::Missing`].
/// Outages rebuilt by the store at startup carry only their latest event.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedOutage {
    /// `None` until the store has persisted the outage for the first time.
    pub id: Option<OutageId>,
    pub events: Vec<LifecycleEvent>,
    pub outage: RawOutage,
}

impl TrackedOutage {
    /// A never-persisted outage first seen at `observed_at`.
    #[must_use]
    pub fn first_seen(observed_at: DateTime<Utc>, outage: RawOutage) -> Self {
        Self {
            id: None,
            events: vec![LifecycleEvent {
                observed_at,
                kind: EventKind::Initial,
            }],
            outage,
        }
    }

    #[must_use]
    pub fn latest_event(&self) -> Option<&LifecycleEvent> {
        self.events.last()
    }

    #[must_use]
    pub fn last_observed(&self) -> Option<DateTime<Utc>> {
        self.latest_event().map(|event| event.observed_at)
    }

    /// True once a `Missing` event has been recorded.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.latest_event().is_some_and(|event| event.kind.is_terminal())
    }

    #[must_use]
    pub fn identity_key(&self) -> Option<IdentityKey> {
        IdentityKey::derive(&self.outage.geom)
    }

    /// Append a transition. The caller guarantees ordering; the store's
    /// `(outage_id, observed_at)` key rejects duplicates.
    pub fn record(&mut self, kind: EventKind, observed_at: DateTime<Utc>) {
        self.events.push(LifecycleEvent { observed_at, kind });
    }
}
