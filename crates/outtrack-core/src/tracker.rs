//! Entity tracking: turns successive snapshots into lifecycle events.
//!
//! The tracker holds the outages known to be active, keyed by
//! [`IdentityKey`]. Each observation classifies every incoming record as an
//! Update of a known outage or an Initial sighting of a new one, and every
//! known outage that did not appear as Missing. All events of one
//! observation are written through a single [`Observation`]; the in-memory
//! table is only replaced after that commits.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::ErrorCode;
use crate::model::{EventKind, IdentityKey, OutageId, RawOutage, TrackedOutage};
use crate::store::{KnownOutage, Observation, OutageStore, StoreError};

/// Reasons an observation is refused or fails.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("observation at {at} is not after the last observation at {last}")]
    OutOfOrder {
        at: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    /// A record carries no position, area or coordinates.
    #[error("outage {source_id:?} has no geometry to identify it by")]
    MissingIdentity { source_id: String },

    /// Two records of one snapshot map to the same identity key.
    #[error("outages {first:?} and {second:?} share identity key {key}")]
    AmbiguousIdentity {
        key: IdentityKey,
        first: String,
        second: String,
    },

    /// Two active outages in the store map to the same identity key.
    #[error("stored outages {first:?} and {second:?} share identity key {key}")]
    AmbiguousStoredIdentity {
        key: IdentityKey,
        first: Option<OutageId>,
        second: Option<OutageId>,
    },
}

impl TrackerError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Store(_) => ErrorCode::PersistenceFailed,
            Self::OutOfOrder { .. } => ErrorCode::ObservationOutOfOrder,
            Self::MissingIdentity { .. } => ErrorCode::SnapshotDecodeFailed,
            Self::AmbiguousIdentity { .. } | Self::AmbiguousStoredIdentity { .. } => {
                ErrorCode::AmbiguousIdentity
            }
        }
    }
}

// ---------------------------------------------------------------------------
// KnownTable
// ---------------------------------------------------------------------------

/// Active outages keyed by identity.
#[derive(Debug, Clone, Default)]
pub struct KnownTable {
    by_key: HashMap<IdentityKey, TrackedOutage>,
}

impl KnownTable {
    /// Index outages loaded from the store by the key they were created
    /// under.
    ///
    /// # Errors
    ///
    /// Returns an error if two loaded outages share a key.
    pub fn from_loaded(mut loaded: Vec<KnownOutage>) -> Result<Self, TrackerError> {
        loaded.sort_by_key(|known| known.tracked.id);

        let mut by_key: HashMap<IdentityKey, TrackedOutage> = HashMap::with_capacity(loaded.len());
        for KnownOutage { key, tracked } in loaded {
            if let Some(existing) = by_key.get(&key) {
                return Err(TrackerError::AmbiguousStoredIdentity {
                    key,
                    first: existing.id,
                    second: tracked.id,
                });
            }
            by_key.insert(key, tracked);
        }
        Ok(Self { by_key })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &IdentityKey) -> Option<&TrackedOutage> {
        self.by_key.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IdentityKey, &TrackedOutage)> {
        self.by_key.iter()
    }

    /// Surrogate IDs of every active outage, ascending.
    #[must_use]
    pub fn ids(&self) -> Vec<OutageId> {
        let mut ids: Vec<_> = self.by_key.values().filter_map(|t| t.id).collect();
        ids.sort_unstable();
        ids
    }
}

// ---------------------------------------------------------------------------
// OutageTracker
// ---------------------------------------------------------------------------

/// Counts of what one observation emitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObserveReport {
    pub initial: usize,
    pub updated: usize,
    pub missing: usize,
    /// Active outages after the observation.
    pub active: usize,
    /// Outages resolved by this observation, ascending.
    pub resolved: Vec<OutageId>,
}

/// Classifies snapshots against the known table and persists the result.
#[derive(Debug)]
pub struct OutageTracker<S> {
    store: S,
    known: KnownTable,
    last_observed: Option<DateTime<Utc>>,
}

impl<S: OutageStore> OutageTracker<S> {
    /// Load active outages and the checkpoint from `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or holds ambiguous state.
    pub fn load(store: S) -> Result<Self, TrackerError> {
        let known = KnownTable::from_loaded(store.load_known()?)?;
        let last_observed = store.checkpoint()?;
        tracing::info!(
            known = known.len(),
            checkpoint = ?last_observed,
            "tracker loaded state"
        );
        Ok(Self {
            store,
            known,
            last_observed,
        })
    }

    #[must_use]
    pub const fn known(&self) -> &KnownTable {
        &self.known
    }

    #[must_use]
    pub const fn last_observed(&self) -> Option<DateTime<Utc>> {
        self.last_observed
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Apply one snapshot observed at `at`.
    ///
    /// Incoming records are processed in snapshot order, so new outages get
    /// IDs in the order they were published. Missing events are emitted in
    /// ascending ID order.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the tracker and the store unchanged, if `at`
    /// is not after the last observation, a record cannot be identified, two
    /// records share a key, or persistence fails.
    pub fn observe(
        &mut self,
        at: DateTime<Utc>,
        outages: Vec<RawOutage>,
    ) -> Result<ObserveReport, TrackerError> {
        if let Some(last) = self.last_observed
            && at <= last
        {
            return Err(TrackerError::OutOfOrder { at, last });
        }

        tracing::debug!(
            %at,
            known = self.known.len(),
            observing = outages.len(),
            "tracker observe"
        );

        let keyed = key_snapshot(outages)?;
        let mut report = ObserveReport::default();
        let mut next = HashMap::with_capacity(keyed.len());

        let mut observation = self.store.begin_observation()?;
        for (key, outage) in keyed {
            let tracked = if let Some(existing) = self.known.get(&key) {
                let mut tracked = existing.clone();
                tracked.outage = outage;
                tracked.record(EventKind::Update, at);
                observation.emit(&tracked)?;
                report.updated += 1;
                tracked
            } else {
                let mut tracked = TrackedOutage::first_seen(at, outage);
                tracked.id = Some(observation.emit(&tracked)?);
                report.initial += 1;
                tracked
            };
            next.insert(key, tracked);
        }

        let mut gone: Vec<&TrackedOutage> = self
            .known
            .iter()
            .filter(|(key, _)| !next.contains_key(*key))
            .map(|(_, tracked)| tracked)
            .collect();
        gone.sort_by_key(|tracked| tracked.id);
        for existing in gone {
            let mut tracked = existing.clone();
            tracked.record(EventKind::Missing, at);
            observation.emit(&tracked)?;
            report.missing += 1;
            report.resolved.extend(tracked.id);
        }

        observation.commit()?;

        self.known = KnownTable { by_key: next };
        self.last_observed = Some(at);
        report.active = self.known.len();
        Ok(report)
    }
}

/// Resolve every record's identity key, rejecting snapshots that cannot be
/// matched unambiguously.
fn key_snapshot(outages: Vec<RawOutage>) -> Result<Vec<(IdentityKey, RawOutage)>, TrackerError> {
    let mut seen: HashMap<IdentityKey, usize> = HashMap::with_capacity(outages.len());
    let mut keyed = Vec::with_capacity(outages.len());
    for outage in outages {
        let key = IdentityKey::derive(&outage.geom).ok_or_else(|| {
            TrackerError::MissingIdentity {
                source_id: outage.id.clone(),
            }
        })?;
        if let Some(&index) = seen.get(&key) {
            let (_, first): &(IdentityKey, RawOutage) = &keyed[index];
            return Err(TrackerError::AmbiguousIdentity {
                key,
                first: first.id.clone(),
                second: outage.id,
            });
        }
        seen.insert(key.clone(), keyed.len());
        keyed.push((key, outage));
    }
    Ok(keyed)
}
