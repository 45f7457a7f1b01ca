//! Snapshot history: turns a revision history of one tracked file into an
//! ordered, deduplicated stream of `(observed_at, bytes)` snapshots.
//!
//! # Algorithm
//!
//! 1. Walk revisions newest → oldest from head, down to and including the
//!    revision whose time equals the checkpoint (`since`), or to the root.
//! 2. If a checkpoint was given and no revision carries exactly that time,
//!    fail with [`HistoryError::Continuity`] before yielding anything.
//! 3. Replay oldest → newest. Revisions without the tracked file are
//!    skipped. A revision whose file hash equals the last seen hash is
//!    skipped. The checkpoint revision seeds the seen hash but is not
//!    yielded.
//!
//! # Invariants
//!
//! - Yielded times are strictly increasing and strictly after `since`.
//! - Two consecutive yielded snapshots never have identical content.
//! - File content is only read for revisions that are yielded.

pub mod git;
pub mod memory;

use std::fmt;

use chrono::{DateTime, Utc};

pub use git::GitRevisionStore;
pub use memory::MemoryRevisionStore;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised while walking or reading snapshot history.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// The checkpoint time does not match any revision in the walked history.
    #[error("did not see checkpoint revision at {since}")]
    Continuity { since: DateTime<Utc> },

    /// The repository could not be opened or cloned.
    #[error("open repository {location}: {source}")]
    Open {
        location: String,
        #[source]
        source: git2::Error,
    },

    /// Any other git failure while walking or reading.
    #[error("git: {0}")]
    Git(#[from] git2::Error),

    /// Local I/O failure (temporary clone directory).
    #[error("history I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A revision's timestamp is outside the representable range.
    #[error("revision {revision} has unrepresentable time {seconds}")]
    Timestamp { revision: RevisionId, seconds: i64 },

    /// A revision or blob referenced by the walk is not in the store.
    #[error("unknown object {0}")]
    UnknownObject(String),
}

// ---------------------------------------------------------------------------
// Revision store contract
// ---------------------------------------------------------------------------

/// Opaque revision identifier (a commit hash for git).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevisionId(pub String);

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One revision of the history with its observation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub id: RevisionId,
    pub time: DateTime<Utc>,
}

/// Content hash of one file version; equal hashes mean equal bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(pub String);

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Any append-only, addressable revision history.
pub trait RevisionStore {
    /// The current head revision, or `None` for an empty history.
    ///
    /// # Errors
    ///
    /// Returns an error if the head cannot be resolved.
    fn head(&self) -> Result<Option<Revision>, HistoryError>;

    /// Ancestors of `from` (inclusive), newest first by time, stopping at the
    /// first revision older than `until` when a bound is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the walk fails.
    fn ancestors(
        &self,
        from: &Revision,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Revision>, HistoryError>;

    /// Hash of `path` at `revision`, or `None` when the file is absent there.
    ///
    /// # Errors
    ///
    /// Returns an error if the revision's tree cannot be read.
    fn file_hash(
        &self,
        revision: &Revision,
        path: &str,
    ) -> Result<Option<ContentHash>, HistoryError>;

    /// Bytes of the file version with the given hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the content cannot be read.
    fn read(&self, hash: &ContentHash) -> Result<Vec<u8>, HistoryError>;
}

impl<S: RevisionStore + ?Sized> RevisionStore for &S {
    fn head(&self) -> Result<Option<Revision>, HistoryError> {
        (**self).head()
    }

    fn ancestors(
        &self,
        from: &Revision,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Revision>, HistoryError> {
        (**self).ancestors(from, until)
    }

    fn file_hash(
        &self,
        revision: &Revision,
        path: &str,
    ) -> Result<Option<ContentHash>, HistoryError> {
        (**self).file_hash(revision, path)
    }

    fn read(&self, hash: &ContentHash) -> Result<Vec<u8>, HistoryError> {
        (**self).read(hash)
    }
}

// ---------------------------------------------------------------------------
// HistorySource
// ---------------------------------------------------------------------------

/// One yielded snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub observed_at: DateTime<Utc>,
    pub revision: RevisionId,
    pub bytes: Vec<u8>,
}

/// Counters describing what a stream skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Revisions walked after the checkpoint.
    pub walked: usize,
    /// Revisions dropped because another revision carried the same time.
    pub same_time: usize,
    /// Revisions without the tracked file.
    pub absent: usize,
    /// Revisions whose content matched the previous snapshot.
    pub unchanged: usize,
    /// Snapshots yielded.
    pub yielded: usize,
}

/// Reads snapshot history for tracked files from a [`RevisionStore`].
pub struct HistorySource<S> {
    store: S,
}

impl<S: RevisionStore> HistorySource<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Open a lazy snapshot stream for `path`, resuming after `since`.
    ///
    /// The revision walk happens here; file contents are read lazily as the
    /// stream is consumed.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Continuity`] if `since` is set and no revision
    /// carries exactly that time, or any error from the revision walk.
    pub fn stream(
        &self,
        path: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<SnapshotStream<'_, S>, HistoryError> {
        let Some(head) = self.store.head()? else {
            if let Some(since) = since {
                return Err(HistoryError::Continuity { since });
            }
            return Ok(SnapshotStream::empty(&self.store, path));
        };

        let walked = self.store.ancestors(&head, since)?;

        let mut newer = Vec::new();
        let mut anchor = None;
        let mut same_time = 0;
        for revision in walked {
            if let Some(since) = since {
                if revision.time == since {
                    anchor = Some(revision);
                    break;
                }
                if revision.time < since {
                    break;
                }
            }
            // Keep only the newest revision for any one timestamp.
            if newer
                .last()
                .is_some_and(|last: &Revision| last.time == revision.time)
            {
                tracing::debug!(revision = %revision.id, time = %revision.time, "dropping same-time revision");
                same_time += 1;
                continue;
            }
            newer.push(revision);
        }

        let last_hash = match (since, anchor) {
            (Some(since), None) => return Err(HistoryError::Continuity { since }),
            (_, Some(anchor)) => self.store.file_hash(&anchor, path)?,
            (None, None) => None,
        };

        newer.reverse();
        tracing::debug!(
            path,
            pending = newer.len(),
            seeded = last_hash.is_some(),
            "history walk complete"
        );

        Ok(SnapshotStream {
            store: &self.store,
            path: path.to_string(),
            stats: StreamStats {
                walked: newer.len() + same_time,
                same_time,
                ..StreamStats::default()
            },
            pending: newer.into_iter(),
            last_hash,
            failed: false,
        })
    }
}

/// Lazy iterator over changed snapshots, oldest first.
///
/// The first error ends the stream.
pub struct SnapshotStream<'a, S> {
    store: &'a S,
    path: String,
    pending: std::vec::IntoIter<Revision>,
    last_hash: Option<ContentHash>,
    stats: StreamStats,
    failed: bool,
}

impl<'a, S: RevisionStore> SnapshotStream<'a, S> {
    fn empty(store: &'a S, path: &str) -> Self {
        Self {
            store,
            path: path.to_string(),
            pending: Vec::new().into_iter(),
            last_hash: None,
            stats: StreamStats::default(),
            failed: false,
        }
    }

    /// Revisions still waiting to be examined.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub const fn stats(&self) -> StreamStats {
        self.stats
    }

    fn advance(&mut self) -> Result<Option<Snapshot>, HistoryError> {
        while let Some(revision) = self.pending.next() {
            let Some(hash) = self.store.file_hash(&revision, &self.path)? else {
                tracing::debug!(revision = %revision.id, path = %self.path, "tracked file absent");
                self.stats.absent += 1;
                continue;
            };

            if self.last_hash.as_ref() == Some(&hash) {
                tracing::debug!(revision = %revision.id, hash = %hash, "content unchanged");
                self.stats.unchanged += 1;
                continue;
            }

            let bytes = self.store.read(&hash)?;
            self.last_hash = Some(hash);
            self.stats.yielded += 1;
            return Ok(Some(Snapshot {
                observed_at: revision.time,
                revision: revision.id,
                bytes,
            }));
        }
        Ok(None)
    }
}

impl<S: RevisionStore> Iterator for SnapshotStream<'_, S> {
    type Item = Result<Snapshot, HistoryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.advance() {
            Ok(snapshot) => snapshot.map(Ok),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    const PATH: &str = "data/outages.json";

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 18, 19, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn collect(
        source: &HistorySource<MemoryRevisionStore>,
        since: Option<DateTime<Utc>>,
    ) -> Vec<(DateTime<Utc>, Vec<u8>)> {
        source
            .stream(PATH, since)
            .expect("open stream")
            .map(|s| s.map(|s| (s.observed_at, s.bytes)))
            .collect::<Result<Vec<_>, _>>()
            .expect("stream")
    }

    #[test]
    fn empty_history_yields_nothing() {
        let source = HistorySource::new(MemoryRevisionStore::new());
        assert!(collect(&source, None).is_empty());
    }

    #[test]
    fn empty_history_with_checkpoint_is_discontinuous() {
        let source = HistorySource::new(MemoryRevisionStore::new());
        let err = source.stream(PATH, Some(t(0))).err().expect("continuity error");
        assert!(matches!(err, HistoryError::Continuity { .. }));
    }

    #[test]
    fn replays_oldest_first_and_skips_identical_content() {
        let mut store = MemoryRevisionStore::new();
        store.commit(t(0), &[(PATH, b"[1]")]);
        store.commit(t(1), &[(PATH, b"[1]")]);
        store.commit(t(2), &[(PATH, b"[1]")]);
        store.commit(t(3), &[(PATH, b"[2]")]);
        store.commit(t(4), &[(PATH, b"[1]")]);
        let source = HistorySource::new(store);

        let got = collect(&source, None);
        assert_eq!(
            got,
            vec![
                (t(0), b"[1]".to_vec()),
                (t(3), b"[2]".to_vec()),
                (t(4), b"[1]".to_vec()),
            ]
        );
    }

    #[test]
    fn revisions_without_the_file_are_skipped() {
        let mut store = MemoryRevisionStore::new();
        store.commit(t(0), &[("README", b"hello")]);
        store.commit(t(1), &[(PATH, b"[1]")]);
        store.commit(t(2), &[("README", b"bye")]);
        store.commit(t(3), &[(PATH, b"[1]")]);
        let source = HistorySource::new(store);

        let mut stream = source.stream(PATH, None).expect("stream");
        let first = stream.next().expect("one").expect("ok");
        assert_eq!(first.observed_at, t(1));
        assert!(stream.next().is_none());
        assert_eq!(stream.stats().absent, 2);
        assert_eq!(stream.stats().unchanged, 1);
    }

    #[test]
    fn checkpoint_seeds_dedup_and_is_not_yielded() {
        let mut store = MemoryRevisionStore::new();
        store.commit(t(0), &[(PATH, b"[0]")]);
        store.commit(t(1), &[(PATH, b"[1]")]);
        store.commit(t(2), &[(PATH, b"[1]")]);
        store.commit(t(3), &[(PATH, b"[3]")]);
        let source = HistorySource::new(store);

        let got = collect(&source, Some(t(1)));
        assert_eq!(got, vec![(t(3), b"[3]".to_vec())]);
    }

    #[test]
    fn checkpoint_missing_from_history_fails_before_yielding() {
        let mut store = MemoryRevisionStore::new();
        store.commit(t(0), &[(PATH, b"[0]")]);
        store.commit(t(2), &[(PATH, b"[2]")]);
        let source = HistorySource::new(store);

        let err = source.stream(PATH, Some(t(1))).err().expect("continuity");
        match err {
            HistoryError::Continuity { since } => assert_eq!(since, t(1)),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn checkpoint_newer_than_head_is_discontinuous() {
        let mut store = MemoryRevisionStore::new();
        store.commit(t(0), &[(PATH, b"[0]")]);
        let source = HistorySource::new(store);

        assert!(matches!(
            source.stream(PATH, Some(t(5))),
            Err(HistoryError::Continuity { .. })
        ));
    }

    #[test]
    fn checkpoint_at_head_yields_nothing() {
        let mut store = MemoryRevisionStore::new();
        store.commit(t(0), &[(PATH, b"[0]")]);
        store.commit(t(1), &[(PATH, b"[1]")]);
        let source = HistorySource::new(store);

        assert!(collect(&source, Some(t(1))).is_empty());
    }

    #[test]
    fn same_time_revisions_keep_the_newest() {
        let mut store = MemoryRevisionStore::new();
        store.commit(t(0), &[(PATH, b"[a]")]);
        store.commit(t(0), &[(PATH, b"[b]")]);
        store.commit(t(1), &[(PATH, b"[c]")]);
        let source = HistorySource::new(store);

        let got = collect(&source, None);
        assert_eq!(got, vec![(t(0), b"[b]".to_vec()), (t(1), b"[c]".to_vec())]);
    }

    #[test]
    fn content_is_read_lazily() {
        let mut store = MemoryRevisionStore::new();
        store.commit(t(0), &[(PATH, b"[0]")]);
        store.commit(t(1), &[(PATH, b"[1]")]);
        store.commit(t(2), &[(PATH, b"[1]")]);
        let source = HistorySource::new(store);

        let mut stream = source.stream(PATH, None).expect("stream");
        assert_eq!(source.store().blob_reads(), 0);
        stream.next().expect("first").expect("ok");
        assert_eq!(source.store().blob_reads(), 1);
        assert_eq!(stream.by_ref().count(), 1);
        assert_eq!(source.store().blob_reads(), 2);
    }
}
