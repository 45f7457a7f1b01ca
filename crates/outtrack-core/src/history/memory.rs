//! In-memory revision store.
//!
//! Each commit replaces the whole tree, like a scraper committing a fresh
//! dump. Content is addressed by BLAKE3 hash so identical dumps share one
//! blob. Used by tests and by callers that feed snapshots from somewhere
//! other than git.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use super::{ContentHash, HistoryError, Revision, RevisionId, RevisionStore};

#[derive(Debug, Clone)]
struct StoredRevision {
    revision: Revision,
    files: BTreeMap<String, ContentHash>,
}

/// Revision history held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryRevisionStore {
    /// Commit order; the last entry is head.
    revisions: Vec<StoredRevision>,
    blobs: HashMap<ContentHash, Vec<u8>>,
    blob_reads: Cell<usize>,
}

impl MemoryRevisionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a new head whose tree contains exactly `files`.
    pub fn commit<B: AsRef<[u8]>>(&mut self, at: DateTime<Utc>, files: &[(&str, B)]) -> RevisionId {
        let id = RevisionId(format!("mem-{:04}", self.revisions.len()));
        let mut tree = BTreeMap::new();
        for (path, bytes) in files {
            let bytes = bytes.as_ref();
            let hash = ContentHash(blake3::hash(bytes).to_hex().to_string());
            self.blobs.entry(hash.clone()).or_insert_with(|| bytes.to_vec());
            tree.insert((*path).to_string(), hash);
        }
        self.revisions.push(StoredRevision {
            revision: Revision {
                id: id.clone(),
                time: at,
            },
            files: tree,
        });
        id
    }

    /// Number of blob reads served so far.
    #[must_use]
    pub fn blob_reads(&self) -> usize {
        self.blob_reads.get()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    fn find(&self, id: &RevisionId) -> Result<(usize, &StoredRevision), HistoryError> {
        self.revisions
            .iter()
            .enumerate()
            .find(|(_, stored)| &stored.revision.id == id)
            .ok_or_else(|| HistoryError::UnknownObject(id.to_string()))
    }
}

impl RevisionStore for MemoryRevisionStore {
    fn head(&self) -> Result<Option<Revision>, HistoryError> {
        Ok(self.revisions.last().map(|stored| stored.revision.clone()))
    }

    fn ancestors(
        &self,
        from: &Revision,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Revision>, HistoryError> {
        let (position, _) = self.find(&from.id)?;

        // Newest first by time; among equal times, the later commit first.
        let mut ordered: Vec<(usize, &Revision)> = self.revisions[..=position]
            .iter()
            .enumerate()
            .map(|(idx, stored)| (idx, &stored.revision))
            .collect();
        ordered.sort_by(|(ia, a), (ib, b)| b.time.cmp(&a.time).then(ib.cmp(ia)));

        let mut out = Vec::new();
        for (_, revision) in ordered {
            if until.is_some_and(|until| revision.time < until) {
                break;
            }
            out.push(revision.clone());
        }
        Ok(out)
    }

    fn file_hash(
        &self,
        revision: &Revision,
        path: &str,
    ) -> Result<Option<ContentHash>, HistoryError> {
        let (_, stored) = self.find(&revision.id)?;
        Ok(stored.files.get(path).cloned())
    }

    fn read(&self, hash: &ContentHash) -> Result<Vec<u8>, HistoryError> {
        let bytes = self
            .blobs
            .get(hash)
            .ok_or_else(|| HistoryError::UnknownObject(hash.to_string()))?;
        self.blob_reads.set(self.blob_reads.get() + 1);
        Ok(bytes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn identical_content_shares_a_hash() {
        let mut store = MemoryRevisionStore::new();
        let at = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let r1 = store.commit(at, &[("f", b"same")]);
        let r2 = store.commit(at, &[("f", b"same")]);

        let head = store.head().unwrap().unwrap();
        assert_eq!(head.id, r2);

        let rev1 = Revision { id: r1, time: at };
        assert_eq!(
            store.file_hash(&rev1, "f").unwrap(),
            store.file_hash(&head, "f").unwrap()
        );
        assert_eq!(store.file_hash(&head, "missing").unwrap(), None);
    }

    #[test]
    fn ancestors_respect_bound() {
        let mut store = MemoryRevisionStore::new();
        let base = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        for minute in 0..5 {
            store.commit(base + chrono::Duration::minutes(minute), &[("f", b"x")]);
        }
        let head = store.head().unwrap().unwrap();
        let bound = base + chrono::Duration::minutes(2);

        let times: Vec<_> = store
            .ancestors(&head, Some(bound))
            .unwrap()
            .into_iter()
            .map(|r| r.time)
            .collect();
        assert_eq!(
            times,
            vec![
                base + chrono::Duration::minutes(4),
                base + chrono::Duration::minutes(3),
                bound
            ]
        );
    }

    #[test]
    fn unknown_revision_is_an_error() {
        let store = MemoryRevisionStore::new();
        let ghost = Revision {
            id: RevisionId("nope".into()),
            time: Utc::now(),
        };
        assert!(matches!(
            store.file_hash(&ghost, "f"),
            Err(HistoryError::UnknownObject(_))
        ));
    }
}
