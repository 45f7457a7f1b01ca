//! Git binding for the revision store, using git2 without spawning `git`.
//!
//! Revision time is the committer time. A remote is cloned bare into a
//! temporary directory that lives as long as the store.

use std::path::Path;

use chrono::{DateTime, Utc};
use git2::{ErrorCode, ObjectType, Oid, Repository, Sort};
use tempfile::TempDir;

use super::{ContentHash, HistoryError, Revision, RevisionId, RevisionStore};

/// A git repository viewed as a snapshot history.
pub struct GitRevisionStore {
    repo: Repository,
    // Dropped after `repo`.
    _clone_dir: Option<TempDir>,
}

impl GitRevisionStore {
    /// Open an existing local clone.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Open`] if `path` is not a git repository.
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        tracing::info!(path = %path.display(), "history using local repository");
        let repo = Repository::open(path).map_err(|source| HistoryError::Open {
            location: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            repo,
            _clone_dir: None,
        })
    }

    /// Clone `url` into a temporary directory owned by the returned store.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created or the
    /// clone fails.
    pub fn clone_remote(url: &str) -> Result<Self, HistoryError> {
        tracing::info!(url, "history cloning remote repository");
        let dir = tempfile::Builder::new().prefix("outtrack-clone-").tempdir()?;
        let repo = git2::build::RepoBuilder::new()
            .bare(true)
            .clone(url, dir.path())
            .map_err(|source| HistoryError::Open {
                location: url.to_string(),
                source,
            })?;
        Ok(Self {
            repo,
            _clone_dir: Some(dir),
        })
    }

    fn revision_of(commit: &git2::Commit<'_>) -> Result<Revision, HistoryError> {
        let id = RevisionId(commit.id().to_string());
        let seconds = commit.committer().when().seconds();
        let time = DateTime::<Utc>::from_timestamp(seconds, 0).ok_or_else(|| {
            HistoryError::Timestamp {
                revision: id.clone(),
                seconds,
            }
        })?;
        Ok(Revision { id, time })
    }

    fn commit_for(&self, revision: &Revision) -> Result<git2::Commit<'_>, HistoryError> {
        let oid = Oid::from_str(&revision.id.0)?;
        Ok(self.repo.find_commit(oid)?)
    }
}

impl RevisionStore for GitRevisionStore {
    fn head(&self) -> Result<Option<Revision>, HistoryError> {
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let commit = head.peel_to_commit()?;
        Self::revision_of(&commit).map(Some)
    }

    fn ancestors(
        &self,
        from: &Revision,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Revision>, HistoryError> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.push(Oid::from_str(&from.id.0)?)?;
        revwalk.set_sorting(Sort::TIME)?;

        let mut revisions = Vec::new();
        for oid in revwalk {
            let commit = self.repo.find_commit(oid?)?;
            let revision = Self::revision_of(&commit)?;
            if until.is_some_and(|until| revision.time < until) {
                break;
            }
            revisions.push(revision);
        }
        Ok(revisions)
    }

    fn file_hash(
        &self,
        revision: &Revision,
        path: &str,
    ) -> Result<Option<ContentHash>, HistoryError> {
        let tree = self.commit_for(revision)?.tree()?;
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if entry.kind() != Some(ObjectType::Blob) {
            return Ok(None);
        }
        Ok(Some(ContentHash(entry.id().to_string())))
    }

    fn read(&self, hash: &ContentHash) -> Result<Vec<u8>, HistoryError> {
        let blob = self.repo.find_blob(Oid::from_str(&hash.0)?)?;
        Ok(blob.content().to_vec())
    }
}
