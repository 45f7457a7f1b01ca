//! Advisory file lock keeping a single writer per store.
//!
//! The lock lives next to the database as `<database>.lock`, so two
//! ingestion runs against the same file serialise while runs against
//! different files do not interfere.

use crate::error::ErrorCode;
use fs2::FileExt;
use std::{
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Advisory lock failures.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("{}: lock timed out after {waited:?} at {}", ErrorCode::LockContention, path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("{}: {0}", ErrorCode::PersistenceFailed)]
    Io(#[from] io::Error),
}

impl LockError {
    /// Machine-readable code associated with this lock error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Io(_) => ErrorCode::PersistenceFailed,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// Path of the lock file guarding `database`.
#[must_use]
pub fn lock_path_for(database: &Path) -> PathBuf {
    let mut name = database
        .file_name()
        .map_or_else(|| OsString::from("outtrack"), OsString::from);
    name.push(".lock");
    database.with_file_name(name)
}

/// RAII guard for the exclusive writer lock. Released on drop.
#[derive(Debug)]
pub struct IngestLock {
    file: File,
    path: PathBuf,
}

impl IngestLock {
    /// Acquire the writer lock for `database`, polling until `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Timeout`] if another process holds the lock for
    /// longer than `timeout`, or [`LockError::Io`] if the lock file cannot be
    /// created.
    pub fn acquire(database: &Path, timeout: Duration) -> Result<Self, LockError> {
        Self::acquire_at(&lock_path_for(database), timeout)
    }

    fn acquire_at(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let start = Instant::now();
        while FileExt::try_lock_exclusive(&file).is_err() {
            if start.elapsed() >= timeout {
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited: start.elapsed(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }

        tracing::debug!(path = %path.display(), "acquired ingest lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Release explicitly. Dropping the guard has the same effect.
    pub fn release(self) {
        drop(self);
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IngestLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::{IngestLock, LockError, lock_path_for};
    use crate::error::ErrorCode;
    use std::{
        path::Path,
        sync::{Arc, Barrier},
        thread,
        time::Duration,
    };

    #[test]
    fn lock_file_sits_next_to_database() {
        assert_eq!(
            lock_path_for(Path::new("/var/lib/outtrack/outages.db")),
            Path::new("/var/lib/outtrack/outages.db.lock")
        );
        assert_eq!(lock_path_for(Path::new("outages.db")), Path::new("outages.db.lock"));
    }

    #[test]
    fn acquire_and_release() -> Result<(), LockError> {
        let dir = tempfile::tempdir()?;
        let db = dir.path().join("outages.db");
        let lock = IngestLock::acquire(&db, Duration::from_millis(50))?;
        assert_eq!(lock.path(), lock_path_for(&db));
        lock.release();

        let _again = IngestLock::acquire(&db, Duration::from_millis(50))?;
        Ok(())
    }

    #[test]
    fn second_writer_times_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = dir.path().join("outages.db");
        let _held = IngestLock::acquire(&db, Duration::from_millis(50)).expect("first");
        let err = IngestLock::acquire(&db, Duration::from_millis(20)).unwrap_err();

        assert!(matches!(err, LockError::Timeout { .. }));
        assert_eq!(err.code(), ErrorCode::LockContention);
        assert!(err.hint().is_some());
        assert!(err.to_string().starts_with("E5004"));
    }

    #[test]
    fn waiter_gets_lock_after_holder_releases() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = dir.path().join("outages.db");

        let held = Arc::new(Barrier::new(2));
        let done = Arc::new(Barrier::new(2));
        let (held_thread, done_thread) = (Arc::clone(&held), Arc::clone(&done));
        let db_thread = db.clone();
        let handle = thread::spawn(move || {
            let _lock = IngestLock::acquire(&db_thread, Duration::from_millis(200)).expect("hold");
            held_thread.wait();
            done_thread.wait();
        });

        held.wait();
        assert!(matches!(
            IngestLock::acquire(&db, Duration::from_millis(20)),
            Err(LockError::Timeout { .. })
        ));
        done.wait();
        handle.join().expect("join");

        IngestLock::acquire(&db, Duration::from_millis(200)).expect("follow up");
    }
}
