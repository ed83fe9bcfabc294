use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use herald_common::internal;

use crate::{
    error::{QueueError, Result},
    types::{MessageId, QueuedMessage},
};

/// An exclusive hold on a snapshot, released when dropped.
///
/// Backed by an advisory lock on a sibling `.lock` file, so it only keeps
/// out other herald processes.
pub struct SnapshotLock {
    _file: fd_lock::RwLock<File>,
}

impl std::fmt::Debug for SnapshotLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotLock").finish_non_exhaustive()
    }
}

/// The on-disk snapshot of a queue: one JSON file holding an array of
/// `[id, record]` pairs.
///
/// Every save rewrites the whole file. The new contents go to a sibling
/// `.tmp` file which is synced and then renamed over the snapshot, so a
/// crash leaves either the old or the new snapshot, never a torn one.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn temp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    fn create_parent(&self) -> io::Result<()> {
        match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => fs::create_dir_all(parent),
            None => Ok(()),
        }
    }

    /// Takes the exclusive lock on this snapshot without waiting.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Locked` if another holder has it and
    /// `QueueError::Io` if the lock file cannot be opened.
    pub fn lock(&self) -> Result<SnapshotLock> {
        self.create_parent()?;

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;

        let mut lock = fd_lock::RwLock::new(file);
        match lock.try_write() {
            // The lock is tied to the descriptor, not the guard.
            Ok(guard) => std::mem::forget(guard),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                return Err(QueueError::Locked(self.path.clone()));
            }
            Err(err) => return Err(err.into()),
        }

        internal!(level = DEBUG, "Locked {}", self.path.display());

        Ok(SnapshotLock { _file: lock })
    }

    /// Reads the snapshot.
    ///
    /// A missing file is an empty queue.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Io` if the file cannot be read and
    /// `QueueError::Serialization` if it is not a valid snapshot.
    pub fn load(&self) -> Result<Vec<(MessageId, QueuedMessage)>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                internal!(
                    level = DEBUG,
                    "No snapshot at {}, starting empty",
                    self.path.display()
                );
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let entries: Vec<(MessageId, QueuedMessage)> = serde_json::from_slice(&data)?;

        internal!(
            level = DEBUG,
            "Loaded {} messages from {}",
            entries.len(),
            self.path.display()
        );

        Ok(entries)
    }

    /// Atomically replaces the snapshot with `entries`.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Serialization` if encoding fails and
    /// `QueueError::Io` if the file cannot be written or renamed.
    pub fn save<'a>(
        &self,
        entries: impl IntoIterator<Item = (&'a MessageId, &'a QueuedMessage)>,
    ) -> Result<()> {
        let entries: Vec<_> = entries.into_iter().collect();
        let data = serde_json::to_vec_pretty(&entries)?;

        self.create_parent()?;

        let temp_path = self.temp_path();
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;

        internal!(
            level = TRACE,
            "Persisted {} messages to {}",
            entries.len(),
            self.path.display()
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("queue.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        fs::write(&path, b"{ not a snapshot").unwrap();

        let store = SnapshotStore::new(&path);
        assert!(matches!(
            store.load(),
            Err(crate::QueueError::Serialization(_))
        ));
    }

    #[test]
    fn test_save_creates_parent_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.json");
        let store = SnapshotStore::new(&path);

        store.save(std::iter::empty()).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
        assert!(!dir.path().join("nested").join("queue.json.tmp").exists());
    }

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let store = SnapshotStore::new(&path);

        let held = store.lock().unwrap();
        assert!(matches!(
            SnapshotStore::new(&path).lock(),
            Err(QueueError::Locked(locked)) if locked == path
        ));

        drop(held);
        assert!(store.lock().is_ok());
    }
}
