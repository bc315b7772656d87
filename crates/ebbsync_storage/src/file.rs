//! File-based store for persistent storage.
//!
//! Layout:
//!
//! ```text
//! <store_dir>/
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ <key>.val         # One file per key
//! └─ <key>.val.tmp     # Temporary file for atomic replacement
//! ```

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, LocalStore};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const VALUE_EXT: &str = "val";
const TEMP_SUFFIX: &str = ".tmp";

/// A directory-backed key/value store.
///
/// Each key is stored in its own file. Writes go to a temporary file which
/// is synced and then renamed over the old value, so a crash leaves either
/// the old or the new value, never a torn one.
///
/// # Thread Safety
///
/// The store holds an exclusive advisory lock on the directory for its
/// lifetime; a second `FileStore` on the same directory fails with
/// [`StorageError::Locked`]. Writes within a process are serialized by an
/// internal mutex.
///
/// # Example
///
/// ```no_run
/// use ebbsync_storage::{FileStore, LocalStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("client_state")).unwrap();
/// store.set("ebbsync_sync_queue", "[]").unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store in the given directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - Another process holds the lock (returns `Locked`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> StorageResult<Self> {
        fs::create_dir_all(path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        // Leftovers from a write interrupted before its rename.
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().ends_with(TEMP_SUFFIX) {
                tracing::debug!(file = ?entry.path(), "removing stale temporary file");
                fs::remove_file(entry.path())?;
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn value_path(&self, key: &str) -> PathBuf {
        self.path.join(format!("{key}.{VALUE_EXT}"))
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        validate_key(key)?;
        match fs::read(self.value_path(key)) {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| StorageError::Corrupted(format!("value for {key} is not UTF-8"))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();

        let target = self.value_path(key);
        let temp = self.path.join(format!("{key}.{VALUE_EXT}{TEMP_SUFFIX}"));

        let mut file = File::create(&temp)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &target)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let _guard = self.write_lock.lock();
        match fs::remove_file(self.value_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let suffix = format!(".{VALUE_EXT}");
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(key) = name.strip_suffix(&suffix) {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}
