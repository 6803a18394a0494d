//! File-based slot backend for persistent storage.
//!
//! Layout of a storage directory:
//!
//! ```text
//! <path>/
//! ├─ LOCK                  # Advisory lock for single-writer
//! ├─ <entity>.state        # Primary record per entity
//! └─ <entity>.emergency    # Emergency backup, only after a failed primary write
//! ```

use crate::backend::{validate_slot_key, SlotBackend};
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const TEMP_SUFFIX: &str = ".tmp";

/// A directory-backed slot store.
///
/// Every slot is a file in the directory. Writes use the write-then-rename
/// pattern so that a crash leaves either the old or the new record:
///
/// 1. Write to `<key>.tmp`
/// 2. `sync_all` the temporary file
/// 3. Rename over `<key>`
/// 4. Fsync the directory so the rename itself is durable
///
/// # Thread Safety
///
/// Writes are serialized through an internal lock. The directory is also
/// protected by an exclusive advisory lock, so only one process can open it.
///
/// # Example
///
/// ```no_run
/// use holdfast_storage::{FileBackend, SlotBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("state")).unwrap();
/// backend.write_slot("player-1.state", b"record").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    write_lock: Mutex<()>,
    _lock_file: File,
}

impl FileBackend {
    /// Opens or creates a storage directory.
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The path exists but is not a directory
    /// - Another process holds the lock (returns [`StorageError::Locked`])
    /// - I/O errors occur
    pub fn open(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(StorageError::InvalidLocation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn slot_path(&self, key: &str) -> PathBuf {
        self.path.join(key)
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        let dir = File::open(&self.path)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced.
        Ok(())
    }
}

impl SlotBackend for FileBackend {
    fn read_slot(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_slot_key(key)?;

        match fs::read(self.slot_path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_slot(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_slot_key(key)?;
        let _guard = self.write_lock.lock();

        let target = self.slot_path(key);
        let temp = self.path.join(format!("{key}{TEMP_SUFFIX}"));

        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        if let Err(e) = fs::rename(&temp, &target) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        self.sync_directory()?;
        tracing::trace!(slot = key, bytes = data.len(), "slot written");
        Ok(())
    }

    fn remove_slot(&self, key: &str) -> StorageResult<bool> {
        validate_slot_key(key)?;
        let _guard = self.write_lock.lock();

        match fs::remove_file(self.slot_path(key)) {
            Ok(()) => {
                self.sync_directory()?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list_slots(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name == LOCK_FILE || name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            if validate_slot_key(&name).is_ok() {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
