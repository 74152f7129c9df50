//! Crash-safe file position store
//!
//! Persists the last byte offset read from each tracked file so a restarted
//! tailer resumes where the previous run stopped. One entry file per
//! tracked path lives in the store directory, named by the md5 digest of
//! the absolute tracked path and holding exactly eight bytes: the offset as
//! a big-endian unsigned 64-bit integer.
//!
//! Each entry holds an exclusive advisory lock on its store file for the
//! lifetime of the entry, so two processes never track the same file
//! through the same store. Lock contention is not fatal; the caller simply
//! loses persistence for that file.

use std::collections::HashMap;
use std::fs::{File, OpenOptions, TryLockError};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use md5::{Digest, Md5};
use tracing::{debug, warn};

use crate::error::StoreError;

/// Directory name used by [`default_directory`].
pub const DEFAULT_DIRECTORY_NAME: &str = ".logalike_store";

/// The default store location: `$HOME/.logalike_store`.
pub fn default_directory() -> PathBuf {
    std::env::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_DIRECTORY_NAME)
}

/// Hashes an absolute tracked path into a fixed-width entry file name, so
/// any legal path is representable.
pub fn entry_file_name(tracked: &Path) -> String {
    let absolute = std::path::absolute(tracked).unwrap_or_else(|_| tracked.to_path_buf());
    format!("{:x}", Md5::digest(absolute.to_string_lossy().as_bytes()))
}

/// Stores positions in files under a directory.
pub struct PositionStore {
    directory: PathBuf,
    entries: Mutex<HashMap<PathBuf, StoreEntry>>,
}

impl PositionStore {
    /// Opens a store under [`default_directory`].
    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(default_directory())
    }

    /// Opens a store under the given directory, creating it when missing.
    /// Fails when the path exists but is not a directory.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let directory = directory.into();
        if directory.exists() && !directory.is_dir() {
            return Err(StoreError::Configuration {
                message: format!("store path {} is not a directory", directory.display()),
            });
        }
        std::fs::create_dir_all(&directory).map_err(|source| StoreError::Configuration {
            message: format!(
                "failed to create store directory {}: {source}",
                directory.display()
            ),
        })?;
        debug!(directory = %directory.display(), "position store opened");
        Ok(PositionStore {
            directory,
            entries: Mutex::new(HashMap::new()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Returns the stored offset for the tracked file, or `None` when no
    /// entry exists, the entry is empty, or the identity check failed
    /// (the file was recreated since the entry was opened; the stale entry
    /// is replaced by a fresh one).
    pub fn get(&self, tracked: &Path) -> Option<u64> {
        let mut entries = self.entries.lock().unwrap();

        let identity = entries
            .get_mut(tracked)
            .map(|entry| entry.is_same_file(tracked));

        match identity {
            Some(Ok(true)) => Self::read_position(entries.get_mut(tracked), tracked),
            Some(Ok(false)) => {
                debug!(path = %tracked.display(), "tracked file was recreated, dropping stale entry");
                entries.remove(tracked);
                // The fresh entry captures the new identity and overwrites
                // the stale offset; the caller sees no offset for the new
                // file.
                if let Some(entry) = self.open_entry(&mut entries, tracked) {
                    if let Err(error) = entry.clear() {
                        warn!(%error, path = %tracked.display(), "failed to reset stale entry");
                    }
                }
                None
            }
            Some(Err(error)) => {
                warn!(%error, path = %tracked.display(), "failed to check tracked file identity");
                None
            }
            None => {
                let entry = self.open_entry(&mut entries, tracked);
                Self::read_position(entry, tracked)
            }
        }
    }

    fn read_position(entry: Option<&mut StoreEntry>, tracked: &Path) -> Option<u64> {
        entry.and_then(|entry| {
            entry.position().unwrap_or_else(|error| {
                warn!(%error, path = %tracked.display(), "error when reading store position");
                None
            })
        })
    }

    /// Persists the offset for the tracked file, opening the entry on first
    /// use. Failures are demoted to warnings; the tailer keeps running
    /// without persistence.
    pub fn set(&self, tracked: &Path, offset: u64) {
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(tracked) && self.open_entry(&mut entries, tracked).is_none() {
            return;
        }
        if let Some(entry) = entries.get_mut(tracked) {
            if let Err(error) = entry.set_position(offset) {
                warn!(%error, path = %tracked.display(), "error when setting store position");
            }
        }
    }

    /// Releases all held file locks and handles. The store can be reused;
    /// entries re-open on the next access.
    pub fn close(&self) {
        self.entries.lock().unwrap().clear();
    }

    fn open_entry<'a>(
        &self,
        entries: &'a mut HashMap<PathBuf, StoreEntry>,
        tracked: &Path,
    ) -> Option<&'a mut StoreEntry> {
        match StoreEntry::open(&self.directory, tracked) {
            Ok(entry) => Some(entries.entry(tracked.to_path_buf()).or_insert(entry)),
            Err(StoreError::Busy { path }) => {
                warn!(
                    path = %path.display(),
                    "store entry locked by another process, continuing without persistence"
                );
                None
            }
            Err(error) => {
                warn!(%error, path = %tracked.display(), "failed to open store entry");
                None
            }
        }
    }
}

/// One store file accounting for one tracked file. Holds the open handle,
/// the exclusive lock, and the tracked file's creation time captured when
/// the entry was opened, used to detect rotations that reuse the path.
struct StoreEntry {
    file: File,
    /// `None` when the filesystem does not report creation times; identity
    /// then cannot be checked and entries are trusted.
    created: Option<SystemTime>,
}

impl StoreEntry {
    fn open(directory: &Path, tracked: &Path) -> Result<Self, StoreError> {
        let store_path = directory.join(entry_file_name(tracked));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&store_path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(StoreError::Busy { path: store_path });
            }
            Err(TryLockError::Error(source)) => return Err(source.into()),
        }

        Ok(StoreEntry {
            file,
            created: creation_time(tracked),
        })
    }

    /// Compares the tracked file's current creation time against the one
    /// captured at open. A difference means the path was reused by a new
    /// file.
    fn is_same_file(&self, tracked: &Path) -> std::io::Result<bool> {
        let Some(created) = self.created else {
            return Ok(true);
        };
        let metadata = std::fs::metadata(tracked)?;
        match metadata.created() {
            Ok(current) => Ok(current == created),
            Err(_) => Ok(true),
        }
    }

    fn position(&mut self) -> std::io::Result<Option<u64>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buffer = [0u8; 8];
        let mut filled = 0;
        while filled < buffer.len() {
            let read = self.file.read(&mut buffer[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        if filled < buffer.len() {
            Ok(None)
        } else {
            Ok(Some(u64::from_be_bytes(buffer)))
        }
    }

    fn set_position(&mut self, offset: u64) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&offset.to_be_bytes())?;
        self.file.sync_data()
    }

    fn clear(&mut self) -> std::io::Result<()> {
        self.file.set_len(0)?;
        self.file.sync_data()
    }
}

impl Drop for StoreEntry {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn creation_time(tracked: &Path) -> Option<SystemTime> {
    std::fs::metadata(tracked)
        .and_then(|metadata| metadata.created())
        .ok()
}
