//! Per-volume state directory.
//!
//! ```text
//! <data_dir>/<volume>/
//! ├─ LOCK           # held while the node runs
//! ├─ journal.log    # command journal
//! ├─ cursors.json   # relay and peer cursors
//! └─ blobs/         # content-addressed payloads
//! ```

use crate::error::{JournalError, JournalResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "journal.log";
const CURSORS_FILE: &str = "cursors.json";
const BLOBS_DIR: &str = "blobs";

/// Exclusive handle on a volume's state directory.
///
/// Only one process may hold a volume directory at a time. The lock is
/// released when the handle is dropped.
#[derive(Debug)]
pub struct VolumeDir {
    path: PathBuf,
    _lock_file: File,
}

impl VolumeDir {
    /// Opens `data_dir/volume`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Locked`] if another process holds it.
    pub fn open(data_dir: &Path, volume: &str) -> JournalResult<Self> {
        let path = data_dir.join(volume);
        fs::create_dir_all(path.join(BLOBS_DIR))?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(JournalError::Locked {
                path: path.display().to_string(),
            });
        }

        Ok(Self {
            path,
            _lock_file: lock_file,
        })
    }

    /// Root of the volume directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the journal file.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }

    /// Path of the cursor file.
    #[must_use]
    pub fn cursors_path(&self) -> PathBuf {
        self.path.join(CURSORS_FILE)
    }

    /// Directory holding blobs.
    #[must_use]
    pub fn blobs_dir(&self) -> PathBuf {
        self.path.join(BLOBS_DIR)
    }
}

/// Replaces `path` with `data` through a synced temp file and rename.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let temp = path.with_extension("tmp");
    let mut file = File::create(&temp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp, path)?;
    if let Some(parent) = path.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

/// Makes renames and creations inside `path` durable.
#[cfg(unix)]
pub(crate) fn sync_dir(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}

/// NTFS journals metadata, and directories cannot be opened for sync.
#[cfg(not(unix))]
pub(crate) fn sync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}
