//! Everything a node persists about one volume.

use crate::blob::BlobStore;
use crate::cursor::CursorStore;
use crate::dir::VolumeDir;
use crate::error::JournalResult;
use crate::journal::{JournalOptions, VolumeJournal};
use std::path::Path;
use std::sync::Arc;

/// Journal, cursors and blobs of one volume, opened together.
#[derive(Debug, Clone)]
pub struct VolumeState {
    /// The command journal.
    pub journal: Arc<VolumeJournal>,
    /// Relay cursors and peer positions.
    pub cursors: Arc<CursorStore>,
    /// Payloads stored by hash.
    pub blobs: Arc<BlobStore>,
    _dir: Option<Arc<VolumeDir>>,
}

impl VolumeState {
    /// Opens the state of `volume` under `data_dir`, taking its lock.
    pub fn open(
        data_dir: &Path,
        volume: &str,
        node: &str,
        options: JournalOptions,
    ) -> JournalResult<Self> {
        let dir = VolumeDir::open(data_dir, volume)?;
        let journal = VolumeJournal::open(&dir.journal_path(), volume, node, options)?;
        let cursors = CursorStore::open(&dir.cursors_path())?;
        let blobs = BlobStore::open(dir.blobs_dir())?;
        Ok(Self {
            journal: Arc::new(journal),
            cursors: Arc::new(cursors),
            blobs: Arc::new(blobs),
            _dir: Some(Arc::new(dir)),
        })
    }

    /// Creates empty, non-persistent state.
    pub fn in_memory(volume: &str, node: &str) -> Self {
        Self {
            journal: Arc::new(VolumeJournal::in_memory(volume, node)),
            cursors: Arc::new(CursorStore::in_memory()),
            blobs: Arc::new(BlobStore::in_memory()),
            _dir: None,
        }
    }

    /// Assembles state from already opened parts. Nothing is locked.
    pub fn from_parts(journal: VolumeJournal, cursors: CursorStore, blobs: BlobStore) -> Self {
        Self {
            journal: Arc::new(journal),
            cursors: Arc::new(cursors),
            blobs: Arc::new(blobs),
            _dir: None,
        }
    }

    /// Name of the volume.
    pub fn volume(&self) -> &str {
        self.journal.volume()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use nullfs_protocol::{Content, Operation};
    use tempfile::tempdir;

    #[test]
    fn reopens_all_parts() {
        let dir = tempdir().unwrap();
        let hash;
        {
            let state =
                VolumeState::open(dir.path(), "docs", "n1", JournalOptions::default()).unwrap();
            hash = state.blobs.put(Bytes::from_static(b"large")).unwrap();
            state
                .journal
                .append_local(
                    "big.bin",
                    Operation::Create,
                    Content::Digest {
                        hash: hash.clone(),
                        size: 5,
                    },
                )
                .unwrap();
            state
                .cursors
                .set_relay_cursor("hub", nullfs_protocol::VersionStamp::new("Hub", 3))
                .unwrap();
        }

        let state = VolumeState::open(dir.path(), "docs", "n1", JournalOptions::default()).unwrap();
        assert_eq!(state.volume(), "docs");
        assert_eq!(state.journal.len(), 1);
        assert!(state.blobs.contains(&hash));
        assert!(state.cursors.relay_cursor("hub").is_some());
    }

    #[test]
    fn lock_is_held_while_open() {
        let dir = tempdir().unwrap();
        let _state = VolumeState::open(dir.path(), "docs", "n1", JournalOptions::default()).unwrap();
        assert!(VolumeState::open(dir.path(), "docs", "n1", JournalOptions::default()).is_err());
    }
}
