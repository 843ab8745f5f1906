//! Durable pull cursors.
//!
//! A volume remembers two kinds of positions:
//!
//! - relay cursors: how far this node has read each relay's journal
//! - peer positions: how far each downstream user has read ours, which
//!   bounds what compaction may drop

use crate::dir::write_atomic;
use crate::error::{JournalError, JournalResult};
use nullfs_protocol::{now_millis, EntryId, VersionStamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where a downstream peer last pulled up to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerPosition {
    /// Last position served to the peer.
    pub position: EntryId,
    /// Milliseconds since the Unix epoch of the last pull.
    pub last_seen: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct CursorFile {
    #[serde(default)]
    relays: BTreeMap<String, VersionStamp>,
    #[serde(default)]
    peers: BTreeMap<String, PeerPosition>,
}

/// Relay cursors and peer positions of one volume.
///
/// Every change is written through to disk before the call returns, so a
/// cursor is never ahead of what was persisted.
#[derive(Debug)]
pub struct CursorStore {
    path: Option<PathBuf>,
    state: Mutex<CursorFile>,
}

impl CursorStore {
    /// Loads cursors from `path`, starting empty if the file is missing.
    pub fn open(path: &Path) -> JournalResult<Self> {
        let state = match std::fs::read(path) {
            Ok(data) => serde_json::from_slice(&data).map_err(|err| {
                JournalError::corrupted(format!(
                    "unreadable cursor file {}: {err}",
                    path.display()
                ))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => CursorFile::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            state: Mutex::new(state),
        })
    }

    /// Creates a store that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(CursorFile::default()),
        }
    }

    /// Cursor for `relay`, or `None` if it was never pulled.
    pub fn relay_cursor(&self, relay: &str) -> Option<VersionStamp> {
        self.state.lock().relays.get(relay).cloned()
    }

    /// Advances the cursor for `relay`.
    pub fn set_relay_cursor(&self, relay: &str, cursor: VersionStamp) -> JournalResult<()> {
        let mut state = self.state.lock();
        if state.relays.get(relay) == Some(&cursor) {
            return Ok(());
        }
        let mut next = state.clone();
        next.relays.insert(relay.to_string(), cursor);
        self.persist(&next)?;
        *state = next;
        Ok(())
    }

    /// Records that `user` has pulled up to `position`.
    ///
    /// Positions never move backwards.
    pub fn record_peer(&self, user: &str, position: EntryId) -> JournalResult<()> {
        let mut state = self.state.lock();
        if state
            .peers
            .get(user)
            .is_some_and(|peer| peer.position >= position)
        {
            return Ok(());
        }
        let mut next = state.clone();
        next.peers.insert(
            user.to_string(),
            PeerPosition {
                position,
                last_seen: now_millis(),
            },
        );
        self.persist(&next)?;
        *state = next;
        debug!(user, %position, "peer position advanced");
        Ok(())
    }

    /// Position last recorded for `user`.
    pub fn peer(&self, user: &str) -> Option<PeerPosition> {
        self.state.lock().peers.get(user).copied()
    }

    /// Highest position every allowed peer has already pulled.
    ///
    /// Returns `None` while any allowed peer has never pulled, and no bound
    /// at all (`u64::MAX`) when the volume has no downstream peers.
    pub fn horizon<'a>(&self, allowed: impl IntoIterator<Item = &'a str>) -> Option<EntryId> {
        let state = self.state.lock();
        let mut horizon = EntryId::new(u64::MAX);
        for user in allowed {
            let peer = state.peers.get(user)?;
            horizon = horizon.min(peer.position);
        }
        Some(horizon)
    }

    fn persist(&self, state: &CursorFile) -> JournalResult<()> {
        if let Some(path) = &self.path {
            let data = serde_json::to_vec_pretty(state).map_err(std::io::Error::from)?;
            write_atomic(path, &data)?;
        }
        Ok(())
    }
}
