//! The serving side of the pull protocol.
//!
//! A relay answers pulls from downstream users out of its local journals.
//! Only committed entries are served, in journal order, and a page never
//! skips past a pending entry: what a peer receives is always a prefix of
//! what this node has applied.
//!
//! An entry that keeps failing to apply therefore holds back everything
//! journaled after it. Its position is published on the status board as
//! `servingBlockedAt`.

use crate::access::{AccessGate, Direction, Identity};
use crate::config::Credential;
use crate::error::{SyncError, SyncResult};
use bytes::Bytes;
use nullfs_journal::{QueryOptions, VolumeState};
use nullfs_protocol::{EntryId, PullRequest, PullResponse, VersionStamp};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Largest page a relay will serve regardless of the requested limit.
pub const MAX_PULL_LIMIT: u32 = 1024;

/// Answers pull and blob requests for the volumes of one node.
#[derive(Debug)]
pub struct RelayService {
    node: String,
    gate: Arc<AccessGate>,
    volumes: HashMap<String, VolumeState>,
}

impl RelayService {
    /// Creates a relay serving `volumes` as node `node`.
    pub fn new(
        node: impl Into<String>,
        gate: Arc<AccessGate>,
        volumes: impl IntoIterator<Item = VolumeState>,
    ) -> Self {
        Self {
            node: node.into(),
            gate,
            volumes: volumes
                .into_iter()
                .map(|state| (state.volume().to_string(), state))
                .collect(),
        }
    }

    /// Name this relay stamps on its cursors.
    pub fn node_name(&self) -> &str {
        &self.node
    }

    /// Names of the served volumes, sorted.
    pub fn volumes(&self) -> Vec<String> {
        let mut names: Vec<_> = self.volumes.keys().cloned().collect();
        names.sort();
        names
    }

    fn admit(&self, credential: &Credential, volume: &str) -> SyncResult<&VolumeState> {
        let identity = self
            .gate
            .authenticate(&credential.name, &credential.password)
            .inspect_err(|_| warn!(user = %credential.name, "rejected pull credential"))?;
        // Authorize first so an unknown volume looks the same as a denied one.
        self.gate.authorize(&identity, volume, Direction::Outgoing)?;
        self.volumes
            .get(volume)
            .ok_or_else(|| SyncError::UnknownVolume(volume.to_string()))
    }

    /// Serves one page of committed entries newer than the request cursor.
    ///
    /// A cursor minted by another node (or none) restarts from the
    /// beginning. The cursor is also recorded as the caller's confirmed
    /// position, which bounds compaction.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AuthFailure`] for bad credentials and
    /// [`SyncError::Denied`] if the user is not in the volume's allow list,
    /// including for a volume this node does not have.
    pub fn pull(&self, credential: &Credential, request: &PullRequest) -> SyncResult<PullResponse> {
        let state = self.admit(credential, &request.volume)?;

        let since = match &request.since {
            Some(cursor) if cursor.origin == self.node => EntryId::new(cursor.counter),
            Some(cursor) => {
                debug!(relay = %self.node, %cursor, "foreign cursor, serving from the start");
                EntryId::default()
            }
            None => EntryId::default(),
        };
        state.cursors.record_peer(&credential.name, since)?;

        let limit = request.limit.clamp(1, MAX_PULL_LIMIT) as usize;
        let mut query = state
            .journal
            .query(QueryOptions::all().since(since).committed_only().limit(limit));
        let entries: Vec<_> = query.by_ref().map(|(_, entry)| entry).collect();
        let position = query.position();
        let has_more = entries.len() == limit
            && !query.blocked_on_pending()
            && position < state.journal.last_id();

        debug!(
            volume = %request.volume,
            user = %credential.name,
            %since,
            served = entries.len(),
            has_more,
            "served pull"
        );
        Ok(PullResponse {
            relay: self.node.clone(),
            entries,
            next_cursor: VersionStamp::new(self.node.clone(), position.as_u64()),
            has_more,
        })
    }

    /// Returns a blob of `volume` to an authorized user.
    ///
    /// # Errors
    ///
    /// Same admission errors as [`RelayService::pull`], plus
    /// [`nullfs_journal::JournalError::BlobNotFound`].
    pub fn blob(&self, credential: &Credential, volume: &str, hash: &str) -> SyncResult<Bytes> {
        let state = self.admit(credential, volume)?;
        Ok(state.blobs.get(hash)?)
    }

    /// Checks a credential and returns who it belongs to.
    pub fn authenticate(&self, credential: &Credential) -> SyncResult<Identity> {
        self.gate
            .authenticate(&credential.name, &credential.password)
    }
}
