//! Operator-visible sync status.
//!
//! Every volume loop publishes its state here after each phase; the HTTP
//! server exposes a snapshot as JSON.

use crate::error::{ErrorKind, SyncError};
use crate::state::SyncState;
use nullfs_protocol::{now_millis, VersionStamp};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A failure as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    /// Classification.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Milliseconds since the Unix epoch.
    pub at: u64,
}

impl From<&SyncError> for ErrorReport {
    fn from(err: &SyncError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            at: now_millis(),
        }
    }
}

/// Status of one relay of one volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatus {
    /// Cursor held for the relay.
    pub cursor: Option<VersionStamp>,
    /// True once the relay was disabled after an auth failure.
    pub disabled: bool,
    /// Most recent failure, cleared by a successful pull.
    pub last_error: Option<ErrorReport>,
}

/// Status of one volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStatus {
    /// Volume name.
    pub volume: String,
    /// Current phase.
    pub state: SyncState,
    /// Milliseconds since the Unix epoch of the last cycle without errors.
    pub last_success: Option<u64>,
    /// Most recent failure of any phase.
    pub last_error: Option<ErrorReport>,
    /// True once the volume stopped committing.
    pub halted: bool,
    /// Completed cycles.
    pub cycles: u64,
    /// Entries applied since startup.
    pub applied: u64,
    /// Entries still pending after the last cycle.
    pub pending: usize,
    /// Journal position of the oldest pending entry. Downstream peers are
    /// served nothing past it until it applies.
    pub serving_blocked_at: Option<u64>,
    /// Per-relay status by alias.
    pub relays: BTreeMap<String, RelayStatus>,
}

/// Shared table of volume statuses.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<BTreeMap<String, VolumeStatus>>>,
}

impl StatusBoard {
    /// Creates an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a volume in the idle state.
    pub fn register(&self, volume: &str, relays: impl IntoIterator<Item = String>) {
        let status = VolumeStatus {
            volume: volume.to_string(),
            relays: relays
                .into_iter()
                .map(|alias| (alias, RelayStatus::default()))
                .collect(),
            ..VolumeStatus::default()
        };
        self.inner.write().insert(volume.to_string(), status);
    }

    /// Mutates the status of `volume` in place. Unknown volumes are ignored.
    pub fn update(&self, volume: &str, f: impl FnOnce(&mut VolumeStatus)) {
        if let Some(status) = self.inner.write().get_mut(volume) {
            f(status);
        }
    }

    /// Sets the phase of `volume`.
    pub fn set_state(&self, volume: &str, state: SyncState) {
        self.update(volume, |status| {
            if !status.halted {
                status.state = state;
            }
        });
    }

    /// Status of one volume.
    pub fn get(&self, volume: &str) -> Option<VolumeStatus> {
        self.inner.read().get(volume).cloned()
    }

    /// Status of every volume, by name.
    pub fn snapshot(&self) -> Vec<VolumeStatus> {
        self.inner.read().values().cloned().collect()
    }
}
