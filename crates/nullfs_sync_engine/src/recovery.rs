//! Startup recovery.
//!
//! A crash between journaling a fetched entry and applying it leaves the
//! entry pending. Recovery runs the apply phase for every volume before
//! any sync loop starts; applying an entry that already reached the store,
//! or that loses to a newer write, changes nothing.

use crate::state::VolumeSync;
use std::sync::Arc;
use tracing::{info, warn};

/// What recovery did for one volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeRecovery {
    /// Volume name.
    pub volume: String,
    /// Bytes of a torn final record discarded when the journal was opened.
    pub torn_bytes: u64,
    /// Pending entries found at startup.
    pub found_pending: usize,
    /// Entries committed by recovery.
    pub reapplied: usize,
    /// Entries still pending afterwards.
    pub still_pending: usize,
    /// Why recovery failed, if it did.
    pub error: Option<String>,
    /// Whether a journal durability failure halted the volume.
    pub halted: bool,
}

/// Result of recovering every volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Per-volume results, in volume order.
    pub volumes: Vec<VolumeRecovery>,
}

impl RecoveryReport {
    /// Returns true if a volume was halted during recovery.
    pub fn any_halted(&self) -> bool {
        self.volumes.iter().any(|v| v.halted)
    }

    /// Returns true if every pending entry was applied.
    pub fn is_complete(&self) -> bool {
        self.volumes
            .iter()
            .all(|v| v.error.is_none() && v.still_pending == 0)
    }
}

/// Re-applies pending entries of a set of volumes.
#[derive(Debug, Default)]
pub struct RecoveryManager {
    volumes: Vec<Arc<VolumeSync>>,
}

impl RecoveryManager {
    /// Creates a manager over `volumes`.
    pub fn new(volumes: impl IntoIterator<Item = Arc<VolumeSync>>) -> Self {
        Self {
            volumes: volumes.into_iter().collect(),
        }
    }

    /// Runs the apply phase for every volume.
    ///
    /// A failing volume is reported and does not stop the others.
    pub async fn recover(&self) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        for sync in &self.volumes {
            let journal = &sync.volume_state().journal;
            let mut volume = VolumeRecovery {
                volume: sync.volume().to_string(),
                torn_bytes: journal.discarded_tail_bytes(),
                found_pending: journal.pending().len(),
                ..VolumeRecovery::default()
            };
            if volume.torn_bytes > 0 {
                warn!(volume = %volume.volume, bytes = volume.torn_bytes, "discarded torn journal tail");
            }

            if volume.found_pending > 0 {
                match sync.applier().apply_pending().await {
                    Ok(apply) => {
                        volume.reapplied = apply.committed().count();
                        for failure in &apply.failed {
                            warn!(volume = %volume.volume, id = %failure.id, error = %failure.error, "entry still pending after recovery");
                        }
                    }
                    Err(err) => {
                        volume.error = Some(err.to_string());
                        if err.is_durability_failure() || journal.is_poisoned() {
                            sync.halt(&err);
                            volume.halted = true;
                        } else {
                            warn!(volume = %volume.volume, error = %err, "recovery failed");
                        }
                    }
                }
            }
            volume.still_pending = journal.pending().len();

            info!(
                volume = %volume.volume,
                found = volume.found_pending,
                reapplied = volume.reapplied,
                still_pending = volume.still_pending,
                "recovery finished"
            );
            report.volumes.push(volume);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessGate;
    use crate::config::NodeConfig;
    use crate::error::SyncError;
    use crate::status::StatusBoard;
    use bytes::Bytes;
    use nullfs_journal::{BlobStore, CursorStore, JournalOptions, VolumeJournal, VolumeState};
    use nullfs_protocol::{Content, JournalEntry, Operation, VersionStamp};
    use nullfs_storage::{MemoryLog, MemoryStore};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn applies_leftover_pending_entries() {
        let state = VolumeState::in_memory("docs", "NodeB");
        state
            .journal
            .append_remote(vec![JournalEntry::new(
                "docs",
                "a.txt",
                Operation::Update,
                Content::Inline(Bytes::from_static(b"from A")),
                VersionStamp::new("NodeA", 7),
            )])
            .unwrap();
        let store = MemoryStore::new();
        let gate = Arc::new(AccessGate::from_config(&NodeConfig::new("NodeB")).unwrap());
        let sync = Arc::new(VolumeSync::new(
            state,
            Arc::new(store.clone()),
            gate,
            StatusBoard::new(),
        ));

        let manager = RecoveryManager::new([Arc::clone(&sync)]);
        let report = manager.recover().await;
        assert!(report.is_complete());
        assert_eq!(report.volumes[0].found_pending, 1);
        assert_eq!(report.volumes[0].reapplied, 1);
        assert_eq!(store.contents()["a.txt"], Bytes::from_static(b"from A"));

        // A second run finds nothing to do.
        let again = manager.recover().await;
        assert_eq!(again.volumes[0].found_pending, 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn commit_failure_during_recovery_halts_the_volume() {
        let log = MemoryLog::new();
        let switch = log.failure_switch();
        let journal =
            VolumeJournal::with_backend(Box::new(log), "docs", "NodeB", JournalOptions::default())
                .unwrap();
        journal
            .append_remote(vec![JournalEntry::new(
                "docs",
                "a.txt",
                Operation::Update,
                Content::Inline(Bytes::from_static(b"from A")),
                VersionStamp::new("NodeA", 7),
            )])
            .unwrap();
        let state = VolumeState::from_parts(journal, CursorStore::in_memory(), BlobStore::in_memory());
        let store = MemoryStore::new();
        let gate = Arc::new(AccessGate::from_config(&NodeConfig::new("NodeB")).unwrap());
        let sync = Arc::new(VolumeSync::new(
            state,
            Arc::new(store.clone()),
            gate,
            StatusBoard::new(),
        ));

        switch.store(true, Ordering::SeqCst);
        let report = RecoveryManager::new([Arc::clone(&sync)]).recover().await;
        assert!(report.any_halted());
        assert!(!report.is_complete());
        assert_eq!(report.volumes[0].still_pending, 1);
        assert!(sync.is_halted());

        // The loop refuses to scan the applied-but-pending file as a local write.
        switch.store(false, Ordering::SeqCst);
        assert!(matches!(sync.run_cycle().await, Err(SyncError::Halted(_))));
        assert_eq!(sync.volume_state().journal.len(), 1);
    }
}
