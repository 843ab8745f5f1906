//! Per-volume sync state machine.
//!
//! One [`VolumeSync`] drives one volume through
//! `Idle → Scanning → Pulling → Applying → (Compacting) → Idle`
//! every refresh interval. Each relay is its own failure domain: a relay
//! that times out or rejects us only loses its own progress for the cycle.

use crate::access::{AccessGate, Direction, Identity};
use crate::applier::Applier;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::scanner::{ChangeScanner, HashCache, ScanReport};
use crate::status::{ErrorReport, StatusBoard};
use crate::transport::PeerConnector;
use futures::future::join_all;
use nullfs_journal::{CompactionStats, VolumeState};
use nullfs_protocol::{now_millis, EntryId, VersionStamp};
use nullfs_storage::StoreAdapter;
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pages pulled from one relay per cycle before yielding to the applier.
pub const DEFAULT_MAX_PAGES: usize = 64;

/// The phase a volume is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    /// Waiting for the next cycle.
    #[default]
    Idle,
    /// Looking for local changes.
    Scanning,
    /// Fetching entries from relays.
    Pulling,
    /// Writing pending entries into the store.
    Applying,
    /// Rewriting the journal.
    Compacting,
    /// Stopped after a durability failure. Needs operator attention.
    Halted,
}

impl SyncState {
    /// Returns true while a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Scanning | SyncState::Pulling | SyncState::Applying | SyncState::Compacting
        )
    }
}

/// Outcome of one cycle.
///
/// Errors that did not halt the volume are collected here rather than
/// returned, so one failing relay or file does not hide the progress made
/// elsewhere.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Local changes journaled.
    pub scanned: ScanReport,
    /// New entries appended per relay alias.
    pub fetched: BTreeMap<String, usize>,
    /// Entries whose effects reached the store.
    pub applied: usize,
    /// Entries committed without effect.
    pub superseded: usize,
    /// Entries still pending after the cycle.
    pub pending: usize,
    /// Compaction result, if compaction ran.
    pub compaction: Option<CompactionStats>,
    /// Non-fatal failures.
    pub errors: Vec<SyncError>,
}

impl CycleReport {
    /// Returns true if nothing failed.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

struct RelayFetch {
    ids: Vec<EntryId>,
    next_cursor: VersionStamp,
    appended: usize,
}

/// Sync controller of one volume.
pub struct VolumeSync {
    state: VolumeState,
    store: Arc<dyn StoreAdapter>,
    gate: Arc<AccessGate>,
    status: StatusBoard,
    relays: Vec<Arc<dyn PeerConnector>>,
    hashes: HashCache,
    disabled: Mutex<BTreeSet<String>>,
    halted: AtomicBool,
    cycles: AtomicU64,
    inline_threshold: usize,
    compact_every: u64,
    max_pages: usize,
}

impl fmt::Debug for VolumeSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeSync")
            .field("volume", &self.volume())
            .field("store", &self.store.kind())
            .field(
                "relays",
                &self.relays.iter().map(|r| r.relay()).collect::<Vec<_>>(),
            )
            .field("halted", &self.is_halted())
            .finish_non_exhaustive()
    }
}

impl VolumeSync {
    /// Creates a controller with no relays and registers it on `status`.
    pub fn new(
        state: VolumeState,
        store: Arc<dyn StoreAdapter>,
        gate: Arc<AccessGate>,
        status: StatusBoard,
    ) -> Self {
        status.register(state.volume(), Vec::new());
        Self {
            state,
            store,
            gate,
            status,
            relays: Vec::new(),
            hashes: HashCache::new(),
            disabled: Mutex::new(BTreeSet::new()),
            halted: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            inline_threshold: 64 * 1024,
            compact_every: 0,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    /// Adds a relay to pull from.
    #[must_use]
    pub fn with_relay(mut self, relay: Arc<dyn PeerConnector>) -> Self {
        let alias = relay.relay().to_string();
        let cursor = self.state.cursors.relay_cursor(&alias);
        self.status.update(self.state.volume(), |status| {
            let entry = status.relays.entry(alias).or_default();
            entry.cursor = cursor;
        });
        self.relays.push(relay);
        self
    }

    /// Sets the size above which content is stored as a blob.
    #[must_use]
    pub fn with_inline_threshold(mut self, bytes: usize) -> Self {
        self.inline_threshold = bytes;
        self
    }

    /// Compacts every `cycles` cycles. Zero disables compaction.
    #[must_use]
    pub fn with_compact_every(mut self, cycles: u64) -> Self {
        self.compact_every = cycles;
        self
    }

    /// Caps pages pulled from one relay per cycle.
    #[must_use]
    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = pages.max(1);
        self
    }

    /// Name of the volume.
    pub fn volume(&self) -> &str {
        self.state.volume()
    }

    /// Journal, cursors and blobs of the volume.
    pub fn volume_state(&self) -> &VolumeState {
        &self.state
    }

    /// The store holding the volume's files.
    pub fn store(&self) -> &Arc<dyn StoreAdapter> {
        &self.store
    }

    /// Returns true once a durability failure stopped the volume.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Aliases of relays disabled after an authentication failure.
    pub fn disabled_relays(&self) -> Vec<String> {
        self.disabled.lock().iter().cloned().collect()
    }

    /// Completed cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    fn scanner(&self) -> ChangeScanner {
        ChangeScanner::new(
            Arc::clone(&self.store),
            Arc::clone(&self.state.journal),
            Arc::clone(&self.state.blobs),
            self.inline_threshold,
        )
        .with_hash_cache(self.hashes.clone())
    }

    /// The applier for this volume, also used by recovery.
    pub fn applier(&self) -> Applier {
        Applier::new(
            Arc::clone(&self.store),
            Arc::clone(&self.state.journal),
            Arc::clone(&self.state.blobs),
        )
    }

    /// Runs one full cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Halted`] if the volume is, or becomes, halted.
    /// Every other failure is reported in [`CycleReport::errors`].
    pub async fn run_cycle(&self) -> SyncResult<CycleReport> {
        let volume = self.volume().to_string();
        if self.is_halted() {
            return Err(SyncError::Halted(volume));
        }
        let mut report = CycleReport::default();

        self.status.set_state(&volume, SyncState::Scanning);
        match self.scanner().scan().await {
            Ok(scan) => report.scanned = scan,
            Err(err) => self.record(err, &mut report)?,
        }

        self.status.set_state(&volume, SyncState::Pulling);
        let active: Vec<Arc<dyn PeerConnector>> = {
            let disabled = self.disabled.lock();
            self.relays
                .iter()
                .filter(|relay| !disabled.contains(relay.relay()))
                .cloned()
                .collect()
        };
        let outcomes = join_all(active.iter().map(|relay| self.fetch(relay.as_ref()))).await;
        let mut fetched = Vec::new();
        for (relay, outcome) in active.iter().zip(outcomes) {
            let alias = relay.relay().to_string();
            match outcome {
                Ok(fetch) => {
                    report.fetched.insert(alias.clone(), fetch.appended);
                    fetched.push((alias, fetch));
                }
                Err(err) => self.relay_failed(&alias, err, &mut report)?,
            }
        }

        self.status.set_state(&volume, SyncState::Applying);
        match self.applier().apply_pending().await {
            Ok(apply) => {
                report.applied = apply.applied.len();
                report.superseded = apply.superseded.len();
                for failure in apply.failed {
                    self.record(failure.error, &mut report)?;
                }
            }
            Err(err) => self.record(err, &mut report)?,
        }

        for (alias, fetch) in fetched {
            self.advance_cursor(&alias, fetch, &mut report)?;
        }
        let still_pending = self.state.journal.pending();
        report.pending = still_pending.len();
        let blocked_at = still_pending.iter().map(|(id, _)| id.as_u64()).min();

        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        if self.compact_every > 0 && cycle % self.compact_every == 0 {
            self.status.set_state(&volume, SyncState::Compacting);
            match self.compact().await {
                Ok(stats) => report.compaction = stats,
                Err(err) => self.record(err, &mut report)?,
            }
        }

        let clean = report.is_clean();
        let (applied, pending) = (report.applied as u64, report.pending);
        self.status.update(&volume, |status| {
            status.state = SyncState::Idle;
            status.cycles = cycle;
            status.applied += applied;
            status.pending = pending;
            status.serving_blocked_at = blocked_at;
            if clean {
                status.last_success = Some(now_millis());
            }
        });

        let fetched_total: usize = report.fetched.values().sum();
        if report.scanned.total() + fetched_total + report.applied > 0 || !clean {
            info!(
                volume = %volume,
                cycle,
                scanned = report.scanned.total(),
                fetched = fetched_total,
                applied = report.applied,
                superseded = report.superseded,
                pending = report.pending,
                errors = report.errors.len(),
                "sync cycle finished"
            );
        } else {
            debug!(volume = %volume, cycle, "sync cycle idle");
        }
        Ok(report)
    }

    /// Pulls, authorizes and journals one relay's new entries.
    async fn fetch(&self, relay: &dyn PeerConnector) -> SyncResult<RelayFetch> {
        let alias = relay.relay();
        let volume = self.volume();
        let since = self.state.cursors.relay_cursor(alias);
        let page = relay.pull_pages(volume, since, self.max_pages).await?;

        self.gate
            .authorize(&Identity::Relay(alias.to_string()), volume, Direction::Incoming)?;
        if let Some(foreign) = page.entries.iter().find(|entry| entry.volume != volume) {
            return Err(SyncError::Protocol(format!(
                "relay {alias} sent an entry of volume {} for volume {volume}",
                foreign.volume
            )));
        }

        for entry in &page.entries {
            let Some(hash) = entry.payload_or_hash.digest() else {
                continue;
            };
            if self.state.blobs.contains(hash) {
                continue;
            }
            let data = relay.fetch_blob(volume, hash).await?;
            let blobs = Arc::clone(&self.state.blobs);
            let hash = hash.to_string();
            tokio::task::spawn_blocking(move || blobs.put_verified(&hash, data))
                .await
                .map_err(|err| SyncError::Task(err.to_string()))??;
        }

        if page.entries.is_empty() {
            return Ok(RelayFetch {
                ids: Vec::new(),
                next_cursor: page.next_cursor,
                appended: 0,
            });
        }

        let journal = Arc::clone(&self.state.journal);
        let entries = page.entries;
        let appended = tokio::task::spawn_blocking(move || journal.append_remote(entries))
            .await
            .map_err(|err| SyncError::Task(err.to_string()))??;
        debug!(
            volume,
            relay = alias,
            offered = appended.ids.len(),
            appended = appended.appended,
            cursor = %page.next_cursor,
            "journaled relay entries"
        );
        Ok(RelayFetch {
            ids: appended.ids,
            next_cursor: page.next_cursor,
            appended: appended.appended,
        })
    }

    /// Moves the relay cursor once everything it delivered is committed.
    fn advance_cursor(
        &self,
        alias: &str,
        fetch: RelayFetch,
        report: &mut CycleReport,
    ) -> SyncResult<()> {
        let journal = &self.state.journal;
        if let Some(id) = fetch.ids.iter().find(|id| !journal.is_committed(**id)) {
            debug!(volume = %self.volume(), relay = alias, %id, "cursor held back by pending entry");
            return Ok(());
        }
        match self
            .state
            .cursors
            .set_relay_cursor(alias, fetch.next_cursor.clone())
        {
            Ok(()) => {
                self.status.update(self.volume(), |status| {
                    let relay = status.relays.entry(alias.to_string()).or_default();
                    relay.cursor = Some(fetch.next_cursor);
                    relay.last_error = None;
                });
                Ok(())
            }
            Err(err) => self.record(err.into(), report),
        }
    }

    async fn compact(&self) -> SyncResult<Option<CompactionStats>> {
        let users = self.gate.allowed_users(self.volume());
        let Some(horizon) = self
            .state
            .cursors
            .horizon(users.iter().map(String::as_str))
        else {
            debug!(volume = %self.volume(), "compaction waits for every allowed peer to pull");
            return Ok(None);
        };
        let journal = Arc::clone(&self.state.journal);
        let horizon = horizon.min(journal.last_id());
        let stats = tokio::task::spawn_blocking(move || journal.compact(horizon))
            .await
            .map_err(|err| SyncError::Task(err.to_string()))??;
        info!(
            volume = %self.volume(),
            kept = stats.kept,
            dropped = stats.dropped,
            horizon = %stats.horizon,
            "journal compacted"
        );
        Ok(Some(stats))
    }

    /// Records a non-fatal failure, or halts on a durability failure.
    fn record(&self, err: SyncError, report: &mut CycleReport) -> SyncResult<()> {
        if err.is_durability_failure() || self.state.journal.is_poisoned() {
            return Err(self.halt(&err));
        }
        match err.kind() {
            ErrorKind::Auth | ErrorKind::PermissionDenied | ErrorKind::Config => {
                error!(volume = %self.volume(), kind = %err.kind(), error = %err, "sync failure");
            }
            _ => warn!(volume = %self.volume(), kind = %err.kind(), error = %err, "sync failure"),
        }
        let summary = ErrorReport::from(&err);
        self.status.update(self.volume(), |status| {
            status.last_error = Some(summary);
        });
        report.errors.push(err);
        Ok(())
    }

    fn relay_failed(
        &self,
        alias: &str,
        err: SyncError,
        report: &mut CycleReport,
    ) -> SyncResult<()> {
        if err.is_durability_failure() {
            return Err(self.halt(&err));
        }
        let summary = ErrorReport::from(&err);
        let disable = err.kind() == ErrorKind::Auth;
        if disable {
            self.disabled.lock().insert(alias.to_string());
            error!(
                volume = %self.volume(),
                relay = alias,
                error = %err,
                "relay disabled until the configuration changes"
            );
        } else {
            warn!(
                volume = %self.volume(),
                relay = alias,
                kind = %err.kind(),
                error = %err,
                "pull failed, retrying next cycle"
            );
        }
        self.status.update(self.volume(), |status| {
            let relay = status.relays.entry(alias.to_string()).or_default();
            relay.disabled |= disable;
            relay.last_error = Some(summary.clone());
            status.last_error = Some(summary);
        });
        report.errors.push(err);
        Ok(())
    }

    /// Stops the volume after a durability failure.
    pub(crate) fn halt(&self, err: &SyncError) -> SyncError {
        self.halted.store(true, Ordering::SeqCst);
        error!(volume = %self.volume(), error = %err, "journal durability failure, volume halted");
        let summary = ErrorReport::from(err);
        self.status.update(self.volume(), |status| {
            status.halted = true;
            status.state = SyncState::Halted;
            status.last_error = Some(summary);
        });
        SyncError::Halted(self.volume().to_string())
    }

    /// Runs cycles every `refresh` until `cancel` fires or the volume halts.
    ///
    /// The first cycle starts after a random delay of up to one interval so
    /// that volumes sharing a relay do not pull in lockstep. A cycle in
    /// flight when `cancel` fires is abandoned; journal appends already
    /// issued still complete atomically.
    pub async fn run(self: Arc<Self>, refresh: Duration, cancel: CancellationToken) {
        let max_jitter = u64::try_from(refresh.as_millis()).unwrap_or(u64::MAX);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter));
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(jitter) => {}
        }

        let mut ticker = tokio::time::interval(refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(volume = %self.volume(), refresh_secs = refresh.as_secs(), "sync loop started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let outcome = tokio::select! {
                () = cancel.cancelled() => break,
                outcome = self.run_cycle() => outcome,
            };
            if let Err(err) = outcome {
                error!(volume = %self.volume(), error = %err, "sync loop stopped");
                return;
            }
        }
        info!(volume = %self.volume(), "sync loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credential, NodeConfig, VolumeConfig};
    use crate::relay::RelayService;
    use crate::transport::InProcessConnector;
    use bytes::Bytes;
    use nullfs_protocol::{Content, JournalEntry, Operation};
    use nullfs_storage::{MemoryStore, StoreConfig, StorePath};

    struct Pair {
        hub: VolumeState,
        edge: Arc<VolumeSync>,
        edge_store: MemoryStore,
        connector: Arc<InProcessConnector>,
    }

    fn pair(password: &str) -> Pair {
        let hub_config = NodeConfig::new("hub")
            .with_user("edge", "pw")
            .with_volume("docs", VolumeConfig::new(StoreConfig::Memory).allow("edge"));
        let hub_gate = Arc::new(AccessGate::from_config(&hub_config).unwrap());
        let hub = VolumeState::in_memory("docs", "hub");
        let relay = Arc::new(RelayService::new("hub", hub_gate, [hub.clone()]));

        let edge_config = NodeConfig::new("edge")
            .with_relay("up", "http://hub/", Credential::new("edge", password))
            .with_volume("docs", VolumeConfig::new(StoreConfig::Memory).pull_from("up"));
        let edge_gate = Arc::new(AccessGate::from_config(&edge_config).unwrap());
        let edge_store = MemoryStore::new();
        let connector = Arc::new(InProcessConnector::new(
            "up",
            relay,
            Credential::new("edge", password),
        ));
        let edge = VolumeSync::new(
            VolumeState::in_memory("docs", "edge"),
            Arc::new(edge_store.clone()),
            edge_gate,
            StatusBoard::new(),
        )
        .with_relay(connector.clone());

        Pair {
            hub,
            edge: Arc::new(edge),
            edge_store,
            connector,
        }
    }

    #[tokio::test]
    async fn cycle_pulls_applies_and_advances_cursor() {
        let pair = pair("pw");
        pair.hub
            .journal
            .append_local("a.txt", Operation::Create, Content::Inline(Bytes::from_static(b"A")))
            .unwrap();

        let report = pair.edge.run_cycle().await.unwrap();
        assert!(report.is_clean(), "{:?}", report.errors);
        assert_eq!(report.fetched["up"], 1);
        assert_eq!(report.applied, 1);
        assert_eq!(pair.edge_store.contents()["a.txt"], Bytes::from_static(b"A"));
        assert_eq!(
            pair.edge.volume_state().cursors.relay_cursor("up"),
            Some(VersionStamp::new("hub", 1))
        );

        // The applied file is not mistaken for a local change.
        let again = pair.edge.run_cycle().await.unwrap();
        assert_eq!(again.scanned.total(), 0);
        assert_eq!(again.fetched["up"], 0);
    }

    #[tokio::test]
    async fn offline_relay_keeps_cursor_and_recovers() {
        let pair = pair("pw");
        pair.hub
            .journal
            .append_local("a.txt", Operation::Create, Content::Inline(Bytes::from_static(b"A")))
            .unwrap();
        pair.connector.set_offline(true);

        let report = pair.edge.run_cycle().await.unwrap();
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].is_retryable());
        assert!(pair.edge.volume_state().cursors.relay_cursor("up").is_none());
        assert!(pair.edge.disabled_relays().is_empty());

        pair.connector.set_offline(false);
        let report = pair.edge.run_cycle().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(pair.edge_store.len(), 1);
    }

    #[tokio::test]
    async fn auth_failure_disables_relay() {
        let pair = pair("wrong");
        let report = pair.edge.run_cycle().await.unwrap();
        assert_eq!(report.errors[0].kind(), ErrorKind::Auth);
        assert_eq!(pair.edge.disabled_relays(), vec!["up"]);

        let next = pair.edge.run_cycle().await.unwrap();
        assert!(next.is_clean());
        assert!(next.fetched.is_empty());
        let status = pair.edge.status.get("docs").unwrap();
        assert!(status.relays["up"].disabled);
    }

    #[tokio::test]
    async fn denied_local_write_leaves_entry_pending_and_cursor_unmoved() {
        let pair = pair("pw");
        pair.edge_store.deny_writes("private/");
        pair.hub
            .journal
            .append_local(
                "private/key",
                Operation::Create,
                Content::Inline(Bytes::from_static(b"k")),
            )
            .unwrap();

        let report = pair.edge.run_cycle().await.unwrap();
        assert_eq!(report.errors[0].kind(), ErrorKind::PermissionDenied);
        assert_eq!(report.pending, 1);
        assert!(pair.edge.volume_state().cursors.relay_cursor("up").is_none());
        let stuck = pair.edge.volume_state().journal.pending()[0].0;
        let status = pair.edge.status.get("docs").unwrap();
        assert_eq!(status.serving_blocked_at, Some(stuck.as_u64()));

        pair.edge_store.allow_all_writes();
        let report = pair.edge.run_cycle().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.pending, 0);
        assert_eq!(pair.edge.status.get("docs").unwrap().serving_blocked_at, None);
        assert_eq!(
            pair.edge_store
                .get(&StorePath::parse("private/key").unwrap())
                .await
                .unwrap(),
            Bytes::from_static(b"k")
        );
    }

    #[tokio::test]
    async fn denied_winner_is_applied_once_writes_are_allowed() {
        let pair = pair("pw");
        let appended = pair
            .hub
            .journal
            .append_remote(vec![
                JournalEntry::new(
                    "docs",
                    "doc",
                    Operation::Update,
                    Content::Inline(Bytes::from_static(b"X")),
                    VersionStamp::new("NodeA", 5),
                ),
                JournalEntry::new(
                    "docs",
                    "doc",
                    Operation::Update,
                    Content::Inline(Bytes::from_static(b"Y")),
                    VersionStamp::new("NodeB", 5),
                ),
            ])
            .unwrap();
        pair.hub.journal.mark_committed(&appended.ids).unwrap();
        pair.edge_store.deny_writes("doc");

        let first = pair.edge.run_cycle().await.unwrap();
        assert_eq!(first.errors.len(), 1);
        assert_eq!(first.errors[0].kind(), ErrorKind::PermissionDenied);
        assert_eq!(first.pending, 2);

        pair.edge_store.allow_all_writes();
        let second = pair.edge.run_cycle().await.unwrap();
        assert!(second.is_clean(), "{:?}", second.errors);
        assert_eq!(second.scanned.total(), 0);
        assert_eq!(second.pending, 0);
        assert_eq!(pair.edge_store.contents()["doc"], Bytes::from_static(b"Y"));
        let winner = pair.edge.volume_state().journal.winner("doc").unwrap();
        assert_eq!(winner.stamp, VersionStamp::new("NodeB", 5));
    }

    #[test]
    fn active_states() {
        assert!(SyncState::Pulling.is_active());
        assert!(!SyncState::Idle.is_active());
        assert!(!SyncState::Halted.is_active());
    }
}
