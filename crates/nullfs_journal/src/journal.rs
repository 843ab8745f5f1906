//! The per-volume command journal.

use crate::dir::sync_dir;
use crate::error::{JournalError, JournalResult};
use crate::query::{JournalQuery, QueryOptions};
use crate::reader::{Frame, RecordReader};
use crate::record::JournalRecord;
use nullfs_protocol::{
    ApplyState, Content, EffectKind, EntryId, JournalEntry, Operation, VersionStamp,
};
use nullfs_storage::{FileLog, LogBackend, MemoryLog, StoreResult};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// Journal tuning knobs.
#[derive(Debug, Clone)]
pub struct JournalOptions {
    /// Fsync after every append and commit. Disable only for tests.
    pub sync_on_write: bool,
}

impl Default for JournalOptions {
    fn default() -> Self {
        Self {
            sync_on_write: true,
        }
    }
}

/// The committed entry that currently owns a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Winner {
    /// Local position of the winning entry.
    pub id: EntryId,
    /// Its stamp.
    pub stamp: VersionStamp,
    /// Whether the path holds content or is deleted.
    pub kind: EffectKind,
    /// The content written, or [`Content::None`] for a tombstone.
    pub content: Content,
}

/// Result of [`VolumeJournal::append_remote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAppend {
    /// Position of every offered entry, in order. Duplicates map to the
    /// position of the copy already held.
    pub ids: Vec<EntryId>,
    /// How many entries were new.
    pub appended: usize,
}

/// Result of [`VolumeJournal::compact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Entries retained.
    pub kept: usize,
    /// Entries dropped.
    pub dropped: usize,
    /// Horizon now recorded in the journal.
    pub horizon: EntryId,
}

#[derive(Debug)]
enum LogLocation {
    File(PathBuf),
    Memory,
}

impl LogLocation {
    /// Replaces the log with `bytes` and returns the new backend.
    fn rewrite(&self, bytes: &[u8]) -> JournalResult<Box<dyn LogBackend>> {
        match self {
            LogLocation::File(path) => {
                let temp = path.with_extension("log.compact");
                {
                    let mut file = File::create(&temp)?;
                    file.write_all(bytes)?;
                    file.sync_all()?;
                }
                std::fs::rename(&temp, path)?;
                if let Some(parent) = path.parent() {
                    sync_dir(parent)?;
                }
                Ok(Box::new(FileLog::open(path)?))
            }
            LogLocation::Memory => Ok(Box::new(MemoryLog::with_data(bytes.to_vec()))),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Index {
    pub(crate) entries: BTreeMap<EntryId, JournalEntry>,
    by_stamp: HashMap<VersionStamp, EntryId>,
    pending: BTreeSet<EntryId>,
    winners: HashMap<String, Winner>,
    pub(crate) next_id: EntryId,
    clock: u64,
    horizon: EntryId,
}

impl Index {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            by_stamp: HashMap::new(),
            pending: BTreeSet::new(),
            winners: HashMap::new(),
            next_id: EntryId::new(1),
            clock: 0,
            horizon: EntryId::default(),
        }
    }

    fn insert(&mut self, id: EntryId, entry: JournalEntry) {
        self.by_stamp.insert(entry.stamp(), id);
        self.clock = self.clock.max(entry.counter);
        self.next_id = self.next_id.max(id.next());
        if entry.is_committed() {
            self.promote(id, &entry);
        } else {
            self.pending.insert(id);
        }
        self.entries.insert(id, entry);
    }

    /// Transitions `id` to committed. Returns false if it already was.
    fn commit(&mut self, id: EntryId) -> JournalResult<bool> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(JournalError::UnknownEntry(id))?;
        if entry.is_committed() {
            return Ok(false);
        }
        entry.apply_state = ApplyState::Committed;
        let entry = entry.clone();
        self.pending.remove(&id);
        self.promote(id, &entry);
        Ok(true)
    }

    fn promote(&mut self, id: EntryId, entry: &JournalEntry) {
        let stamp = entry.stamp();
        for effect in entry.effects() {
            if let Some(current) = self.winners.get(effect.path) {
                if !stamp.beats(&current.stamp) {
                    continue;
                }
            }
            let content = match effect.kind {
                EffectKind::Write => entry.payload_or_hash.clone(),
                EffectKind::Remove => Content::None,
            };
            self.winners.insert(
                effect.path.to_string(),
                Winner {
                    id,
                    stamp: stamp.clone(),
                    kind: effect.kind,
                    content,
                },
            );
        }
    }

    fn is_winner_somewhere(&self, id: EntryId, entry: &JournalEntry) -> bool {
        entry
            .effects()
            .iter()
            .any(|effect| self.winners.get(effect.path).is_some_and(|w| w.id == id))
    }

    fn replay(&mut self, volume: &str, record: JournalRecord) -> JournalResult<()> {
        match record {
            JournalRecord::Entry { id, entry } => {
                // A horizon record may already have raised `next_id`, so
                // only the order among entries is checked.
                if let Some((last, _)) = self.entries.last_key_value() {
                    if id <= *last {
                        return Err(JournalError::corrupted(format!(
                            "entry {id} out of order after {last}"
                        )));
                    }
                }
                if entry.volume != volume {
                    return Err(JournalError::corrupted(format!(
                        "entry {id} belongs to volume {:?}",
                        entry.volume
                    )));
                }
                self.insert(id, entry);
            }
            JournalRecord::Commit { ids } => {
                for id in ids {
                    self.commit(id).map_err(|_| {
                        JournalError::corrupted(format!("commit of unknown entry {id}"))
                    })?;
                }
            }
            JournalRecord::Horizon {
                horizon,
                next_id,
                clock,
            } => {
                self.horizon = self.horizon.max(horizon);
                self.next_id = self.next_id.max(next_id);
                self.clock = self.clock.max(clock);
            }
        }
        Ok(())
    }
}

/// Durable, append-only log of one volume's mutations.
///
/// # Concurrency
///
/// Appends, commits and compaction are serialized by a writer lock, which
/// keeps positions and counters strictly increasing. Readers only take the
/// index lock and observe every append that returned before they started.
///
/// # Durability
///
/// An append returns only after its records are synced. If a write fails
/// the log is truncated back to its previous size; if even that fails the
/// journal is poisoned and refuses every further write.
pub struct VolumeJournal {
    volume: String,
    node: String,
    location: LogLocation,
    options: JournalOptions,
    writer: Mutex<Box<dyn LogBackend>>,
    pub(crate) index: RwLock<Index>,
    poisoned: AtomicBool,
    discarded_tail: u64,
}

impl std::fmt::Debug for VolumeJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeJournal")
            .field("volume", &self.volume)
            .field("node", &self.node)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl VolumeJournal {
    /// Opens (or creates) the journal file at `path`.
    ///
    /// A torn trailing record is discarded and the file truncated to the
    /// last valid record.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Corrupted`] if a record before the tail is
    /// damaged.
    pub fn open(
        path: &Path,
        volume: impl Into<String>,
        node: impl Into<String>,
        options: JournalOptions,
    ) -> JournalResult<Self> {
        let backend = Box::new(FileLog::open(path)?);
        Self::load(
            backend,
            LogLocation::File(path.to_path_buf()),
            volume.into(),
            node.into(),
            options,
        )
    }

    /// Creates an empty journal held in memory.
    pub fn in_memory(volume: impl Into<String>, node: impl Into<String>) -> Self {
        Self {
            volume: volume.into(),
            node: node.into(),
            location: LogLocation::Memory,
            options: JournalOptions::default(),
            writer: Mutex::new(Box::new(MemoryLog::new())),
            index: RwLock::new(Index::new()),
            poisoned: AtomicBool::new(false),
            discarded_tail: 0,
        }
    }

    /// Loads a journal from an arbitrary backend.
    ///
    /// Compaction of such a journal continues in memory.
    pub fn with_backend(
        backend: Box<dyn LogBackend>,
        volume: impl Into<String>,
        node: impl Into<String>,
        options: JournalOptions,
    ) -> JournalResult<Self> {
        Self::load(
            backend,
            LogLocation::Memory,
            volume.into(),
            node.into(),
            options,
        )
    }

    fn load(
        mut backend: Box<dyn LogBackend>,
        location: LogLocation,
        volume: String,
        node: String,
        options: JournalOptions,
    ) -> JournalResult<Self> {
        let mut index = Index::new();
        let torn_at = {
            let mut reader = RecordReader::new(backend.as_ref())?;
            let mut torn_at = None;
            while let Some(frame) = reader.next_frame()? {
                match frame {
                    Frame::Record { record, .. } => index.replay(&volume, record)?,
                    Frame::Torn { offset } => torn_at = Some(offset),
                }
            }
            torn_at
        };

        let mut discarded_tail = 0;
        if let Some(offset) = torn_at {
            let size = backend.size()?;
            discarded_tail = size - offset;
            warn!(
                volume = %volume,
                offset,
                bytes = discarded_tail,
                "discarding torn journal tail"
            );
            backend.truncate(offset)?;
        }

        info!(
            volume = %volume,
            entries = index.entries.len(),
            pending = index.pending.len(),
            "journal opened"
        );

        Ok(Self {
            volume,
            node,
            location,
            options,
            writer: Mutex::new(backend),
            index: RwLock::new(index),
            poisoned: AtomicBool::new(false),
            discarded_tail,
        })
    }

    /// Volume this journal belongs to.
    pub fn volume(&self) -> &str {
        &self.volume
    }

    /// Name stamped on locally originated entries.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Bytes of torn tail discarded when the journal was opened.
    pub fn discarded_tail_bytes(&self) -> u64 {
        self.discarded_tail
    }

    /// Returns true after an unrecoverable write failure.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.index.read().entries.len()
    }

    /// Returns true if the journal holds no entries.
    pub fn is_empty(&self) -> bool {
        self.index.read().entries.is_empty()
    }

    /// Position of the most recently appended entry.
    pub fn last_id(&self) -> EntryId {
        EntryId::new(self.index.read().next_id.as_u64() - 1)
    }

    /// Highest counter observed from any origin.
    pub fn clock(&self) -> u64 {
        self.index.read().clock
    }

    /// Horizon of the last compaction.
    pub fn horizon(&self) -> EntryId {
        self.index.read().horizon
    }

    /// Appends an entry for a change already present in the local store.
    ///
    /// The entry is stamped with this node and a counter one above every
    /// counter seen so far, and is committed on append.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::WriteFailure`] if the record could not be
    /// persisted, in which case the entry is not visible.
    pub fn append_local(
        &self,
        path: impl Into<String>,
        op: Operation,
        content: Content,
    ) -> JournalResult<(EntryId, JournalEntry)> {
        let mut writer = self.writer.lock();
        let (id, counter) = {
            let index = self.index.read();
            (index.next_id, index.clock + 1)
        };

        let entry = JournalEntry::new(
            self.volume.clone(),
            path,
            op,
            content,
            VersionStamp::new(self.node.clone(), counter),
        )
        .with_state(ApplyState::Committed);
        entry.validate()?;

        let record = JournalRecord::Entry {
            id,
            entry: entry.clone(),
        };
        self.write(&mut writer, &[record])?;
        self.index.write().insert(id, entry.clone());

        debug!(volume = %self.volume, %id, stamp = %entry.stamp(), path = %entry.path, "appended local entry");
        Ok((id, entry))
    }

    /// Appends entries fetched from a relay as pending.
    ///
    /// Entries whose stamp is already held are not appended again. All new
    /// records are written and synced together.
    ///
    /// # Errors
    ///
    /// Rejects the whole batch if an entry belongs to another volume or is
    /// malformed. Returns [`JournalError::WriteFailure`] if the batch could
    /// not be persisted.
    pub fn append_remote(&self, entries: Vec<JournalEntry>) -> JournalResult<RemoteAppend> {
        let mut writer = self.writer.lock();
        let mut ids = Vec::with_capacity(entries.len());
        let mut records = Vec::new();
        {
            let index = self.index.read();
            let mut next = index.next_id;
            let mut batch: HashMap<VersionStamp, EntryId> = HashMap::new();
            for entry in entries {
                if entry.volume != self.volume {
                    return Err(JournalError::VolumeMismatch {
                        expected: self.volume.clone(),
                        found: entry.volume,
                    });
                }
                entry.validate()?;

                let stamp = entry.stamp();
                if let Some(id) = index.by_stamp.get(&stamp).or(batch.get(&stamp)) {
                    ids.push(*id);
                    continue;
                }
                let id = next;
                next = next.next();
                batch.insert(stamp, id);
                ids.push(id);
                records.push(JournalRecord::Entry {
                    id,
                    entry: entry.with_state(ApplyState::Pending),
                });
            }
        }

        let appended = records.len();
        if appended > 0 {
            self.write(&mut writer, &records)?;
            let mut index = self.index.write();
            for record in records {
                if let JournalRecord::Entry { id, entry } = record {
                    index.insert(id, entry);
                }
            }
            debug!(volume = %self.volume, appended, "appended remote entries");
        }

        Ok(RemoteAppend { ids, appended })
    }

    /// Marks pending entries as applied.
    ///
    /// Already committed ids are skipped. Returns how many changed state.
    pub fn mark_committed(&self, ids: &[EntryId]) -> JournalResult<usize> {
        let mut writer = self.writer.lock();
        let to_commit: Vec<EntryId> = {
            let index = self.index.read();
            let mut seen = BTreeSet::new();
            for id in ids {
                let entry = index
                    .entries
                    .get(id)
                    .ok_or(JournalError::UnknownEntry(*id))?;
                if !entry.is_committed() {
                    seen.insert(*id);
                }
            }
            seen.into_iter().collect()
        };
        if to_commit.is_empty() {
            return Ok(0);
        }

        self.write(
            &mut writer,
            &[JournalRecord::Commit {
                ids: to_commit.clone(),
            }],
        )?;

        let mut index = self.index.write();
        for id in &to_commit {
            index.commit(*id)?;
        }
        Ok(to_commit.len())
    }

    /// Returns the entry at `id`.
    pub fn get(&self, id: EntryId) -> Option<JournalEntry> {
        self.index.read().entries.get(&id).cloned()
    }

    /// Returns true if `id` exists and is committed.
    pub fn is_committed(&self, id: EntryId) -> bool {
        self.index
            .read()
            .entries
            .get(&id)
            .is_some_and(JournalEntry::is_committed)
    }

    /// Returns the position of the entry carrying `stamp`.
    pub fn find(&self, stamp: &VersionStamp) -> Option<EntryId> {
        self.index.read().by_stamp.get(stamp).copied()
    }

    /// All pending entries in position order.
    pub fn pending(&self) -> Vec<(EntryId, JournalEntry)> {
        let index = self.index.read();
        index
            .pending
            .iter()
            .filter_map(|id| index.entries.get(id).map(|e| (*id, e.clone())))
            .collect()
    }

    /// The committed winner for `path`.
    pub fn winner(&self, path: &str) -> Option<Winner> {
        self.index.read().winners.get(path).cloned()
    }

    /// Snapshot of every path's committed winner.
    pub fn winners(&self) -> BTreeMap<String, Winner> {
        self.index
            .read()
            .winners
            .iter()
            .map(|(path, winner)| (path.clone(), winner.clone()))
            .collect()
    }

    /// Starts a lazy query over the journal as of now.
    pub fn query(&self, options: QueryOptions) -> JournalQuery<'_> {
        let end = self.index.read().next_id;
        JournalQuery::new(self, options, end)
    }

    /// Drops committed entries at or below `horizon` that no longer win
    /// any path.
    ///
    /// Pending entries, entries above the horizon and current winners
    /// (tombstones included) are always kept. Positions are preserved.
    pub fn compact(&self, horizon: EntryId) -> JournalResult<CompactionStats> {
        let mut writer = self.writer.lock();
        self.check_writable()?;

        let (kept, dropped, header) = {
            let index = self.index.read();
            let mut kept = Vec::new();
            let mut dropped = Vec::new();
            for (id, entry) in &index.entries {
                let keep = !entry.is_committed()
                    || *id > horizon
                    || index.is_winner_somewhere(*id, entry);
                if keep {
                    kept.push(JournalRecord::Entry {
                        id: *id,
                        entry: entry.clone(),
                    });
                } else {
                    dropped.push(*id);
                }
            }
            let header = JournalRecord::Horizon {
                horizon: index.horizon.max(horizon),
                next_id: index.next_id,
                clock: index.clock,
            };
            (kept, dropped, header)
        };

        let new_horizon = match &header {
            JournalRecord::Horizon { horizon, .. } => *horizon,
            _ => horizon,
        };
        if dropped.is_empty() {
            return Ok(CompactionStats {
                kept: kept.len(),
                dropped: 0,
                horizon: self.horizon(),
            });
        }

        let mut bytes = header.encode_frame()?;
        for record in &kept {
            bytes.extend_from_slice(&record.encode_frame()?);
        }

        match self.location.rewrite(&bytes) {
            Ok(backend) => *writer = backend,
            Err(err) => {
                // The old file may already be replaced on disk.
                if matches!(self.location, LogLocation::File(_)) {
                    self.poison(&err.to_string());
                }
                return Err(err);
            }
        }

        let mut index = self.index.write();
        for id in &dropped {
            if let Some(entry) = index.entries.remove(id) {
                index.by_stamp.remove(&entry.stamp());
            }
        }
        index.horizon = new_horizon;

        info!(
            volume = %self.volume,
            kept = kept.len(),
            dropped = dropped.len(),
            horizon = %new_horizon,
            "journal compacted"
        );
        Ok(CompactionStats {
            kept: kept.len(),
            dropped: dropped.len(),
            horizon: new_horizon,
        })
    }

    fn check_writable(&self) -> JournalResult<()> {
        if self.is_poisoned() {
            return Err(JournalError::Poisoned);
        }
        Ok(())
    }

    fn poison(&self, reason: &str) {
        self.poisoned.store(true, Ordering::SeqCst);
        error!(volume = %self.volume, reason, "journal poisoned");
    }

    fn write(
        &self,
        backend: &mut Box<dyn LogBackend>,
        records: &[JournalRecord],
    ) -> JournalResult<()> {
        self.check_writable()?;

        let mut buf = Vec::new();
        for record in records {
            buf.extend_from_slice(&record.encode_frame()?);
        }

        let start = backend.size()?;
        if let Err(err) = append_durably(backend.as_mut(), &buf, self.options.sync_on_write) {
            if let Err(rollback) = backend.truncate(start) {
                self.poison(&rollback.to_string());
            }
            return Err(JournalError::WriteFailure {
                message: err.to_string(),
            });
        }
        Ok(())
    }
}

fn append_durably(backend: &mut dyn LogBackend, buf: &[u8], sync: bool) -> StoreResult<()> {
    backend.append(buf)?;
    if sync {
        backend.sync()
    } else {
        backend.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use nullfs_storage::MemoryLog;
    use tempfile::tempdir;

    fn inline(data: &'static [u8]) -> Content {
        Content::Inline(Bytes::from_static(data))
    }

    fn remote(path: &str, origin: &str, counter: u64, data: &'static [u8]) -> JournalEntry {
        JournalEntry::new(
            "vol",
            path,
            Operation::Update,
            inline(data),
            VersionStamp::new(origin, counter),
        )
        .with_state(ApplyState::Committed)
    }

    #[test]
    fn local_appends_use_lamport_counters() {
        let journal = memory_journal();

        let (id1, e1) = journal
            .append_local("a.txt", Operation::Create, inline(b"1"))
            .unwrap();
        assert_eq!(id1, EntryId::new(1));
        assert_eq!(e1.stamp(), VersionStamp::new("local", 1));

        journal
            .append_remote(vec![remote("b.txt", "peer", 9, b"x")])
            .unwrap();
        let (_, e2) = journal
            .append_local("a.txt", Operation::Update, inline(b"2"))
            .unwrap();
        assert_eq!(e2.stamp(), VersionStamp::new("local", 10));
        assert!(e2.is_committed());
    }

    #[test]
    fn remote_entries_are_pending_and_deduplicated() {
        let journal = memory_journal();
        let entry = remote("a.txt", "peer", 3, b"x");

        let first = journal.append_remote(vec![entry.clone(), entry.clone()]).unwrap();
        assert_eq!(first.appended, 1);
        assert_eq!(first.ids, vec![EntryId::new(1), EntryId::new(1)]);
        assert!(!journal.is_committed(EntryId::new(1)));
        assert_eq!(journal.pending().len(), 1);

        let again = journal.append_remote(vec![entry]).unwrap();
        assert_eq!(again.appended, 0);
        assert_eq!(journal.len(), 1);
    }

    #[test]
    fn foreign_volume_is_rejected() {
        let journal = memory_journal();
        let mut entry = remote("a.txt", "peer", 3, b"x");
        entry.volume = "other".into();
        assert!(matches!(
            journal.append_remote(vec![entry]),
            Err(JournalError::VolumeMismatch { .. })
        ));
    }

    #[test]
    fn commit_updates_winner_view() {
        let journal = memory_journal();
        let ids = journal
            .append_remote(vec![
                remote("a.txt", "NodeA", 5, b"X"),
                remote("a.txt", "NodeB", 5, b"Y"),
            ])
            .unwrap()
            .ids;
        assert!(journal.winner("a.txt").is_none());

        assert_eq!(journal.mark_committed(&ids).unwrap(), 2);
        let winner = journal.winner("a.txt").unwrap();
        assert_eq!(winner.stamp, VersionStamp::new("NodeB", 5));
        assert_eq!(winner.content, inline(b"Y"));

        assert_eq!(journal.mark_committed(&ids).unwrap(), 0);
        assert!(matches!(
            journal.mark_committed(&[EntryId::new(99)]),
            Err(JournalError::UnknownEntry(_))
        ));
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");

        {
            let journal = VolumeJournal::open(&path, "vol", "local", JournalOptions::default())
                .unwrap();
            journal
                .append_local("x", Operation::Create, inline(b"x"))
                .unwrap();
            let ids = journal
                .append_remote(vec![
                    remote("a", "peer", 4, b"a"),
                    remote("b", "peer", 5, b"b"),
                ])
                .unwrap()
                .ids;
            journal.mark_committed(&ids[..1]).unwrap();
        }

        let journal =
            VolumeJournal::open(&path, "vol", "local", JournalOptions::default()).unwrap();
        assert_eq!(journal.len(), 3);
        assert_eq!(journal.clock(), 5);
        assert!(journal.is_committed(EntryId::new(2)));
        let pending = journal.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].1.path, "b");
        assert_eq!(journal.discarded_tail_bytes(), 0);
    }

    #[test]
    fn torn_tail_is_discarded_and_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");

        let full_size = {
            let journal = VolumeJournal::open(&path, "vol", "n", JournalOptions::default())
                .unwrap();
            journal.append_local("a", Operation::Create, inline(b"a")).unwrap();
            journal.append_local("b", Operation::Create, inline(b"b")).unwrap();
            std::fs::metadata(&path).unwrap().len()
        };

        // Simulate a crash halfway through the second record.
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full_size - 7).unwrap();
        drop(file);

        let journal = VolumeJournal::open(&path, "vol", "n", JournalOptions::default()).unwrap();
        assert_eq!(journal.len(), 1);
        assert!(journal.discarded_tail_bytes() > 0);
        let (id, _) = journal
            .append_local("c", Operation::Create, inline(b"c"))
            .unwrap();
        assert_eq!(id, EntryId::new(2));
        drop(journal);

        let journal = VolumeJournal::open(&path, "vol", "n", JournalOptions::default()).unwrap();
        assert_eq!(journal.len(), 2);
        assert_eq!(journal.discarded_tail_bytes(), 0);
    }

    #[test]
    fn failed_write_is_invisible_and_rolled_back() {
        let log = MemoryLog::new();
        let switch = log.failure_switch();
        let journal =
            VolumeJournal::with_backend(Box::new(log), "vol", "n", JournalOptions::default())
                .unwrap();
        journal.append_local("a", Operation::Create, inline(b"a")).unwrap();

        switch.store(true, Ordering::SeqCst);
        let err = journal
            .append_local("b", Operation::Create, inline(b"b"))
            .unwrap_err();
        assert!(err.is_durability_failure());
        assert_eq!(journal.len(), 1);
        assert!(!journal.is_poisoned());

        switch.store(false, Ordering::SeqCst);
        let (id, _) = journal
            .append_local("b", Operation::Create, inline(b"b"))
            .unwrap();
        assert_eq!(id, EntryId::new(2));
    }

    #[test]
    fn compaction_keeps_winners_tombstones_and_pending() {
        let journal = memory_journal();
        journal.append_local("a", Operation::Create, inline(b"1")).unwrap(); // 1, superseded
        journal.append_local("a", Operation::Update, inline(b"2")).unwrap(); // 2, winner
        journal.append_local("b", Operation::Create, inline(b"b")).unwrap(); // 3, superseded
        journal.append_local("b", Operation::Delete, Content::None).unwrap(); // 4, tombstone
        journal
            .append_remote(vec![remote("c", "peer", 1, b"c")])
            .unwrap(); // 5, pending

        let stats = journal.compact(EntryId::new(5)).unwrap();
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.kept, 3);
        assert!(journal.get(EntryId::new(1)).is_none());
        assert!(journal.get(EntryId::new(3)).is_none());
        assert_eq!(journal.winner("b").unwrap().kind, EffectKind::Remove);
        assert_eq!(journal.pending().len(), 1);

        let (id, entry) = journal
            .append_local("d", Operation::Create, inline(b"d"))
            .unwrap();
        assert_eq!(id, EntryId::new(6));
        assert_eq!(entry.counter, 5);
    }

    #[test]
    fn compaction_respects_horizon_and_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");

        {
            let journal = VolumeJournal::open(&path, "vol", "n", JournalOptions::default())
                .unwrap();
            for data in [&b"1"[..], b"2", b"3"] {
                journal
                    .append_local("a", Operation::Update, Content::Inline(Bytes::from(data)))
                    .unwrap();
            }
            let stats = journal.compact(EntryId::new(1)).unwrap();
            assert_eq!(stats.dropped, 1);
            assert_eq!(journal.horizon(), EntryId::new(1));
        }

        let journal = VolumeJournal::open(&path, "vol", "n", JournalOptions::default()).unwrap();
        assert_eq!(journal.len(), 2);
        assert_eq!(journal.horizon(), EntryId::new(1));
        assert_eq!(journal.last_id(), EntryId::new(3));
        assert_eq!(journal.winner("a").unwrap().id, EntryId::new(3));
    }

    fn memory_journal() -> VolumeJournal {
        VolumeJournal::in_memory("vol", "local")
    }
}
