//! Applies pending journal entries to the volume store.
//!
//! Entries are replayed in canonical order (path, then stamp). An effect
//! only reaches the store if the entry's stamp is the greatest among the
//! pending entries touching that path and also beats the committed winner,
//! so replaying the same pending set in any arrival order leaves the store
//! in the same state. Entries whose effects all lose are still committed,
//! but only once whatever beats them is in the store: a loser is never
//! committed behind a newer entry that failed to apply.

use crate::error::{SyncError, SyncResult};
use bytes::Bytes;
use nullfs_journal::{BlobStore, VolumeJournal};
use nullfs_protocol::{Content, EffectKind, EntryId, JournalEntry, VersionStamp};
use nullfs_storage::{StoreAdapter, StorePath};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An entry the applier could not apply.
#[derive(Debug)]
pub struct ApplyFailure {
    /// Position of the entry, which stays pending.
    pub id: EntryId,
    /// What went wrong.
    pub error: SyncError,
}

/// Result of one apply pass.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Entries whose effects were written and that are now committed.
    pub applied: Vec<EntryId>,
    /// Entries superseded by a newer write, committed without touching
    /// the store.
    pub superseded: Vec<EntryId>,
    /// Entries left pending because they failed.
    pub failed: Vec<ApplyFailure>,
    /// Entries left pending because the newer write that supersedes them
    /// has not reached the store yet.
    pub deferred: Vec<EntryId>,
}

impl ApplyReport {
    /// Every id committed by this pass.
    pub fn committed(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.applied.iter().chain(self.superseded.iter()).copied()
    }

    /// Returns true if nothing was left pending.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.deferred.is_empty()
    }
}

/// Writes pending entries of one volume into its store.
#[derive(Clone)]
pub struct Applier {
    store: Arc<dyn StoreAdapter>,
    journal: Arc<VolumeJournal>,
    blobs: Arc<BlobStore>,
}

impl Applier {
    /// Creates an applier.
    pub fn new(
        store: Arc<dyn StoreAdapter>,
        journal: Arc<VolumeJournal>,
        blobs: Arc<BlobStore>,
    ) -> Self {
        Self {
            store,
            journal,
            blobs,
        }
    }

    /// Applies every pending entry and commits those that succeeded.
    ///
    /// A store failure leaves the entry pending for the next pass and does
    /// not stop the others.
    ///
    /// # Errors
    ///
    /// Only journal failures are returned. If the commit record cannot be
    /// written, the effects are in the store but the entries stay pending;
    /// applying them again is harmless.
    pub async fn apply_pending(&self) -> SyncResult<ApplyReport> {
        let mut pending = self.journal.pending();
        if pending.is_empty() {
            return Ok(ApplyReport::default());
        }
        pending.sort_by(|(_, a), (_, b)| a.canonical_cmp(b));

        let mut newest: HashMap<String, VersionStamp> = HashMap::new();
        for (_, entry) in &pending {
            let stamp = entry.stamp();
            for effect in entry.effects() {
                match newest.get(effect.path) {
                    Some(best) if !stamp.beats(best) => {}
                    _ => {
                        newest.insert(effect.path.to_string(), stamp.clone());
                    }
                }
            }
        }

        // An entry runs once every path it loses is owned by something
        // already in the store. Repeat until a pass makes no progress.
        let mut report = ApplyReport::default();
        let mut landed: HashSet<String> = HashSet::new();
        let mut remaining = pending;
        loop {
            let mut progressed = false;
            let mut blocked = Vec::new();
            for (id, entry) in remaining {
                if !self.settled(&entry, &newest, &landed) {
                    blocked.push((id, entry));
                    continue;
                }
                progressed = true;
                match self.apply_entry(&entry, &newest).await {
                    Ok(wrote) => {
                        let stamp = entry.stamp();
                        for effect in entry.effects() {
                            if newest.get(effect.path) == Some(&stamp) {
                                landed.insert(effect.path.to_string());
                            }
                        }
                        if wrote {
                            report.applied.push(id);
                        } else {
                            report.superseded.push(id);
                        }
                    }
                    Err(error) => {
                        warn!(volume = %entry.volume, %id, stamp = %entry.stamp(), path = %entry.path, %error, "apply failed, entry stays pending");
                        report.failed.push(ApplyFailure { id, error });
                    }
                }
            }
            remaining = blocked;
            if !progressed || remaining.is_empty() {
                break;
            }
        }
        for (id, entry) in remaining {
            debug!(volume = %entry.volume, %id, stamp = %entry.stamp(), path = %entry.path, "newer write for the path is still pending");
            report.deferred.push(id);
        }

        let ids: Vec<EntryId> = report.committed().collect();
        if !ids.is_empty() {
            let journal = Arc::clone(&self.journal);
            tokio::task::spawn_blocking(move || journal.mark_committed(&ids))
                .await
                .map_err(|err| SyncError::Task(err.to_string()))??;
        }

        info!(
            volume = %self.journal.volume(),
            applied = report.applied.len(),
            superseded = report.superseded.len(),
            deferred = report.deferred.len(),
            failed = report.failed.len(),
            "apply pass finished"
        );
        Ok(report)
    }

    /// Returns true if the entry can run now: for every path it touches it
    /// is the newest pending write, or the committed winner beats it, or
    /// the newer pending write that beats it already reached the store.
    fn settled(
        &self,
        entry: &JournalEntry,
        newest: &HashMap<String, VersionStamp>,
        landed: &HashSet<String>,
    ) -> bool {
        let stamp = entry.stamp();
        entry.effects().iter().all(|effect| {
            newest.get(effect.path) == Some(&stamp)
                || landed.contains(effect.path)
                || self
                    .journal
                    .winner(effect.path)
                    .is_some_and(|winner| winner.stamp.beats(&stamp))
        })
    }

    /// Applies the winning effects of one entry. Returns false if every
    /// effect lost to a newer stamp.
    async fn apply_entry(
        &self,
        entry: &JournalEntry,
        newest: &HashMap<String, VersionStamp>,
    ) -> SyncResult<bool> {
        let stamp = entry.stamp();
        let mut wrote = false;
        for effect in entry.effects() {
            let committed = self.journal.winner(effect.path).map(|w| w.stamp);
            let beats_committed = committed.as_ref().is_none_or(|w| stamp.beats(w));
            let newest_in_batch = newest.get(effect.path) == Some(&stamp);
            if !(beats_committed && newest_in_batch) {
                debug!(%stamp, path = effect.path, "superseded effect skipped");
                continue;
            }

            let path = StorePath::parse(effect.path)?;
            match effect.kind {
                EffectKind::Write => {
                    let data = self.content(&entry.payload_or_hash).await?;
                    self.store.put(&path, data).await?;
                }
                EffectKind::Remove => match self.store.delete(&path).await {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err.into()),
                },
            }
            wrote = true;
        }
        Ok(wrote)
    }

    async fn content(&self, content: &Content) -> SyncResult<Bytes> {
        match content {
            Content::Inline(data) => Ok(data.clone()),
            Content::Digest { hash, .. } => {
                let blobs = Arc::clone(&self.blobs);
                let hash = hash.clone();
                let data = tokio::task::spawn_blocking(move || blobs.get(&hash))
                    .await
                    .map_err(|err| SyncError::Task(err.to_string()))??;
                Ok(data)
            }
            Content::None => Err(SyncError::Protocol(
                "write effect without content".to_string(),
            )),
        }
    }
}
