//! Local change detection.
//!
//! The scanner compares what the volume store holds now with the
//! journal's committed view and appends one local entry per difference.
//! Content is compared by hash, so touching a file without changing it
//! produces nothing, and a file that disappears from one path while the
//! same bytes appear at another is recorded as a single rename.
//!
//! Hashes are remembered per path in a [`HashCache`] together with the
//! size and modification time they were computed for. A file is only read
//! again when either changes.

use crate::error::{SyncError, SyncResult};
use bytes::Bytes;
use futures::TryStreamExt;
use nullfs_journal::{BlobStore, VolumeJournal, Winner};
use nullfs_protocol::{Content, EffectKind, Operation};
use nullfs_storage::{content_hash, StoreAdapter, StoreMeta, StorePath};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// What one scan appended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// New paths.
    pub created: usize,
    /// Paths whose content changed.
    pub updated: usize,
    /// Paths that disappeared.
    pub deleted: usize,
    /// Paths that moved.
    pub renamed: usize,
}

impl ScanReport {
    /// Number of entries appended.
    pub fn total(&self) -> usize {
        self.created + self.updated + self.deleted + self.renamed
    }
}

#[derive(Debug, Clone)]
struct CachedHash {
    meta: StoreMeta,
    hash: String,
}

/// Content hashes of a volume's files from earlier scans.
///
/// Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct HashCache {
    entries: Arc<Mutex<HashMap<String, CachedHash>>>,
}

impl HashCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of remembered paths.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn lookup(&self, path: &str, meta: &StoreMeta) -> Option<String> {
        self.entries
            .lock()
            .get(path)
            .filter(|cached| cached.meta == *meta)
            .map(|cached| cached.hash.clone())
    }

    fn remember(&self, path: &str, meta: StoreMeta, hash: String) {
        self.entries
            .lock()
            .insert(path.to_string(), CachedHash { meta, hash });
    }

    fn retain_listed(&self, listed: &BTreeMap<String, String>) {
        self.entries.lock().retain(|path, _| listed.contains_key(path));
    }
}

enum Change {
    Write { path: String, op: Operation },
    Delete { path: String },
    Rename { from: String, to: String },
}

/// Detects local changes of one volume and journals them.
#[derive(Clone)]
pub struct ChangeScanner {
    store: Arc<dyn StoreAdapter>,
    journal: Arc<VolumeJournal>,
    blobs: Arc<BlobStore>,
    inline_threshold: usize,
    hashes: HashCache,
}

impl ChangeScanner {
    /// Creates a scanner.
    pub fn new(
        store: Arc<dyn StoreAdapter>,
        journal: Arc<VolumeJournal>,
        blobs: Arc<BlobStore>,
        inline_threshold: usize,
    ) -> Self {
        Self {
            store,
            journal,
            blobs,
            inline_threshold,
            hashes: HashCache::new(),
        }
    }

    /// Shares `hashes` with earlier scanners of the same volume.
    #[must_use]
    pub fn with_hash_cache(mut self, hashes: HashCache) -> Self {
        self.hashes = hashes;
        self
    }

    /// Diffs the store against the journal and appends the differences.
    ///
    /// # Errors
    ///
    /// Store failures abort the scan before anything is appended. A journal
    /// write failure aborts it part way; entries appended before the
    /// failure stay.
    pub async fn scan(&self) -> SyncResult<ScanReport> {
        let mut on_disk: BTreeMap<String, String> = BTreeMap::new();
        let mut listing = self.store.list("");
        while let Some(path) = listing.try_next().await? {
            if let Some(hash) = self.hash_of(&path).await? {
                on_disk.insert(path.as_str().to_string(), hash);
            }
        }
        drop(listing);
        self.hashes.retain_listed(&on_disk);

        let known: BTreeMap<String, String> = self
            .journal
            .winners()
            .into_iter()
            .filter_map(|(path, winner)| winner_hash(&winner).map(|hash| (path, hash)))
            .collect();

        let changes = diff(&known, &on_disk);
        if changes.is_empty() {
            return Ok(ScanReport::default());
        }

        let mut report = ScanReport::default();
        let mut staged = Vec::with_capacity(changes.len());
        for change in changes {
            let (path, op, data) = match change {
                Change::Write { path, op } => {
                    let Some(data) = self.read(&path).await? else {
                        continue;
                    };
                    match op {
                        Operation::Create => report.created += 1,
                        _ => report.updated += 1,
                    }
                    (path, op, Some(data))
                }
                Change::Delete { path } => {
                    report.deleted += 1;
                    (path, Operation::Delete, None)
                }
                Change::Rename { from, to } => {
                    let Some(data) = self.read(&to).await? else {
                        continue;
                    };
                    report.renamed += 1;
                    (from, Operation::Rename { to }, Some(data))
                }
            };
            staged.push((path, op, data));
        }

        let journal = Arc::clone(&self.journal);
        let blobs = Arc::clone(&self.blobs);
        let threshold = self.inline_threshold;
        tokio::task::spawn_blocking(move || -> SyncResult<()> {
            for (path, op, data) in staged {
                let content = match data {
                    None => Content::None,
                    Some(data) if data.len() <= threshold => Content::Inline(data),
                    Some(data) => {
                        let size = data.len() as u64;
                        let hash = blobs.put(data)?;
                        Content::Digest { hash, size }
                    }
                };
                let (id, entry) = journal.append_local(path, op, content)?;
                debug!(%id, stamp = %entry.stamp(), path = %entry.path, op = ?entry.op, "journaled local change");
            }
            Ok(())
        })
        .await
        .map_err(|err| SyncError::Task(err.to_string()))??;

        info!(
            volume = %self.journal.volume(),
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            renamed = report.renamed,
            "local changes journaled"
        );
        Ok(report)
    }

    /// Content hash of `path`, computed only if its size or modification
    /// time changed since the last scan. `None` if it was removed meanwhile.
    async fn hash_of(&self, path: &StorePath) -> SyncResult<Option<String>> {
        let meta = match self.store.metadata(path).await {
            Ok(meta) => meta,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if let Some(hash) = self.hashes.lookup(path.as_str(), &meta) {
            return Ok(Some(hash));
        }
        match self.store.stat(path).await {
            Ok(stat) => {
                let meta = StoreMeta {
                    size: stat.size,
                    modified: stat.modified,
                };
                self.hashes
                    .remember(path.as_str(), meta, stat.content_hash.clone());
                Ok(Some(stat.content_hash))
            }
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Reads a file, treating a concurrent removal as "skip for now".
    async fn read(&self, path: &str) -> SyncResult<Option<Bytes>> {
        let path = StorePath::parse(path)?;
        match self.store.get(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Hash of the content a live winner wrote, `None` for tombstones.
fn winner_hash(winner: &Winner) -> Option<String> {
    if winner.kind == EffectKind::Remove {
        return None;
    }
    match &winner.content {
        Content::Inline(data) => Some(content_hash(data)),
        Content::Digest { hash, .. } => Some(hash.clone()),
        Content::None => None,
    }
}

/// Differences between the journal view and the store, renames folded.
fn diff(known: &BTreeMap<String, String>, on_disk: &BTreeMap<String, String>) -> Vec<Change> {
    let mut changes = Vec::new();
    let mut created: BTreeSet<&str> = BTreeSet::new();
    for (path, hash) in on_disk {
        match known.get(path) {
            None => {
                created.insert(path.as_str());
            }
            Some(old) if old != hash => changes.push(Change::Write {
                path: path.clone(),
                op: Operation::Update,
            }),
            Some(_) => {}
        }
    }

    for (path, hash) in known {
        if on_disk.contains_key(path) {
            continue;
        }
        let target = created
            .iter()
            .find(|candidate| on_disk.get(**candidate) == Some(hash))
            .copied();
        match target {
            Some(to) => {
                created.remove(to);
                changes.push(Change::Rename {
                    from: path.clone(),
                    to: to.to_string(),
                });
            }
            None => changes.push(Change::Delete { path: path.clone() }),
        }
    }

    for path in created {
        changes.push(Change::Write {
            path: path.to_string(),
            op: Operation::Create,
        });
    }
    changes
}
