//! In-memory object store.

use super::{content_hash, PathStream, StoreAdapter, StoreMeta, StoreStat};
use crate::error::{StoreError, StoreResult};
use crate::path::StorePath;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
struct Object {
    data: Bytes,
    modified: SystemTime,
}

/// A flat key space kept in memory.
///
/// Behaves like an object store: there are no directories, only keys and
/// prefixes. Clones share the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<BTreeMap<StorePath, Object>>>,
    denied: Arc<RwLock<BTreeSet<String>>>,
    last_modified: Arc<Mutex<Option<SystemTime>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes writes and deletes under `prefix` fail with
    /// [`StoreError::PermissionDenied`].
    pub fn deny_writes(&self, prefix: impl Into<String>) {
        self.denied.write().insert(prefix.into());
    }

    /// Lifts every write restriction.
    pub fn allow_all_writes(&self) {
        self.denied.write().clear();
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Returns every key with its content.
    #[must_use]
    pub fn contents(&self) -> BTreeMap<String, Bytes> {
        self.objects
            .read()
            .iter()
            .map(|(path, object)| (path.to_string(), object.data.clone()))
            .collect()
    }

    /// Modification times strictly increase, so every put is visible to a
    /// size and mtime comparison.
    fn next_modified(&self) -> SystemTime {
        let mut last = self.last_modified.lock();
        let now = SystemTime::now();
        let next = match *last {
            Some(prev) if now <= prev => prev + Duration::from_nanos(1),
            _ => now,
        };
        *last = Some(next);
        next
    }

    fn check_writable(&self, path: &StorePath) -> StoreResult<()> {
        if self.denied.read().iter().any(|prefix| path.starts_with(prefix)) {
            return Err(StoreError::PermissionDenied {
                path: path.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn get(&self, path: &StorePath) -> StoreResult<Bytes> {
        self.objects
            .read()
            .get(path)
            .map(|object| object.data.clone())
            .ok_or_else(|| StoreError::NotFound {
                path: path.to_string(),
            })
    }

    async fn put(&self, path: &StorePath, data: Bytes) -> StoreResult<()> {
        self.check_writable(path)?;
        let modified = self.next_modified();
        self.objects
            .write()
            .insert(path.clone(), Object { data, modified });
        Ok(())
    }

    async fn delete(&self, path: &StorePath) -> StoreResult<()> {
        self.check_writable(path)?;
        match self.objects.write().remove(path) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound {
                path: path.to_string(),
            }),
        }
    }

    fn list(&self, prefix: &str) -> PathStream<'_> {
        let prefix = prefix.trim_start_matches('/').to_string();
        let objects = Arc::clone(&self.objects);

        // Each step resumes after the last key returned.
        stream::unfold(None::<StorePath>, move |last| {
            let objects = Arc::clone(&objects);
            let prefix = prefix.clone();
            async move {
                let next = {
                    let objects = objects.read();
                    let lower = match &last {
                        Some(key) => Bound::Excluded(key),
                        None => Bound::Unbounded,
                    };
                    objects
                        .range::<StorePath, _>((lower, Bound::Unbounded))
                        .map(|(key, _)| key)
                        .find(|key| key.starts_with(&prefix))
                        .cloned()
                };
                next.map(|key| (Ok(key.clone()), Some(key)))
            }
        })
        .boxed()
    }

    async fn stat(&self, path: &StorePath) -> StoreResult<StoreStat> {
        let objects = self.objects.read();
        let object = objects.get(path).ok_or_else(|| StoreError::NotFound {
            path: path.to_string(),
        })?;
        Ok(StoreStat {
            size: object.data.len() as u64,
            modified: object.modified,
            content_hash: content_hash(&object.data),
        })
    }

    async fn metadata(&self, path: &StorePath) -> StoreResult<StoreMeta> {
        let objects = self.objects.read();
        let object = objects.get(path).ok_or_else(|| StoreError::NotFound {
            path: path.to_string(),
        })?;
        Ok(StoreMeta {
            size: object.data.len() as u64,
            modified: object.modified,
        })
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
