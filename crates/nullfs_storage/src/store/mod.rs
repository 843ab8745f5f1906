//! The store adapter contract shared by every volume backend.

mod local;
mod memory;

pub use local::LocalStore;
pub use memory::MemoryStore;

use crate::error::StoreResult;
use crate::path::StorePath;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

/// A lazy, finite sequence of paths produced by [`StoreAdapter::list`].
pub type PathStream<'a> = BoxStream<'a, StoreResult<StorePath>>;

/// Metadata for a stored file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStat {
    /// Content length in bytes.
    pub size: u64,
    /// Last modification time reported by the backend.
    pub modified: SystemTime,
    /// Lowercase hex SHA-256 of the content.
    pub content_hash: String,
}

/// Size and modification time, read without touching the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreMeta {
    /// Content length in bytes.
    pub size: u64,
    /// Last modification time reported by the backend.
    pub modified: SystemTime,
}

/// Uniform byte-level access to the files of one volume.
///
/// Implementations are interchangeable: the sync engine never knows which
/// backend a volume lives on. Failures are reported as
/// [`crate::StoreError::NotFound`] (expected),
/// [`crate::StoreError::PermissionDenied`] (fatal to the operation) or
/// [`crate::StoreError::Io`] (transient).
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Reads the whole content at `path`.
    async fn get(&self, path: &StorePath) -> StoreResult<Bytes>;

    /// Replaces the content at `path`, creating it if needed.
    ///
    /// Readers never observe a partially written file.
    async fn put(&self, path: &StorePath, data: Bytes) -> StoreResult<()>;

    /// Removes `path`.
    async fn delete(&self, path: &StorePath) -> StoreResult<()>;

    /// Lists every file whose path starts with `prefix`.
    fn list(&self, prefix: &str) -> PathStream<'_>;

    /// Returns size, modification time and content hash for `path`.
    ///
    /// Reads the whole content.
    async fn stat(&self, path: &StorePath) -> StoreResult<StoreStat>;

    /// Returns size and modification time for `path` without reading it.
    async fn metadata(&self, path: &StorePath) -> StoreResult<StoreMeta>;

    /// Short backend name for logs.
    fn kind(&self) -> &'static str;
}

/// Which backend a volume is stored on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StoreConfig {
    /// A directory on the local filesystem.
    Local {
        /// Volume root directory. Created if missing.
        root: PathBuf,
    },
    /// An ephemeral in-memory key space.
    Memory,
}

/// Builds the store described by `config`.
///
/// # Errors
///
/// Returns an error if a local root cannot be created.
pub async fn open_store(config: &StoreConfig) -> StoreResult<Arc<dyn StoreAdapter>> {
    match config {
        StoreConfig::Local { root } => Ok(Arc::new(LocalStore::open(root).await?)),
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

/// Computes the content hash used throughout null.fs.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
