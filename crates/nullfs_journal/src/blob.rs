//! Content-addressed blob store for payloads above the inline threshold.

use crate::dir::write_atomic;
use crate::error::{JournalError, JournalResult};
use bytes::Bytes;
use nullfs_storage::content_hash;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug)]
enum BlobBackend {
    Dir(PathBuf),
    Memory(RwLock<HashMap<String, Bytes>>),
}

/// Blobs named by the SHA-256 of their content.
///
/// A blob is immutable once written. Writing the same content twice is a
/// no-op.
#[derive(Debug)]
pub struct BlobStore {
    backend: BlobBackend,
}

impl BlobStore {
    /// Stores blobs as files in `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> JournalResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            backend: BlobBackend::Dir(dir),
        })
    }

    /// Keeps blobs in memory.
    pub fn in_memory() -> Self {
        Self {
            backend: BlobBackend::Memory(RwLock::new(HashMap::new())),
        }
    }

    /// Stores `data` and returns its hash.
    pub fn put(&self, data: Bytes) -> JournalResult<String> {
        let hash = content_hash(&data);
        self.write(&hash, data)?;
        Ok(hash)
    }

    /// Stores `data` received under the name `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::BlobMismatch`] if `data` does not hash to
    /// `expected`. Nothing is stored in that case.
    pub fn put_verified(&self, expected: &str, data: Bytes) -> JournalResult<()> {
        let actual = content_hash(&data);
        if actual != expected {
            return Err(JournalError::BlobMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
        self.write(expected, data)
    }

    /// Returns the blob named `hash`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::BlobNotFound`] if it is not stored.
    pub fn get(&self, hash: &str) -> JournalResult<Bytes> {
        match &self.backend {
            BlobBackend::Dir(dir) => {
                let path = Self::file_path(dir, hash)?;
                match std::fs::read(path) {
                    Ok(data) => Ok(Bytes::from(data)),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                        Err(JournalError::BlobNotFound(hash.to_string()))
                    }
                    Err(err) => Err(err.into()),
                }
            }
            BlobBackend::Memory(blobs) => blobs
                .read()
                .get(hash)
                .cloned()
                .ok_or_else(|| JournalError::BlobNotFound(hash.to_string())),
        }
    }

    /// Returns true if the blob is stored.
    pub fn contains(&self, hash: &str) -> bool {
        match &self.backend {
            BlobBackend::Dir(dir) => {
                Self::file_path(dir, hash).is_ok_and(|path| path.is_file())
            }
            BlobBackend::Memory(blobs) => blobs.read().contains_key(hash),
        }
    }

    fn write(&self, hash: &str, data: Bytes) -> JournalResult<()> {
        match &self.backend {
            BlobBackend::Dir(dir) => {
                let path = Self::file_path(dir, hash)?;
                if !path.is_file() {
                    write_atomic(&path, &data)?;
                }
            }
            BlobBackend::Memory(blobs) => {
                blobs.write().entry(hash.to_string()).or_insert(data);
            }
        }
        Ok(())
    }

    /// Hashes are untrusted input from the network.
    fn file_path(dir: &std::path::Path, hash: &str) -> JournalResult<PathBuf> {
        let valid = hash.len() == 64
            && hash
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(JournalError::BlobNotFound(hash.to_string()));
        }
        Ok(dir.join(hash))
    }
}
