//! Error types for store and log operations.

use std::io;
use thiserror::Error;

/// Result type for store and log operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while touching a volume store or a log backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The path does not exist. Expected during sync and never fatal.
    #[error("not found: {path}")]
    NotFound {
        /// The missing path.
        path: String,
    },

    /// Access to the path was denied by the backing store.
    #[error("permission denied: {path}")]
    PermissionDenied {
        /// The path that could not be accessed.
        path: String,
    },

    /// The path is not a valid volume-relative path.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// An I/O error occurred. Callers may retry.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of a log.
    #[error("read beyond end of log: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current log size.
        size: u64,
    },
}

impl StoreError {
    /// Maps an I/O error on `path` onto the store failure kinds.
    pub fn from_io(path: impl Into<String>, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path: path.into() },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path: path.into() },
            _ => Self::Io(err),
        }
    }

    /// Returns true for [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the caller may retry the operation later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_map_to_store_kinds() {
        let err = StoreError::from_io("a.txt", io::Error::from(io::ErrorKind::NotFound));
        assert!(err.is_not_found());

        let err = StoreError::from_io("a.txt", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, StoreError::PermissionDenied { ref path } if path == "a.txt"));
        assert!(!err.is_transient());

        let err = StoreError::from_io("a.txt", io::Error::from(io::ErrorKind::Interrupted));
        assert!(err.is_transient());
    }
}
