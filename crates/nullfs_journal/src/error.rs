//! Error types for the journal crate.

use nullfs_protocol::{EntryId, ProtocolError};
use nullfs_storage::StoreError;
use std::io;
use thiserror::Error;

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors that can occur in journal, cursor and blob operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// A record could not be made durable. The entry is not visible.
    #[error("journal write failed: {message}")]
    WriteFailure {
        /// Description of the failure.
        message: String,
    },

    /// A previous write failed and could not be rolled back.
    #[error("journal is poisoned after an unrecoverable write failure")]
    Poisoned,

    /// The journal contains a damaged record before its tail.
    #[error("journal corruption: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Reading from the log backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// An entry failed to encode, decode or validate.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error outside the log backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process holds the volume directory.
    #[error("volume directory locked: {path}")]
    Locked {
        /// The locked directory.
        path: String,
    },

    /// No entry exists with the given id.
    #[error("unknown journal entry {0}")]
    UnknownEntry(EntryId),

    /// An entry for another volume was offered to this journal.
    #[error("entry for volume {found:?} offered to journal of {expected:?}")]
    VolumeMismatch {
        /// This journal's volume.
        expected: String,
        /// The entry's volume.
        found: String,
    },

    /// Blob content does not hash to the announced digest.
    #[error("blob hash mismatch: expected {expected}, got {actual}")]
    BlobMismatch {
        /// Announced hash.
        expected: String,
        /// Hash of the bytes received.
        actual: String,
    },

    /// A blob referenced by an entry is not stored locally.
    #[error("blob not found: {0}")]
    BlobNotFound(String),
}

impl JournalError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Returns true if the volume must stop committing.
    pub fn is_durability_failure(&self) -> bool {
        matches!(self, Self::WriteFailure { .. } | Self::Poisoned)
    }
}
