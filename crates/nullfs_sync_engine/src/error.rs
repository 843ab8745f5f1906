//! Error types for the sync engine.

use nullfs_journal::JournalError;
use nullfs_protocol::ProtocolError;
use nullfs_storage::StoreError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Operator-facing classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Bad or missing credential, or a peer not allowed for the volume.
    Auth,
    /// The peer could not be reached or failed on its side.
    Network,
    /// The peer did not answer in time.
    Timeout,
    /// The local store refused an operation.
    PermissionDenied,
    /// The journal could not make a record durable.
    WriteFailure,
    /// Any other local I/O failure.
    Io,
    /// Malformed data from a peer.
    Protocol,
    /// Invalid configuration.
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::WriteFailure => "write-failure",
            ErrorKind::Io => "io",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Config => "config",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A credential was rejected, either by us or by a relay.
    #[error("authentication failed for {peer}: {reason}")]
    AuthFailure {
        /// User name or relay alias.
        peer: String,
        /// What was wrong.
        reason: String,
    },

    /// The gate refused a data flow.
    #[error("{identity} may not {direction} volume {volume}")]
    Denied {
        /// Who asked.
        identity: String,
        /// The volume.
        volume: String,
        /// Which way the data would flow.
        direction: String,
    },

    /// A relay refused the request for a reason only configuration can fix.
    #[error("relay {relay} rejected the request: {reason}")]
    Rejected {
        /// Relay alias.
        relay: String,
        /// What the relay said.
        reason: String,
    },

    /// The relay could not be reached.
    #[error("network failure talking to {relay}: {message}")]
    Network {
        /// Relay alias.
        relay: String,
        /// Error message.
        message: String,
    },

    /// The relay did not answer within the pull timeout.
    #[error("pull from {relay} timed out")]
    Timeout {
        /// Relay alias.
        relay: String,
    },

    /// The relay answered with a server error.
    #[error("relay {relay} failed with status {status}: {message}")]
    ServerFailure {
        /// Relay alias.
        relay: String,
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// Malformed data received from a peer.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The volume is not configured on this node.
    #[error("unknown volume: {0}")]
    UnknownVolume(String),

    /// The volume stopped committing after a durability failure.
    #[error("volume {0} is halted after a journal write failure")]
    Halted(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Journal, cursor or blob store error.
    #[error(transparent)]
    Journal(#[from] JournalError),

    /// Store adapter error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl SyncError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::AuthFailure { .. } | SyncError::Denied { .. } | SyncError::Rejected { .. } => {
                ErrorKind::Auth
            }
            SyncError::Network { .. } | SyncError::ServerFailure { .. } => ErrorKind::Network,
            SyncError::Timeout { .. } => ErrorKind::Timeout,
            SyncError::Protocol(_) => ErrorKind::Protocol,
            SyncError::UnknownVolume(_) | SyncError::Config(_) => ErrorKind::Config,
            SyncError::Halted(_) => ErrorKind::WriteFailure,
            SyncError::Journal(err) => match err {
                JournalError::WriteFailure { .. } | JournalError::Poisoned => ErrorKind::WriteFailure,
                JournalError::Protocol(_)
                | JournalError::VolumeMismatch { .. }
                | JournalError::BlobMismatch { .. } => ErrorKind::Protocol,
                _ => ErrorKind::Io,
            },
            SyncError::Store(StoreError::PermissionDenied { .. }) => ErrorKind::PermissionDenied,
            SyncError::Store(_) | SyncError::Task(_) => ErrorKind::Io,
        }
    }

    /// Returns true if the next scheduled cycle retries this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { .. } | SyncError::Timeout { .. } | SyncError::ServerFailure { .. } => {
                true
            }
            SyncError::Store(err) => err.is_transient(),
            SyncError::Journal(JournalError::BlobMismatch { .. }) => true,
            _ => false,
        }
    }

    /// Returns true if the volume must stop committing.
    pub fn is_durability_failure(&self) -> bool {
        match self {
            SyncError::Journal(err) => err.is_durability_failure(),
            SyncError::Halted(_) => true,
            _ => false,
        }
    }
}
