//! Journal entries.

use crate::error::{ProtocolError, ProtocolResult};
use crate::stamp::VersionStamp;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// The kind of mutation an entry records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    /// A path that did not exist (or was deleted) now has content.
    Create,
    /// An existing path has new content.
    Update,
    /// The path was removed.
    Delete,
    /// The path was moved to `to`, carrying its content along.
    Rename {
        /// Destination path.
        to: String,
    },
}

/// Where an entry's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Content {
    /// No content, used by deletes.
    None,
    /// Bytes carried inside the entry.
    Inline(Bytes),
    /// Bytes kept in the blob store under their SHA-256.
    Digest {
        /// Lowercase hex SHA-256.
        hash: String,
        /// Content length.
        size: u64,
    },
}

impl Content {
    /// Returns the content length, if the entry has content.
    pub fn size(&self) -> Option<u64> {
        match self {
            Content::None => None,
            Content::Inline(data) => Some(data.len() as u64),
            Content::Digest { size, .. } => Some(*size),
        }
    }

    /// Returns the blob hash for digest content.
    pub fn digest(&self) -> Option<&str> {
        match self {
            Content::Digest { hash, .. } => Some(hash),
            _ => None,
        }
    }
}

/// Whether an entry's effects have reached the volume store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplyState {
    /// Durably journaled, not yet applied.
    Pending,
    /// Applied (or originated locally from an already-applied change).
    Committed,
}

/// What an entry does to a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    /// Write the entry's content.
    Write,
    /// Remove the path.
    Remove,
}

/// One path touched by an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathEffect<'a> {
    /// The affected path.
    pub path: &'a str,
    /// What happens to it.
    pub kind: EffectKind,
}

/// An immutable mutation record.
///
/// The field layout is the wire shape: the same value is appended to the
/// journal, served in pull responses and handed to the applier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    /// Volume the entry belongs to.
    pub volume: String,
    /// Volume-relative path (the source path for renames).
    pub path: String,
    /// Mutation kind.
    pub op: Operation,
    /// Inline payload or content hash.
    pub payload_or_hash: Content,
    /// Node that created the entry.
    pub origin_node: String,
    /// Origin counter.
    pub counter: u64,
    /// Wall-clock milliseconds at the origin. Informational only.
    pub timestamp: u64,
    /// Apply state at the node that holds this copy.
    pub apply_state: ApplyState,
}

impl JournalEntry {
    /// Creates a pending entry stamped now.
    pub fn new(
        volume: impl Into<String>,
        path: impl Into<String>,
        op: Operation,
        content: Content,
        stamp: VersionStamp,
    ) -> Self {
        Self {
            volume: volume.into(),
            path: path.into(),
            op,
            payload_or_hash: content,
            origin_node: stamp.origin,
            counter: stamp.counter,
            timestamp: now_millis(),
            apply_state: ApplyState::Pending,
        }
    }

    /// Returns the entry's version stamp.
    pub fn stamp(&self) -> VersionStamp {
        VersionStamp::new(self.origin_node.clone(), self.counter)
    }

    /// Returns true if the entry carries `stamp`.
    pub fn has_stamp(&self, stamp: &VersionStamp) -> bool {
        self.counter == stamp.counter && self.origin_node == stamp.origin
    }

    /// Returns true once the entry has been applied.
    pub fn is_committed(&self) -> bool {
        self.apply_state == ApplyState::Committed
    }

    /// Returns a copy with a different apply state.
    #[must_use]
    pub fn with_state(mut self, state: ApplyState) -> Self {
        self.apply_state = state;
        self
    }

    /// Returns the paths this entry touches and what it does to each.
    ///
    /// A rename removes its source and writes its destination.
    pub fn effects(&self) -> Vec<PathEffect<'_>> {
        match &self.op {
            Operation::Create | Operation::Update => vec![PathEffect {
                path: &self.path,
                kind: EffectKind::Write,
            }],
            Operation::Delete => vec![PathEffect {
                path: &self.path,
                kind: EffectKind::Remove,
            }],
            Operation::Rename { to } => vec![
                PathEffect {
                    path: &self.path,
                    kind: EffectKind::Remove,
                },
                PathEffect {
                    path: to,
                    kind: EffectKind::Write,
                },
            ],
        }
    }

    /// Sort key for deterministic replay: path, then stamp.
    pub fn canonical_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.path
            .cmp(&other.path)
            .then_with(|| self.stamp().cmp(&other.stamp()))
    }

    /// Checks the structural rules every entry must satisfy.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidEntry`] describing the first violation.
    pub fn validate(&self) -> ProtocolResult<()> {
        let invalid = |msg: &str| {
            Err(ProtocolError::InvalidEntry(format!(
                "{} {}: {msg}",
                self.stamp(),
                self.path
            )))
        };

        if self.origin_node.is_empty() {
            return invalid("empty origin");
        }
        if self.counter == 0 {
            return invalid("counter must be positive");
        }
        if self.path.is_empty() {
            return invalid("empty path");
        }
        match (&self.op, &self.payload_or_hash) {
            (Operation::Delete, Content::None) => {}
            (Operation::Delete, _) => return invalid("delete carries content"),
            (_, Content::None) => return invalid("missing content"),
            _ => {}
        }
        if let Operation::Rename { to } = &self.op {
            if to.is_empty() || to == &self.path {
                return invalid("rename target must differ from source");
            }
        }
        if let Content::Digest { hash, .. } = &self.payload_or_hash {
            let well_formed = hash.len() == 64
                && hash
                    .bytes()
                    .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
            if !well_formed {
                return invalid("malformed content hash");
            }
        }
        Ok(())
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
