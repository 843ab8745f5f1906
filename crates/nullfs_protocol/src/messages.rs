//! Pull endpoint messages.

use crate::entry::JournalEntry;
use crate::stamp::VersionStamp;
use serde::{Deserialize, Serialize};

/// Entries returned per pull page when the caller does not ask otherwise.
pub const DEFAULT_PULL_LIMIT: u32 = 256;

/// Asks a relay for the entries of one volume newer than a cursor.
///
/// Credentials travel as HTTP Basic authentication, not in the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Volume to pull.
    pub volume: String,
    /// Cursor returned by the previous pull, or `None` for a first pull.
    pub since: Option<VersionStamp>,
    /// Maximum number of entries in the response.
    pub limit: u32,
}

impl PullRequest {
    /// Creates a request with the default page size.
    pub fn new(volume: impl Into<String>, since: Option<VersionStamp>) -> Self {
        Self {
            volume: volume.into(),
            since,
            limit: DEFAULT_PULL_LIMIT,
        }
    }

    /// Sets the page size.
    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}

/// A page of committed entries, oldest first in the relay's journal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    /// Name of the node that answered.
    pub relay: String,
    /// The entries.
    pub entries: Vec<JournalEntry>,
    /// Cursor to send with the next pull.
    pub next_cursor: VersionStamp,
    /// True if the relay has more committed entries past `next_cursor`.
    pub has_more: bool,
}

impl PullResponse {
    /// Creates an empty response that leaves the cursor where it was.
    pub fn empty(relay: impl Into<String>, cursor: VersionStamp) -> Self {
        Self {
            relay: relay.into(),
            entries: Vec::new(),
            next_cursor: cursor,
            has_more: false,
        }
    }
}

/// One configured relay, as listed by `/v1/info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySummary {
    /// Local alias.
    pub alias: String,
    /// Base URL.
    pub address: String,
}

/// Public description of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// Node name.
    pub name: String,
    /// Software version.
    pub version: String,
    /// Configured relays.
    pub relays: Vec<RelaySummary>,
    /// Served volumes.
    pub volumes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireMessage;

    #[test]
    fn pull_messages_encode() {
        let request = PullRequest::new("docs", Some(VersionStamp::new("relay", 10))).with_limit(5);
        assert_eq!(PullRequest::decode(&request.encode().unwrap()).unwrap(), request);

        let response = PullResponse::empty("relay", VersionStamp::new("relay", 10));
        let decoded = PullResponse::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded.next_cursor.counter, 10);
        assert!(!decoded.has_more);
    }
}
