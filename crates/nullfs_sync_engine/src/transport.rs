//! How a node reaches its relays.
//!
//! The sync loop only sees [`PeerConnector`]. Production nodes use
//! [`crate::HttpConnector`]; tests and single-process topologies wire
//! nodes together with [`InProcessConnector`].

use crate::config::Credential;
use crate::error::{SyncError, SyncResult};
use crate::relay::RelayService;
use async_trait::async_trait;
use bytes::Bytes;
use nullfs_protocol::{PullRequest, PullResponse, VersionStamp};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A connection to one relay.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Alias of the relay in the local configuration.
    fn relay(&self) -> &str;

    /// Fetches one page of committed entries newer than `since`.
    async fn pull(&self, volume: &str, since: Option<VersionStamp>) -> SyncResult<PullResponse>;

    /// Fetches the blob stored under `hash`.
    async fn fetch_blob(&self, volume: &str, hash: &str) -> SyncResult<Bytes>;

    /// Pulls pages until the relay reports no more, or `max_pages` pages
    /// were read. Entries are concatenated in order and the last cursor is
    /// returned.
    async fn pull_pages(
        &self,
        volume: &str,
        since: Option<VersionStamp>,
        max_pages: usize,
    ) -> SyncResult<PullResponse> {
        let mut page = self.pull(volume, since).await?;
        let mut pages = 1;
        while page.has_more && pages < max_pages {
            let next = self.pull(volume, Some(page.next_cursor.clone())).await?;
            page.entries.extend(next.entries);
            page.next_cursor = next.next_cursor;
            page.has_more = next.has_more;
            pages += 1;
        }
        Ok(page)
    }
}

/// Calls a [`RelayService`] in the same process.
///
/// Errors are mapped the way [`crate::HttpConnector`] maps the equivalent
/// HTTP statuses, so the sync loop behaves the same over either.
#[derive(Debug)]
pub struct InProcessConnector {
    alias: String,
    relay: Arc<RelayService>,
    credential: Credential,
    offline: AtomicBool,
}

impl InProcessConnector {
    /// Connects to `relay` under `alias`, presenting `credential`.
    pub fn new(alias: impl Into<String>, relay: Arc<RelayService>, credential: Credential) -> Self {
        Self {
            alias: alias.into(),
            relay,
            credential,
            offline: AtomicBool::new(false),
        }
    }

    /// Simulates the relay being unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Network {
                relay: self.alias.clone(),
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    fn map_err(&self, err: SyncError) -> SyncError {
        match err {
            SyncError::AuthFailure { reason, .. } => SyncError::AuthFailure {
                peer: self.alias.clone(),
                reason,
            },
            SyncError::Denied { .. } => SyncError::AuthFailure {
                peer: self.alias.clone(),
                reason: err.to_string(),
            },
            SyncError::UnknownVolume(_) => SyncError::Rejected {
                relay: self.alias.clone(),
                reason: err.to_string(),
            },
            other => SyncError::ServerFailure {
                relay: self.alias.clone(),
                status: 500,
                message: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl PeerConnector for InProcessConnector {
    fn relay(&self) -> &str {
        &self.alias
    }

    async fn pull(&self, volume: &str, since: Option<VersionStamp>) -> SyncResult<PullResponse> {
        self.check_online()?;
        let request = PullRequest::new(volume, since);
        self.relay
            .pull(&self.credential, &request)
            .map_err(|err| self.map_err(err))
    }

    async fn fetch_blob(&self, volume: &str, hash: &str) -> SyncResult<Bytes> {
        self.check_online()?;
        self.relay
            .blob(&self.credential, volume, hash)
            .map_err(|err| self.map_err(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessGate;
    use crate::config::{NodeConfig, VolumeConfig};
    use nullfs_journal::VolumeState;
    use nullfs_protocol::{Content, Operation};
    use nullfs_storage::StoreConfig;

    fn connector(password: &str) -> (InProcessConnector, VolumeState) {
        let config = NodeConfig::new("hub")
            .with_user("edge", "pw")
            .with_volume("docs", VolumeConfig::new(StoreConfig::Memory).allow("edge"));
        let gate = Arc::new(AccessGate::from_config(&config).unwrap());
        let state = VolumeState::in_memory("docs", "hub");
        let relay = Arc::new(RelayService::new("hub", gate, [state.clone()]));
        (
            InProcessConnector::new("upstream", relay, Credential::new("edge", password)),
            state,
        )
    }

    #[tokio::test]
    async fn pull_pages_follows_has_more() {
        let (connector, state) = connector("pw");
        for i in 0..600u32 {
            state
                .journal
                .append_local(
                    format!("f{i}"),
                    Operation::Create,
                    Content::Inline(Bytes::from(i.to_le_bytes().to_vec())),
                )
                .unwrap();
        }

        let all = connector.pull_pages("docs", None, 10).await.unwrap();
        assert_eq!(all.entries.len(), 600);
        assert!(!all.has_more);
        assert_eq!(all.next_cursor, VersionStamp::new("hub", 600));

        let capped = connector.pull_pages("docs", None, 1).await.unwrap();
        assert_eq!(capped.entries.len(), 256);
        assert!(capped.has_more);
    }

    #[tokio::test]
    async fn errors_are_reported_against_the_alias() {
        let (bad, _) = connector("wrong");
        match bad.pull("docs", None).await {
            Err(SyncError::AuthFailure { peer, .. }) => assert_eq!(peer, "upstream"),
            other => panic!("unexpected {other:?}"),
        }

        let (good, _) = connector("pw");
        assert!(matches!(
            good.pull("music", None).await,
            Err(SyncError::Rejected { .. })
        ));

        good.set_offline(true);
        let err = good.pull("docs", None).await.unwrap_err();
        assert!(err.is_retryable());
        good.set_offline(false);
        assert!(good.pull("docs", None).await.is_ok());
    }
}
