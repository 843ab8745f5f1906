//! HTTP connector.
//!
//! Pulls are `POST {address}v1/pull` with a CBOR [`PullRequest`] body and
//! HTTP Basic credentials; the response body is a CBOR [`PullResponse`].
//! Blobs are `GET {address}v1/blob?volume=..&hash=..`.

use crate::config::{Credential, RelayNode};
use crate::error::{SyncError, SyncResult};
use crate::transport::PeerConnector;
use async_trait::async_trait;
use bytes::Bytes;
use nullfs_protocol::{
    PullRequest, PullResponse, VersionStamp, WireMessage, CBOR_CONTENT_TYPE,
};
use nullfs_storage::content_hash;
use reqwest::{header, Client, StatusCode, Url};
use std::time::Duration;
use tracing::debug;

/// Talks to a relay over HTTP.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    alias: String,
    base: Url,
    credential: Credential,
    client: Client,
}

impl HttpConnector {
    /// Creates a connector for `relay`, failing requests after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the address is not a URL or the
    /// client cannot be built.
    pub fn new(alias: impl Into<String>, relay: &RelayNode, timeout: Duration) -> SyncResult<Self> {
        let alias = alias.into();
        let mut address = relay.address.clone();
        if !address.ends_with('/') {
            address.push('/');
        }
        let base = Url::parse(&address).map_err(|err| {
            SyncError::config(format!("relay {alias} address {address:?}: {err}"))
        })?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SyncError::config(format!("cannot build HTTP client: {err}")))?;
        Ok(Self {
            alias,
            base,
            credential: relay.auth.clone(),
            client,
        })
    }

    /// Base URL requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> SyncResult<Url> {
        self.base
            .join(path)
            .map_err(|err| SyncError::config(format!("relay {}: {err}", self.alias)))
    }

    fn transport_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout {
                relay: self.alias.clone(),
            }
        } else {
            SyncError::Network {
                relay: self.alias.clone(),
                message: err.to_string(),
            }
        }
    }

    async fn check_status(&self, response: reqwest::Response) -> SyncResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::AuthFailure {
                peer: self.alias.clone(),
                reason: format!("{status}: {body}"),
            },
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => SyncError::Rejected {
                relay: self.alias.clone(),
                reason: format!("{status}: {body}"),
            },
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => SyncError::Timeout {
                relay: self.alias.clone(),
            },
            _ => SyncError::ServerFailure {
                relay: self.alias.clone(),
                status: status.as_u16(),
                message: body,
            },
        })
    }
}

#[async_trait]
impl PeerConnector for HttpConnector {
    fn relay(&self) -> &str {
        &self.alias
    }

    async fn pull(&self, volume: &str, since: Option<VersionStamp>) -> SyncResult<PullResponse> {
        let body = PullRequest::new(volume, since).encode()?;
        let response = self
            .client
            .post(self.endpoint("v1/pull")?)
            .basic_auth(&self.credential.name, Some(&self.credential.password))
            .header(header::CONTENT_TYPE, CBOR_CONTENT_TYPE)
            .header(header::ACCEPT, CBOR_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;
        let response = self.check_status(response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| self.transport_error(err))?;
        let page = PullResponse::decode(&bytes)?;
        debug!(relay = %self.alias, volume, entries = page.entries.len(), "pulled page");
        Ok(page)
    }

    async fn fetch_blob(&self, volume: &str, hash: &str) -> SyncResult<Bytes> {
        let response = self
            .client
            .get(self.endpoint("v1/blob")?)
            .query(&[("volume", volume), ("hash", hash)])
            .basic_auth(&self.credential.name, Some(&self.credential.password))
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;
        let response = self.check_status(response).await?;
        let data = response
            .bytes()
            .await
            .map_err(|err| self.transport_error(err))?;
        let actual = content_hash(&data);
        if actual != hash {
            return Err(SyncError::Protocol(format!(
                "relay {} sent blob {actual} for {hash}",
                self.alias
            )));
        }
        Ok(data)
    }
}
