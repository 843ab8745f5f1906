//! Request handlers for the pull endpoint.

use crate::auth::BasicAuth;
use crate::error::{ServerError, ServerResult};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::Json;
use nullfs_protocol::{NodeInfo, PullRequest, WireMessage, CBOR_CONTENT_TYPE};
use nullfs_sync_engine::{Node, RelayService, StatusBoard, SyncResult, VolumeStatus};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Everything the handlers need, shared across requests.
#[derive(Debug, Clone)]
pub struct ServerContext {
    relay: Arc<RelayService>,
    status: StatusBoard,
    info: Arc<NodeInfo>,
}

impl ServerContext {
    /// Creates a context from its parts.
    pub fn new(relay: Arc<RelayService>, status: StatusBoard, info: NodeInfo) -> Self {
        Self {
            relay,
            status,
            info: Arc::new(info),
        }
    }

    /// Serves the relay service and status board of `node`.
    pub fn from_node(node: &Node) -> Self {
        Self::new(node.relay_service(), node.status(), node.node_info())
    }

    /// Name of the node being served.
    pub fn node_name(&self) -> &str {
        &self.info.name
    }
}

/// Runs a relay call off the async workers; it reads the journal and
/// persists the caller's position.
async fn blocking<T: Send + 'static>(
    call: impl FnOnce() -> SyncResult<T> + Send + 'static,
) -> ServerResult<T> {
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|err| ServerError::Internal(err.to_string()))?
        .map_err(ServerError::from)
}

/// `GET /`
pub(crate) async fn index(State(ctx): State<ServerContext>) -> String {
    format!("null.fs node {}\n", ctx.info.name)
}

/// `GET /v1/info`
pub(crate) async fn info(State(ctx): State<ServerContext>) -> Json<NodeInfo> {
    Json(ctx.info.as_ref().clone())
}

/// `POST /v1/pull`
pub(crate) async fn pull(
    State(ctx): State<ServerContext>,
    BasicAuth(credential): BasicAuth,
    body: Bytes,
) -> ServerResult<Response> {
    let request = PullRequest::decode(&body)
        .map_err(|err| ServerError::BadRequest(format!("pull request: {err}")))?;
    debug!(user = %credential.name, volume = %request.volume, "pull request");

    let relay = Arc::clone(&ctx.relay);
    let page = blocking(move || relay.pull(&credential, &request)).await?;
    let encoded = page
        .encode()
        .map_err(|err| ServerError::Internal(err.to_string()))?;
    Ok(([(CONTENT_TYPE, CBOR_CONTENT_TYPE)], encoded).into_response())
}

/// Query string of `GET /v1/blob`.
#[derive(Debug, Deserialize)]
pub(crate) struct BlobQuery {
    volume: String,
    hash: String,
}

/// `GET /v1/blob?volume=..&hash=..`
pub(crate) async fn blob(
    State(ctx): State<ServerContext>,
    BasicAuth(credential): BasicAuth,
    Query(query): Query<BlobQuery>,
) -> ServerResult<Response> {
    let valid_hash =
        query.hash.len() == 64 && query.hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if !valid_hash {
        return Err(ServerError::BadRequest(format!(
            "{:?} is not a SHA-256 hex digest",
            query.hash
        )));
    }
    let relay = Arc::clone(&ctx.relay);
    let data = blocking(move || relay.blob(&credential, &query.volume, &query.hash)).await?;
    Ok(([(CONTENT_TYPE, "application/octet-stream")], data).into_response())
}

/// `GET /v1/status`
pub(crate) async fn status(State(ctx): State<ServerContext>) -> Json<Vec<VolumeStatus>> {
    Json(ctx.status.snapshot())
}
