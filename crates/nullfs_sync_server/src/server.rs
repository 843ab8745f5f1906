//! The HTTP server.

use crate::handler::{self, ServerContext};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use nullfs_sync_engine::Node;
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Largest accepted request body. Pull requests are a few hundred bytes.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Serves a node's relay service to downstream peers.
///
/// ```no_run
/// # async fn run(node: nullfs_sync_engine::Node) -> std::io::Result<()> {
/// use nullfs_sync_server::PullServer;
///
/// PullServer::from_node(&node).serve("0.0.0.0:7400").await
/// # }
/// ```
#[derive(Debug)]
pub struct PullServer {
    context: ServerContext,
}

impl PullServer {
    /// Creates a server over `context`.
    pub fn new(context: ServerContext) -> Self {
        Self { context }
    }

    /// Creates a server for `node`.
    pub fn from_node(node: &Node) -> Self {
        Self::new(ServerContext::from_node(node))
    }

    /// Builds the router.
    pub fn into_router(self) -> Router {
        Router::new()
            .route("/", get(handler::index))
            .route("/v1/info", get(handler::info))
            .route("/v1/pull", post(handler::pull))
            .route("/v1/blob", get(handler::blob))
            .route("/v1/status", get(handler::status))
            .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
            .layer(TraceLayer::new_for_http())
            .with_state(self.context)
    }

    /// Binds `addr` and serves until the process exits.
    pub async fn serve(self, addr: &str) -> std::io::Result<()> {
        self.serve_with_shutdown(addr, std::future::pending()).await
    }

    /// Binds `addr` and serves until `shutdown` completes. In-flight
    /// requests are allowed to finish.
    pub async fn serve_with_shutdown(
        self,
        addr: &str,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener, shutdown).await
    }

    /// Serves on an already bound listener until `shutdown` completes.
    pub async fn serve_listener(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let node = self.context.node_name().to_string();
        let addr = listener.local_addr()?;
        info!(node = %node, %addr, "pull endpoint listening");
        axum::serve(listener, self.into_router())
            .with_graceful_shutdown(shutdown)
            .await?;
        info!(node = %node, "pull endpoint stopped");
        Ok(())
    }
}
