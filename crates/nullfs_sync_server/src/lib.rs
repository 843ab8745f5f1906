//! # null.fs Sync Server
//!
//! The HTTP side of a relay: the endpoints downstream peers pull from.
//!
//! This crate provides:
//! - `POST /v1/pull`: CBOR pull request and response, HTTP Basic auth
//! - `GET /v1/blob?volume=..&hash=..`: content blobs by SHA-256
//! - `GET /v1/info` and `GET /v1/status`: node description and per-volume
//!   sync status as JSON, without credentials
//!
//! # Architecture
//!
//! The server holds no state of its own. Credentials are checked, volumes
//! authorized and journals read by the node's
//! [`nullfs_sync_engine::RelayService`]; handlers only translate between
//! HTTP and that service. Failures are answered as JSON `{"error": ".."}`
//! with 400, 401, 403, 404 or 500.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod error;
mod handler;
mod server;

pub use auth::{parse_basic, BasicAuth};
pub use error::{ServerError, ServerResult};
pub use handler::ServerContext;
pub use server::{PullServer, MAX_REQUEST_BYTES};
