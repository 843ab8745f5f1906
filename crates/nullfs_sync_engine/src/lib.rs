//! # null.fs Sync Engine
//!
//! Everything a node does with its volumes between the journal and the
//! network.
//!
//! This crate provides:
//! - Node configuration (YAML) and its validation
//! - The access gate: who may pull a volume from us, and which relays we
//!   accept entries from
//! - The relay service answering downstream pulls
//! - Peer connectors (HTTP and in-process) for pulling from relays
//! - The change scanner, the applier and the per-volume state machine
//!   (idle → scanning → pulling → applying → idle)
//! - Startup recovery of entries left pending by a crash
//!
//! ## Architecture
//!
//! Nodes only ever pull. Each volume pulls from its configured relays on a
//! timer, appends what it receives to its journal as pending, applies it
//! to the volume store with last-writer-wins per path, and only then
//! advances that relay's cursor. What a node has applied becomes available
//! to its own downstream peers, so access propagates hop by hop: every
//! node authenticates only the peers it is configured with.
//!
//! ## Key Invariants
//!
//! - A relay serves only committed entries, in its journal order
//! - A cursor never moves past an entry that is not yet applied
//! - The same set of entries applied in any order yields the same store
//! - A journal write failure halts the volume instead of losing data

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod access;
mod applier;
mod config;
mod error;
mod http;
mod node;
mod recovery;
mod relay;
mod scanner;
mod state;
mod status;
mod transport;

pub use access::{AccessGate, Direction, Identity};
pub use applier::{Applier, ApplyFailure, ApplyReport};
pub use config::{Credential, NodeConfig, RelayNode, VolumeConfig};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use http::HttpConnector;
pub use node::{ConnectorFactory, Node, NodeBuilder};
pub use recovery::{RecoveryManager, RecoveryReport, VolumeRecovery};
pub use relay::{RelayService, MAX_PULL_LIMIT};
pub use scanner::{ChangeScanner, HashCache, ScanReport};
pub use state::{CycleReport, SyncState, VolumeSync, DEFAULT_MAX_PAGES};
pub use status::{ErrorReport, RelayStatus, StatusBoard, VolumeStatus};
pub use transport::{InProcessConnector, PeerConnector};
