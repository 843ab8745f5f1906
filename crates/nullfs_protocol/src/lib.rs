//! # null.fs Protocol
//!
//! The data shared between nodes: journal entries, version stamps and the
//! pull messages that carry them.
//!
//! This crate provides:
//! - [`VersionStamp`] with the last-writer-wins ordering
//! - [`JournalEntry`], the record that round-trips unchanged between the
//!   journal, the pull response and the applier
//! - [`PullRequest`] / [`PullResponse`] and their CBOR encoding
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Conflict Rule
//!
//! Stamps order by counter first and origin name second. For any path the
//! entry with the greatest stamp wins, so `(node-b, 5)` beats `(node-a, 5)`
//! on every node regardless of arrival order.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod entry;
mod error;
mod messages;
mod stamp;

pub use codec::{from_cbor, to_cbor, WireMessage, CBOR_CONTENT_TYPE};
pub use entry::{
    now_millis, ApplyState, Content, EffectKind, JournalEntry, Operation, PathEffect,
};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{NodeInfo, PullRequest, PullResponse, RelaySummary, DEFAULT_PULL_LIMIT};
pub use stamp::{EntryId, VersionStamp};
