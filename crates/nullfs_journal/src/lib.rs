//! # null.fs Journal
//!
//! Durable per-volume state of a null.fs node.
//!
//! - [`VolumeJournal`] - append-only log of every mutation to a volume,
//!   local or fetched from a relay, with its apply state
//! - [`CursorStore`] - how far this node has read each relay, and how far
//!   each downstream peer has read this node
//! - [`BlobStore`] - content-addressed payloads too large to inline
//! - [`VolumeState`] - all three opened together under an exclusive lock
//!
//! ## Record Format
//!
//! The journal is a sequence of framed records (see [`record`]): entries,
//! commit markers that flip entries from pending to committed, and a
//! horizon header written by compaction. A torn final record left by a
//! crash is discarded on open. Damage anywhere else is reported as
//! [`JournalError::Corrupted`].
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use nullfs_journal::{QueryOptions, VolumeJournal};
//! use nullfs_protocol::{Content, Operation};
//!
//! let journal = VolumeJournal::in_memory("docs", "node-a");
//! let (id, entry) = journal
//!     .append_local("notes.txt", Operation::Create, Content::Inline(Bytes::from_static(b"hi")))
//!     .unwrap();
//! assert_eq!(entry.counter, 1);
//!
//! let served: Vec<_> = journal.query(QueryOptions::all().committed_only()).collect();
//! assert_eq!(served[0].0, id);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod blob;
mod cursor;
mod dir;
mod error;
mod journal;
mod query;
mod reader;
pub mod record;
mod volume;

pub use blob::BlobStore;
pub use cursor::{CursorStore, PeerPosition};
pub use dir::VolumeDir;
pub use error::{JournalError, JournalResult};
pub use journal::{CompactionStats, JournalOptions, RemoteAppend, VolumeJournal, Winner};
pub use query::{JournalQuery, QueryOptions};
pub use reader::{Frame, RecordReader};
pub use volume::VolumeState;
