//! # null.fs Storage
//!
//! The two lowest storage layers of null.fs.
//!
//! - **Volume stores** implement [`StoreAdapter`], a uniform byte-level
//!   CRUD contract over the directory or object store that backs a volume.
//!   The sync engine reads and writes user files exclusively through it.
//! - **Log backends** implement [`LogBackend`], an opaque append-only byte
//!   store. The command journal owns the record format written into them.
//!
//! ## Available Stores
//!
//! - [`LocalStore`] - A directory on the local filesystem
//! - [`MemoryStore`] - A flat, object-store shaped key space kept in memory
//!
//! ## Available Log Backends
//!
//! - [`FileLog`] - Persistent, fsync-capable file
//! - [`MemoryLog`] - For tests and ephemeral volumes
//!
//! ## Example
//!
//! ```rust
//! use nullfs_storage::{LogBackend, MemoryLog};
//!
//! let mut log = MemoryLog::new();
//! let offset = log.append(b"hello world").unwrap();
//! let data = log.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod path;
mod store;

pub use backend::LogBackend;
pub use error::{StoreError, StoreResult};
pub use file::FileLog;
pub use memory::MemoryLog;
pub use path::StorePath;
pub use store::{
    content_hash, open_store, LocalStore, MemoryStore, PathStream, StoreAdapter, StoreConfig,
    StoreMeta, StoreStat,
};
