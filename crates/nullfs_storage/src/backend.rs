//! Append-only log backend trait.

use crate::error::StoreResult;

/// An opaque append-only byte store underneath a volume journal.
///
/// Backends know nothing about journal records. They only guarantee that
/// bytes read back at an offset are the bytes appended there, and that
/// `sync` makes every appended byte survive process termination.
///
/// # Implementors
///
/// - [`super::MemoryLog`] - For testing
/// - [`super::FileLog`] - For persistent journals
pub trait LogBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::ReadPastEnd`] if the range extends past
    /// the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StoreResult<Vec<u8>>;

    /// Appends data and returns the offset it was written at.
    fn append(&mut self, data: &[u8]) -> StoreResult<u64>;

    /// Pushes buffered writes to the operating system.
    fn flush(&mut self) -> StoreResult<()>;

    /// Returns the current size in bytes, which is where the next append lands.
    fn size(&self) -> StoreResult<u64>;

    /// Makes all appended data and the file length durable.
    fn sync(&mut self) -> StoreResult<()>;

    /// Discards everything after `new_size`.
    ///
    /// Used to cut a torn tail at open and to roll back a failed append.
    ///
    /// # Errors
    ///
    /// Fails if `new_size` is greater than the current size.
    fn truncate(&mut self, new_size: u64) -> StoreResult<()>;
}
