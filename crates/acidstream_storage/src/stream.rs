//! Stream trait definition.

use crate::error::StorageResult;

/// A byte-addressable stream.
///
/// Streams are **opaque byte stores** addressed by explicit offsets. They
/// provide simple operations for reading, writing, resizing, and flushing
/// data. The acidstream core owns all format interpretation - streams do
/// not understand journal headers or records.
///
/// # Invariants
///
/// - `read_at` returns exactly the requested bytes or fails; it never
///   returns a short read
/// - `write_at` past the current end extends the stream; any gap between
///   the old end and the write offset reads back as zeros
/// - `append` writes at the current end and returns the offset written at
/// - `flush` ensures all pending writes are durable
/// - Streams must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`crate::MemoryStream`] - For testing
/// - [`crate::FileStream`] - For persistent storage
pub trait Stream: Send + Sync {
    /// Reads exactly `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The read would extend beyond the current length
    /// - An I/O error occurs
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Writes `data` starting at `offset`.
    ///
    /// Writing past the current end extends the stream. A gap between the
    /// old end and `offset` is zero-filled.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Appends data at the current end of the stream.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Returns the current length of the stream in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the length cannot be determined.
    fn len(&self) -> StorageResult<u64>;

    /// Returns `true` if the stream holds no bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the length cannot be determined.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Resizes the stream to `new_len` bytes.
    ///
    /// Shrinking discards all data past `new_len`. Growing zero-fills the
    /// new region.
    ///
    /// # Errors
    ///
    /// Returns an error if the resize fails.
    fn set_len(&mut self, new_len: u64) -> StorageResult<()>;

    /// Flushes all pending writes to the underlying medium.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// This is a stronger guarantee than `flush` - it ensures that
    /// metadata (size, timestamps) is also durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;
}
