//! In-memory stream for testing.

use crate::error::{StorageError, StorageResult};
use crate::stream::Stream;
use parking_lot::RwLock;

/// An in-memory stream.
///
/// This stream stores all data in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral targets that don't need persistence
///
/// # Thread Safety
///
/// This stream is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use acidstream_storage::{MemoryStream, Stream};
///
/// let mut stream = MemoryStream::new();
/// stream.write_at(0, b"test data").unwrap();
/// assert_eq!(stream.len().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStream {
    data: RwLock<Vec<u8>>,
}

impl MemoryStream {
    /// Creates a new empty in-memory stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory stream with pre-existing content.
    ///
    /// Useful for testing rollback and recovery scenarios.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of all bytes in the stream.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Clears all data from the stream.
    pub fn clear(&mut self) {
        self.data.write().clear();
    }
}

impl Stream for MemoryStream {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let offset_usize = offset as usize;
        let end = offset_usize.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset_usize..end].to_vec())
    }

    fn write_at(&mut self, offset: u64, new_data: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        let offset_usize = offset as usize;
        let end = offset_usize + new_data.len();

        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset_usize..end].copy_from_slice(new_data);
        Ok(())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn set_len(&mut self, new_len: u64) -> StorageResult<()> {
        self.data.write().resize(new_len as usize, 0);
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        // In-memory stream has no pending writes
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        // In-memory stream has no metadata to sync
        Ok(())
    }
}
