//! File-based stream for persistent storage.

use crate::error::{StorageError, StorageResult};
use crate::stream::Stream;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based stream.
///
/// This stream provides persistent storage using OS file APIs.
/// Data survives process restarts.
///
/// # Durability
///
/// - `flush()` calls `File::flush()` to push data to the OS
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
///
/// # Thread Safety
///
/// This stream is thread-safe. Internal locking ensures consistent access.
///
/// # Example
///
/// ```no_run
/// use acidstream_storage::{FileStream, Stream};
/// use std::path::Path;
///
/// let mut stream = FileStream::open(Path::new("data.bin")).unwrap();
/// stream.write_at(0, b"persistent data").unwrap();
/// stream.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileStream {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileStream {
    /// Opens or creates a file stream at the given path.
    ///
    /// If the file exists, it is opened for reading and writing.
    /// If it doesn't exist, a new file is created.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Opens or creates a file stream, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Stream for FileStream {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        let end = offset + data.len() as u64;
        if end > *size {
            *size = end;
        }

        Ok(())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn set_len(&mut self, new_len: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        file.set_len(new_len)?;
        *size = new_len;

        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        let mut file = self.file.write();
        file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }
}
