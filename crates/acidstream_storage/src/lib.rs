//! # acidstream storage
//!
//! Byte-stream abstraction for acidstream.
//!
//! This crate provides the lowest-level I/O abstraction the transactional
//! stream operates on. Streams are **opaque byte stores** addressed by
//! explicit offsets - they do not interpret the data they hold. The core
//! crate owns all journal format interpretation.
//!
//! ## Design Principles
//!
//! - Streams are simple positioned byte stores (read, write, resize, flush)
//! - No knowledge of journal records or headers
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Streams
//!
//! - [`MemoryStream`] - For testing and ephemeral storage
//! - [`FileStream`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use acidstream_storage::{MemoryStream, Stream};
//!
//! let mut stream = MemoryStream::new();
//! stream.write_at(0, b"hello world").unwrap();
//! let data = stream.read_at(6, 5).unwrap();
//! assert_eq!(&data, b"world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod stream;

pub use error::{StorageError, StorageResult};
pub use file::FileStream;
pub use memory::MemoryStream;
pub use stream::Stream;
