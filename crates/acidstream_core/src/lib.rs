//! # AcidStream Core
//!
//! Transactional decorator for byte streams.
//!
//! This crate provides:
//! - An undo journal with self-describing, backward-traversable records
//! - Pre-image capture for positioned writes and length changes
//! - A rollback engine that replays the journal in reverse
//! - The [`AcidStream`] facade with blocking and suspending operation
//!   forms serialized through one gate
//! - A process-wide diagnostics registry of live instances

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod acid;
pub mod config;
pub mod error;
pub mod journal;
pub mod registry;
pub mod rollback;

pub use acid::AcidStream;
pub use config::{AcidConfig, ErrorSink};
pub use error::{CoreError, CoreResult};
pub use journal::{JournalStats, Record, RecordKind};
