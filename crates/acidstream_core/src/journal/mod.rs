//! Undo journal: record format, capture, and traversal.
//!
//! The journal (the "backup stream") is an append-only log of undo records
//! for the current transaction session. Every mutation to the target stream
//! is preceded by a record holding exactly the bytes needed to reverse it.
//!
//! ## Journal Layout
//!
//! ```text
//! | magic (4) | version (2) | snapshot length (8) |   <- header
//! | frame | frame | frame | ...                       <- one per mutation
//! ```
//!
//! Each frame is self-describing in both directions:
//!
//! ```text
//! write frame:  | tag=1 (1) | timestamp (8) | position (8) | length (8) | payload (length) | crc32 (4) | start offset (8) |
//! length frame: | tag=2 (1) | timestamp (8) | old len (8) | new len (8) | data len (8) | payload (data len) | crc32 (4) | start offset (8) |
//! ```
//!
//! The CRC32 covers the metadata and payload before it. The trailing start
//! offset lets the rollback engine walk the journal backward
//! record-by-record with no index: read the 8 bytes before the cursor, jump
//! to that offset, decode the metadata forward.
//!
//! ## Invariants
//!
//! - The journal is **append-only** between resets; frames are never
//!   modified after being written
//! - A record is **appended before** the mutation it undoes is applied
//! - Record order equals mutation order; reverse replay is LIFO undo
//! - The header's snapshot length is the restore point for a full rollback
//! - A frame's checksum is verified before its pre-image is restored
//! - Malformed frames and unknown kinds are **fatal** - no heuristic
//!   repair, no skipping

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::JournalStats;
pub use record::{Record, RecordKind};
