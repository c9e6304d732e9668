//! Journal capture and append.
//!
//! Every mutating operation on the target goes through one of the capture
//! functions here *before* the mutation is applied. Each function reads the
//! pre-image the mutation is about to destroy, assembles a record frame, and
//! appends it to the backup stream. If anything fails during capture the
//! error propagates and the target is never touched, so the journal always
//! holds enough information to undo everything actually applied.

use crate::error::CoreResult;
use crate::journal::record::{self, unix_millis, Record};
use acidstream_storage::Stream;

/// Resets the journal to a fresh header with the given snapshot length.
///
/// Called on construction, after commit, and after a completed rollback.
///
/// # Errors
///
/// Returns an error if truncating or writing the backup stream fails.
pub fn initialize(backup: &mut dyn Stream, snapshot_len: u64) -> CoreResult<()> {
    backup.set_len(0)?;
    backup.append(&record::encode_header(snapshot_len))?;
    Ok(())
}

/// Captures the pre-image of a write of `len` bytes at `position`.
///
/// Only the region overlapping the target's current content is captured;
/// a write entirely past the current end is a pure append with nothing to
/// restore, and produces no record.
///
/// # Errors
///
/// Returns an error if reading the target or appending to the backup fails.
pub fn capture_write(
    target: &dyn Stream,
    backup: &mut dyn Stream,
    position: u64,
    len: u64,
) -> CoreResult<Option<Record>> {
    let target_len = target.len()?;
    if len == 0 || position >= target_len {
        return Ok(None);
    }

    let captured = len.min(target_len - position);
    let payload = target.read_at(position, captured as usize)?;

    let rec = Record::Write {
        offset: backup.len()?,
        timestamp: unix_millis(),
        position,
        length: captured,
    };
    backup.append(&rec.encode_frame(&payload)?)?;
    Ok(Some(rec))
}

/// Captures the pre-image of a length change to `new_len`.
///
/// Shrinking captures the bytes being truncated away; growing captures only
/// the old length. A no-op change produces no record.
///
/// # Errors
///
/// Returns an error if reading the target or appending to the backup fails.
pub fn capture_set_len(
    target: &dyn Stream,
    backup: &mut dyn Stream,
    new_len: u64,
) -> CoreResult<Option<Record>> {
    let old_len = target.len()?;
    if new_len == old_len {
        return Ok(None);
    }

    let offset = backup.len()?;
    let timestamp = unix_millis();

    let rec = if new_len < old_len {
        let data_len = old_len - new_len;
        let payload = target.read_at(new_len, data_len as usize)?;
        let rec = Record::Length {
            offset,
            timestamp,
            old_len,
            new_len,
            data_len,
        };
        backup.append(&rec.encode_frame(&payload)?)?;
        rec
    } else {
        let rec = Record::Length {
            offset,
            timestamp,
            old_len,
            new_len,
            data_len: 0,
        };
        backup.append(&rec.encode_frame(&[])?)?;
        rec
    };

    Ok(Some(rec))
}
