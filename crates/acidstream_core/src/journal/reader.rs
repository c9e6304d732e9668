//! Journal investigation and traversal.
//!
//! The journal is read purely by walking record boundaries: forward from
//! just after the header when counting, and backward from the journal end
//! during rollback. Every frame ends with a CRC32 over its metadata and
//! payload plus an 8-byte back-pointer to its own start offset, so a
//! backward step is one small read and a jump - no index file is needed.
//! Checksums are verified by [`verify_frame`] where a payload is actually
//! consumed; boundary walks stay payload-free.

use crate::error::{CoreError, CoreResult};
use crate::journal::record::{
    self, Crc32, Record, RecordKind, BACK_POINTER_LEN, FRAME_CRC_LEN, HEADER_LEN, TRAILER_LEN,
};
use acidstream_storage::Stream;

/// Chunk size for streaming a payload through the checksum.
const CRC_CHUNK: usize = 64 * 1024;

/// Summary of a journal's current contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalStats {
    /// Target length recorded when the journal session began.
    pub snapshot_len: u64,
    /// Number of pending undo records.
    pub record_count: u64,
    /// Total journal size in bytes.
    pub size: u64,
}

/// Reads the snapshot length from the journal header.
///
/// # Errors
///
/// Returns a corruption error if the journal is shorter than a header or
/// the header is malformed.
pub fn read_snapshot_len(backup: &dyn Stream) -> CoreResult<u64> {
    let size = backup.len()?;
    if size < HEADER_LEN {
        return Err(CoreError::journal_corruption(format!(
            "journal too short for header: {size} bytes"
        )));
    }
    let buf = backup.read_at(0, HEADER_LEN as usize)?;
    record::decode_header(&buf)
}

/// Reads the record whose frame starts at `offset`.
///
/// Validates that the frame lies fully inside the journal and that its
/// trailer points back to `offset`.
///
/// # Errors
///
/// Returns a corruption error for an out-of-range offset, unknown kind,
/// overrunning frame, or mismatched trailer.
pub fn read_record_at(backup: &dyn Stream, offset: u64) -> CoreResult<Record> {
    let size = backup.len()?;
    if offset < HEADER_LEN || offset >= size {
        return Err(CoreError::journal_corruption(format!(
            "record offset {offset} outside journal body (size {size})"
        )));
    }

    let tag = backup.read_at(offset, 1)?[0];
    let kind = RecordKind::from_byte(tag).ok_or_else(|| {
        CoreError::journal_corruption(format!("unknown record kind {tag} at offset {offset}"))
    })?;

    let meta_len = kind.meta_len();
    if offset + meta_len > size {
        return Err(CoreError::journal_corruption(format!(
            "record metadata at offset {offset} overruns journal end"
        )));
    }
    let meta = backup.read_at(offset, meta_len as usize)?;
    let rec = Record::decode_meta(&meta, offset)?;

    let end = rec.end_offset();
    if end > size {
        return Err(CoreError::journal_corruption(format!(
            "record at offset {offset} overruns journal end: frame ends at {end}, size {size}"
        )));
    }

    let trailer = backup.read_at(end - BACK_POINTER_LEN, BACK_POINTER_LEN as usize)?;
    let back_pointer = u64::from_le_bytes(
        trailer
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::journal_corruption("short trailer read"))?,
    );
    if back_pointer != offset {
        return Err(CoreError::journal_corruption(format!(
            "frame trailer at {} points to {back_pointer}, expected {offset}",
            end - BACK_POINTER_LEN
        )));
    }

    Ok(rec)
}

/// Reads the record whose frame ends exactly at `cursor`, stepping backward.
///
/// `cursor` is the journal end for the last record, or a previous record's
/// start offset while walking toward the header.
///
/// # Errors
///
/// Returns a corruption error if no frame can end at `cursor`.
pub fn read_record_before(backup: &dyn Stream, cursor: u64) -> CoreResult<Record> {
    if cursor < HEADER_LEN + TRAILER_LEN {
        return Err(CoreError::journal_corruption(format!(
            "no record can end at offset {cursor}"
        )));
    }

    let trailer = backup.read_at(cursor - BACK_POINTER_LEN, BACK_POINTER_LEN as usize)?;
    let offset = u64::from_le_bytes(
        trailer
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::journal_corruption("short trailer read"))?,
    );
    if offset < HEADER_LEN || offset >= cursor - TRAILER_LEN {
        return Err(CoreError::journal_corruption(format!(
            "invalid back-pointer {offset} in frame ending at {cursor}"
        )));
    }

    let rec = read_record_at(backup, offset)?;
    if rec.end_offset() != cursor {
        return Err(CoreError::journal_corruption(format!(
            "frame at {offset} ends at {}, expected {cursor}",
            rec.end_offset()
        )));
    }
    Ok(rec)
}

/// Verifies a frame's checksum by streaming its metadata and payload.
///
/// The payload is read in bounded chunks and never materialized whole.
/// Called before a record's pre-image is restored, so in-payload bit rot
/// is caught before any byte reaches the target.
///
/// # Errors
///
/// Returns a corruption error if the computed CRC32 does not match the
/// frame's stored checksum, or if reading the frame fails.
pub fn verify_frame(backup: &dyn Stream, rec: &Record) -> CoreResult<()> {
    let mut crc = Crc32::new();
    let meta = backup.read_at(rec.offset(), rec.meta_len() as usize)?;
    crc.update(&meta);

    let mut read = 0u64;
    let payload_len = rec.payload_len();
    while read < payload_len {
        let chunk = CRC_CHUNK.min((payload_len - read) as usize);
        let bytes = backup.read_at(rec.payload_offset() + read, chunk)?;
        crc.update(&bytes);
        read += chunk as u64;
    }

    let stored_at = rec.end_offset() - TRAILER_LEN;
    let stored_bytes = backup.read_at(stored_at, FRAME_CRC_LEN as usize)?;
    let stored = u32::from_le_bytes(
        stored_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::journal_corruption("short checksum read"))?,
    );

    let computed = crc.finish();
    if computed != stored {
        return Err(CoreError::journal_corruption(format!(
            "frame checksum mismatch at offset {}: stored {stored:#010x}, computed {computed:#010x}",
            rec.offset()
        )));
    }
    Ok(())
}

/// Counts pending records by walking frame boundaries forward.
///
/// Payloads are skipped over, never materialized.
///
/// # Errors
///
/// Returns a corruption error if a frame overruns the journal end or is
/// otherwise malformed. The journal must end exactly on a frame boundary.
pub fn count_records(backup: &dyn Stream) -> CoreResult<u64> {
    let size = backup.len()?;
    if size < HEADER_LEN {
        return Err(CoreError::journal_corruption(format!(
            "journal too short for header: {size} bytes"
        )));
    }

    let mut cursor = HEADER_LEN;
    let mut count = 0u64;
    while cursor < size {
        let rec = read_record_at(backup, cursor)?;
        cursor = rec.end_offset();
        count += 1;
    }
    Ok(count)
}

/// Reads all record metadata in append order.
///
/// Intended for diagnostics and tests; rollback walks backward instead.
///
/// # Errors
///
/// Returns an error if any frame is malformed.
pub fn read_all(backup: &dyn Stream) -> CoreResult<Vec<Record>> {
    let size = backup.len()?;
    let mut records = Vec::new();
    let mut cursor = HEADER_LEN;
    while cursor < size {
        let rec = read_record_at(backup, cursor)?;
        cursor = rec.end_offset();
        records.push(rec);
    }
    Ok(records)
}

/// Summarizes the journal: snapshot length, record count, and size.
///
/// # Errors
///
/// Returns an error if the header or any frame is malformed.
pub fn stats(backup: &dyn Stream) -> CoreResult<JournalStats> {
    Ok(JournalStats {
        snapshot_len: read_snapshot_len(backup)?,
        record_count: count_records(backup)?,
        size: backup.len()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::writer;
    use acidstream_storage::MemoryStream;

    fn journal_with_records(count: usize) -> (MemoryStream, Vec<Record>) {
        let target = MemoryStream::with_data(vec![0x5A; 256]);
        let mut backup = MemoryStream::new();
        writer::initialize(&mut backup, 256).unwrap();

        let mut records = Vec::new();
        for i in 0..count {
            let rec = writer::capture_write(&target, &mut backup, i as u64 * 8, 8)
                .unwrap()
                .unwrap();
            records.push(rec);
        }
        (backup, records)
    }

    #[test]
    fn snapshot_len_roundtrip() {
        let mut backup = MemoryStream::new();
        writer::initialize(&mut backup, 12345).unwrap();
        assert_eq!(read_snapshot_len(&backup).unwrap(), 12345);
    }

    #[test]
    fn snapshot_len_fails_on_empty_journal() {
        let backup = MemoryStream::new();
        assert!(matches!(
            read_snapshot_len(&backup),
            Err(CoreError::JournalCorruption { .. })
        ));
    }

    #[test]
    fn count_empty_journal() {
        let mut backup = MemoryStream::new();
        writer::initialize(&mut backup, 0).unwrap();
        assert_eq!(count_records(&backup).unwrap(), 0);
    }

    #[test]
    fn count_matches_appended_records() {
        let (backup, _) = journal_with_records(7);
        assert_eq!(count_records(&backup).unwrap(), 7);
    }

    #[test]
    fn forward_walk_matches_append_order() {
        let (backup, records) = journal_with_records(5);
        let walked = read_all(&backup).unwrap();
        assert_eq!(walked, records);
    }

    #[test]
    fn backward_walk_is_exact_reverse_of_append_order() {
        let (backup, records) = journal_with_records(6);

        let mut walked = Vec::new();
        let mut cursor = backup.len().unwrap();
        while cursor > HEADER_LEN {
            let rec = read_record_before(&backup, cursor).unwrap();
            cursor = rec.offset();
            walked.push(rec);
        }

        // Exactly K backward reads reach the header.
        assert_eq!(walked.len(), records.len());
        assert_eq!(cursor, HEADER_LEN);

        let mut reversed = records.clone();
        reversed.reverse();
        assert_eq!(walked, reversed);
    }

    #[test]
    fn backward_walk_on_empty_journal_fails() {
        let mut backup = MemoryStream::new();
        writer::initialize(&mut backup, 0).unwrap();
        assert!(read_record_before(&backup, backup.len().unwrap()).is_err());
    }

    #[test]
    fn truncated_frame_is_corruption() {
        let (mut backup, _) = journal_with_records(2);
        let size = backup.len().unwrap();
        backup.set_len(size - 3).unwrap();
        assert!(matches!(
            count_records(&backup),
            Err(CoreError::JournalCorruption { .. })
        ));
    }

    #[test]
    fn unknown_kind_is_corruption() {
        let (mut backup, records) = journal_with_records(1);
        backup.write_at(records[0].offset(), &[0xEE]).unwrap();
        assert!(matches!(
            read_record_at(&backup, records[0].offset()),
            Err(CoreError::JournalCorruption { .. })
        ));
    }

    #[test]
    fn corrupted_back_pointer_is_detected() {
        let (mut backup, records) = journal_with_records(1);
        let end = records[0].end_offset();
        backup
            .write_at(end - BACK_POINTER_LEN, &u64::MAX.to_le_bytes())
            .unwrap();
        assert!(read_record_at(&backup, records[0].offset()).is_err());
        assert!(read_record_before(&backup, end).is_err());
    }

    #[test]
    fn verify_frame_accepts_intact_frames() {
        let (backup, records) = journal_with_records(3);
        for rec in &records {
            verify_frame(&backup, rec).unwrap();
        }
    }

    #[test]
    fn verify_frame_detects_payload_bit_rot() {
        let (mut backup, records) = journal_with_records(1);
        let rec = records[0];

        // Flip one payload bit; every boundary check still passes.
        let byte = backup.read_at(rec.payload_offset(), 1).unwrap()[0];
        backup
            .write_at(rec.payload_offset(), &[byte ^ 0x01])
            .unwrap();
        assert_eq!(count_records(&backup).unwrap(), 1);

        assert!(matches!(
            verify_frame(&backup, &rec),
            Err(CoreError::JournalCorruption { .. })
        ));
    }

    #[test]
    fn verify_frame_detects_metadata_tampering() {
        let (mut backup, records) = journal_with_records(1);
        let rec = records[0];

        // Rewrite the timestamp field in place; the stored CRC no longer
        // matches the frame body.
        backup
            .write_at(rec.offset() + 1, &u64::MAX.to_le_bytes())
            .unwrap();
        let reread = read_record_at(&backup, rec.offset()).unwrap();
        assert!(verify_frame(&backup, &reread).is_err());
    }

    #[test]
    fn stats_summarize_journal() {
        let (backup, _) = journal_with_records(3);
        let stats = stats(&backup).unwrap();
        assert_eq!(stats.snapshot_len, 256);
        assert_eq!(stats.record_count, 3);
        assert_eq!(stats.size, backup.len().unwrap());
    }
}
