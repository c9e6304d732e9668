//! Journal record types and serialization.

use crate::error::{CoreError, CoreResult};
use std::time::{SystemTime, UNIX_EPOCH};

/// Magic bytes identifying a journal header.
pub const JOURNAL_MAGIC: [u8; 4] = *b"AJRN";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// Journal header size.
/// magic (4) + version (2) + snapshot length (8) = 14 bytes
pub const HEADER_LEN: u64 = 14;

/// Metadata size of a write frame.
/// tag (1) + timestamp (8) + position (8) + length (8) = 25 bytes
pub const WRITE_META_LEN: u64 = 25;

/// Metadata size of a length frame.
/// tag (1) + timestamp (8) + old length (8) + new length (8) + data length (8) = 33 bytes
pub const LENGTH_META_LEN: u64 = 33;

/// Size of the CRC32 checksum field in a frame trailer.
pub const FRAME_CRC_LEN: u64 = 4;

/// Size of the back-pointer field in a frame trailer.
pub const BACK_POINTER_LEN: u64 = 8;

/// Size of the trailer at the end of every frame.
///
/// The trailer holds a CRC32 over the frame's metadata and payload,
/// followed by the frame's own start offset so that backward traversal is
/// a single 8-byte read followed by a jump.
pub const TRAILER_LEN: u64 = FRAME_CRC_LEN + BACK_POINTER_LEN;

/// Kind of journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// A byte-range pre-image captured before an overwrite.
    Write = 1,
    /// A length pre-image captured before a length change.
    Length = 2,
}

impl RecordKind {
    /// Converts a byte to a record kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Write),
            2 => Some(Self::Length),
            _ => None,
        }
    }

    /// Converts the record kind to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns the fixed metadata size for this kind.
    #[must_use]
    pub const fn meta_len(self) -> u64 {
        match self {
            Self::Write => WRITE_META_LEN,
            Self::Length => LENGTH_META_LEN,
        }
    }
}

/// One undo unit in the journal.
///
/// Records hold metadata only; payload bytes are streamed between the
/// backup and target streams and never materialized inside a `Record`.
/// Every record knows its own start offset within the journal, which is
/// what makes index-free reverse traversal possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    /// Pre-image of an overwritten byte range.
    Write {
        /// Journal offset where this record's frame starts.
        offset: u64,
        /// Capture time, milliseconds since the Unix epoch.
        timestamp: u64,
        /// Target offset that was overwritten.
        position: u64,
        /// Number of original bytes captured in the payload.
        length: u64,
    },

    /// Pre-image of a length change.
    ///
    /// Shrinking captures the truncated tail (`data_len = old_len - new_len`).
    /// Growing captures nothing (`data_len = 0`); restoring only needs
    /// `old_len` to re-truncate.
    Length {
        /// Journal offset where this record's frame starts.
        offset: u64,
        /// Capture time, milliseconds since the Unix epoch.
        timestamp: u64,
        /// Target length before the change.
        old_len: u64,
        /// Target length after the change.
        new_len: u64,
        /// Number of payload bytes (zero when growing).
        data_len: u64,
    },
}

impl Record {
    /// Returns the record kind.
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Write { .. } => RecordKind::Write,
            Self::Length { .. } => RecordKind::Length,
        }
    }

    /// Returns the journal offset where this record's frame starts.
    #[must_use]
    pub fn offset(&self) -> u64 {
        match self {
            Self::Write { offset, .. } | Self::Length { offset, .. } => *offset,
        }
    }

    /// Returns the capture timestamp in milliseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Write { timestamp, .. } | Self::Length { timestamp, .. } => *timestamp,
        }
    }

    /// Returns the fixed metadata size of this record's frame.
    #[must_use]
    pub fn meta_len(&self) -> u64 {
        self.kind().meta_len()
    }

    /// Returns the number of payload bytes following the metadata.
    #[must_use]
    pub fn payload_len(&self) -> u64 {
        match self {
            Self::Write { length, .. } => *length,
            Self::Length { data_len, .. } => *data_len,
        }
    }

    /// Returns the journal offset of the first payload byte.
    #[must_use]
    pub fn payload_offset(&self) -> u64 {
        self.offset() + self.meta_len()
    }

    /// Returns the total on-journal size of this record's frame.
    #[must_use]
    pub fn frame_len(&self) -> u64 {
        self.meta_len() + self.payload_len() + TRAILER_LEN
    }

    /// Returns the journal offset one past the end of this record's frame.
    #[must_use]
    pub fn end_offset(&self) -> u64 {
        self.offset() + self.frame_len()
    }

    /// Serializes the full frame: metadata, payload, and trailer.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload` does not match the record's declared
    /// payload length.
    pub fn encode_frame(&self, payload: &[u8]) -> CoreResult<Vec<u8>> {
        if payload.len() as u64 != self.payload_len() {
            return Err(CoreError::invalid_operation(format!(
                "payload length {} does not match record payload length {}",
                payload.len(),
                self.payload_len()
            )));
        }

        let mut buf = Vec::with_capacity(self.frame_len() as usize);
        buf.push(self.kind().as_byte());
        buf.extend_from_slice(&self.timestamp().to_le_bytes());

        match self {
            Self::Write {
                position, length, ..
            } => {
                buf.extend_from_slice(&position.to_le_bytes());
                buf.extend_from_slice(&length.to_le_bytes());
            }
            Self::Length {
                old_len,
                new_len,
                data_len,
                ..
            } => {
                buf.extend_from_slice(&old_len.to_le_bytes());
                buf.extend_from_slice(&new_len.to_le_bytes());
                buf.extend_from_slice(&data_len.to_le_bytes());
            }
        }

        buf.extend_from_slice(payload);
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&self.offset().to_le_bytes());
        Ok(buf)
    }

    /// Deserializes record metadata from a frame starting at `offset`.
    ///
    /// `meta` must hold exactly the metadata bytes for the frame's kind.
    ///
    /// # Errors
    ///
    /// Returns a corruption error for an unknown kind tag or a truncated
    /// metadata slice.
    pub fn decode_meta(meta: &[u8], offset: u64) -> CoreResult<Self> {
        let tag = *meta
            .first()
            .ok_or_else(|| CoreError::journal_corruption("empty record metadata"))?;
        let kind = RecordKind::from_byte(tag).ok_or_else(|| {
            CoreError::journal_corruption(format!(
                "unknown record kind {tag} at offset {offset}"
            ))
        })?;

        if meta.len() as u64 != kind.meta_len() {
            return Err(CoreError::journal_corruption(format!(
                "truncated record metadata at offset {offset}: expected {} bytes, got {}",
                kind.meta_len(),
                meta.len()
            )));
        }

        let timestamp = read_u64(meta, 1);
        match kind {
            RecordKind::Write => Ok(Self::Write {
                offset,
                timestamp,
                position: read_u64(meta, 9),
                length: read_u64(meta, 17),
            }),
            RecordKind::Length => Ok(Self::Length {
                offset,
                timestamp,
                old_len: read_u64(meta, 9),
                new_len: read_u64(meta, 17),
                data_len: read_u64(meta, 25),
            }),
        }
    }
}

/// Encodes the journal header for the given snapshot length.
#[must_use]
pub fn encode_header(snapshot_len: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN as usize);
    buf.extend_from_slice(&JOURNAL_MAGIC);
    buf.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
    buf.extend_from_slice(&snapshot_len.to_le_bytes());
    buf
}

/// Decodes the journal header, returning the snapshot length.
///
/// # Errors
///
/// Returns a corruption error for a short buffer, wrong magic bytes, or an
/// unsupported version.
pub fn decode_header(buf: &[u8]) -> CoreResult<u64> {
    if buf.len() as u64 != HEADER_LEN {
        return Err(CoreError::journal_corruption(format!(
            "truncated journal header: expected {HEADER_LEN} bytes, got {}",
            buf.len()
        )));
    }
    if buf[0..4] != JOURNAL_MAGIC {
        return Err(CoreError::journal_corruption("invalid journal magic"));
    }
    let version = u16::from_le_bytes([buf[4], buf[5]]);
    if version > JOURNAL_VERSION {
        return Err(CoreError::journal_corruption(format!(
            "unsupported journal version {version}"
        )));
    }
    Ok(read_u64(buf, 6))
}

/// CRC32 lookup table (IEEE polynomial).
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xEDB8_8320;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

/// Incremental CRC32 (IEEE) over a byte stream.
///
/// Lets the reader checksum frame payloads in bounded chunks without
/// buffering them whole.
#[derive(Debug, Clone, Copy)]
pub struct Crc32(u32);

impl Crc32 {
    /// Creates a fresh checksum state.
    #[must_use]
    pub const fn new() -> Self {
        Self(0xFFFF_FFFF)
    }

    /// Feeds bytes into the checksum.
    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            let index = ((self.0 ^ u32::from(byte)) & 0xFF) as usize;
            self.0 = (self.0 >> 8) ^ CRC32_TABLE[index];
        }
    }

    /// Returns the final checksum value.
    #[must_use]
    pub const fn finish(self) -> u32 {
        !self.0
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the CRC32 checksum of `data` in one call.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(data);
    crc.finish()
}

/// Returns the current time as milliseconds since the Unix epoch.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}
