//! Record framing.
//!
//! Every record is written as:
//!
//! ```text
//! +-------+-----------+-------------+---------+
//! | RPLG  | len (u32) | payload     | crc32   |
//! +-------+-----------+-------------+---------+
//!   4 B      4 B LE     len bytes     4 B LE
//! ```
//!
//! The CRC covers the header and the payload.

use crate::error::{StorageError, StorageResult};
use crate::log::LogRecord;

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"RPLG";

const HEADER_SIZE: usize = 8;
const CRC_SIZE: usize = 4;

/// Bytes added to every payload by the framing.
pub const FRAME_OVERHEAD: usize = HEADER_SIZE + CRC_SIZE;

/// Frames a payload.
///
/// # Errors
///
/// Returns [`StorageError::RecordTooLarge`] if the payload length does not fit
/// the 4-byte length field.
pub fn encode_frame(payload: &[u8]) -> StorageResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| StorageError::RecordTooLarge { len: payload.len() })?;

    let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    let crc = compute_crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Result of scanning a byte buffer for frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameScan {
    /// Every complete, valid record in order.
    pub records: Vec<LogRecord>,
    /// Length of the valid prefix (where the next append belongs).
    pub valid_len: u64,
    /// Whether bytes after `valid_len` were discarded as a torn write.
    pub torn_tail: bool,
}

/// Scans `data` for frames.
///
/// An incomplete frame, or a checksum failure in the final frame, is treated
/// as a torn tail: scanning stops and `torn_tail` is set. A bad magic or a
/// checksum failure followed by further data is corruption.
///
/// # Errors
///
/// Returns [`StorageError::Corrupted`] for damage that is not a torn tail.
pub fn scan_frames(data: &[u8]) -> StorageResult<FrameScan> {
    let mut scan = FrameScan::default();
    let mut pos = 0usize;

    while pos < data.len() {
        let remaining = data.len() - pos;
        if remaining < HEADER_SIZE {
            scan.torn_tail = true;
            break;
        }

        if data[pos..pos + 4] != FRAME_MAGIC {
            return Err(StorageError::corrupted(pos as u64, "bad frame magic"));
        }

        let len = u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]])
            as usize;
        let total = HEADER_SIZE + len + CRC_SIZE;
        if remaining < total {
            scan.torn_tail = true;
            break;
        }

        let body_end = pos + HEADER_SIZE + len;
        let stored = u32::from_le_bytes([
            data[body_end],
            data[body_end + 1],
            data[body_end + 2],
            data[body_end + 3],
        ]);
        let computed = compute_crc32(&data[pos..body_end]);
        if stored != computed {
            if pos + total == data.len() {
                scan.torn_tail = true;
                break;
            }
            return Err(StorageError::corrupted(
                pos as u64,
                format!("checksum mismatch: expected {stored:08x}, got {computed:08x}"),
            ));
        }

        scan.records.push(LogRecord {
            offset: pos as u64,
            payload: data[pos + HEADER_SIZE..body_end].to_vec(),
        });
        pos += total;
    }

    scan.valid_len = pos as u64;
    Ok(scan)
}

/// Computes the IEEE CRC-32 of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
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

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
