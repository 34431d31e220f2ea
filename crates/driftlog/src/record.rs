//! Record framing.
//!
//! Every record is a 16-byte header followed by the payload, concatenated
//! with no padding:
//!
//! ```text
//! ┌───────────┬────────────┬───────────┬──────────┐
//! │ Timestamp │ Length     │ CRC32     │ Payload  │
//! │ (8 bytes) │ (4 bytes)  │ (4 bytes) │ (L bytes)│
//! └───────────┴────────────┴───────────┴──────────┘
//! ```
//!
//! All header fields are big-endian. The timestamp is nanoseconds since the
//! Unix epoch, captured at encode time. The checksum covers the payload
//! only and is verified during segment recovery, not on individual decodes.

use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{self, Read};
use std::time::{SystemTime, UNIX_EPOCH};

/// Size of the fixed record header in bytes.
pub const RECORD_HEADER_SIZE: usize = 16;

/// A single decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Nanoseconds since the Unix epoch, captured when the record was encoded.
    pub timestamp: u64,
    /// Payload length in bytes.
    pub length: u32,
    /// CRC-32 (IEEE) of the payload.
    pub crc: u32,
    /// The payload itself.
    pub data: Bytes,
}

impl Record {
    /// Total on-disk size of the record: header plus payload.
    pub fn frame_len(&self) -> u64 {
        RECORD_HEADER_SIZE as u64 + self.length as u64
    }

    /// Whether the stored checksum matches the payload.
    pub fn crc_valid(&self) -> bool {
        crc32fast::hash(&self.data) == self.crc
    }
}

/// Encode a payload into a framed record.
pub fn encode(payload: &[u8]) -> Bytes {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    let mut frame = BytesMut::with_capacity(RECORD_HEADER_SIZE + payload.len());
    frame.put_u64(timestamp);
    frame.put_u32(payload.len() as u32);
    frame.put_u32(crc32fast::hash(payload));
    frame.put_slice(payload);
    frame.freeze()
}

/// Decode one record from `reader`.
///
/// Returns `Ok(None)` on a clean end of input (zero bytes available at a
/// record boundary). A partial header or partial payload is reported as
/// [`Error::Corruption`]. The checksum is NOT verified here.
pub fn read_record<R: Read>(reader: &mut R) -> Result<Option<Record>> {
    let mut header = [0u8; RECORD_HEADER_SIZE];
    match read_full(reader, &mut header)? {
        0 => return Ok(None),
        n if n < RECORD_HEADER_SIZE => {
            return Err(Error::Corruption(format!(
                "truncated record header ({n} of {RECORD_HEADER_SIZE} bytes)"
            )));
        }
        _ => {}
    }

    let timestamp = u64::from_be_bytes(header[0..8].try_into().unwrap());
    let length = u32::from_be_bytes(header[8..12].try_into().unwrap());
    let crc = u32::from_be_bytes(header[12..16].try_into().unwrap());

    let mut data = vec![0u8; length as usize];
    let filled = read_full(reader, &mut data)?;
    if filled == 0 && length > 0 {
        // File ended exactly after a header; treat as clean end of input.
        return Ok(None);
    }
    if filled < length as usize {
        return Err(Error::Corruption(format!(
            "truncated record payload ({filled} of {length} bytes)"
        )));
    }

    Ok(Some(Record {
        timestamp,
        length,
        crc,
        data: Bytes::from(data),
    }))
}

/// Read until `buf` is full or the reader is exhausted; returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
