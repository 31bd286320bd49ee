//! Record framing for disk queue segments
//!
//! Layout: `[payload_len: u32 LE][crc32: u32 LE][payload]`.
//! The checksum covers the payload only; the length is validated against
//! the remaining segment size.

use std::io::{self, Read};

use crc32fast::Hasher;

/// Bytes preceding every payload
pub const FRAME_HEADER_LEN: u64 = 8;

/// CRC32 (IEEE) over a payload.
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Encodes a payload into a complete frame.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN as usize + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&compute_checksum(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Outcome of reading one frame from a segment.
#[derive(Debug, PartialEq, Eq)]
pub enum FrameRead {
    /// A complete, checksum-valid frame
    Record(Vec<u8>),
    /// Clean end of the readable region
    End,
    /// The region ends inside a frame
    Torn,
    /// A complete frame whose checksum does not match
    ChecksumMismatch,
}

/// Reads the next frame, never reading past `remaining` bytes.
pub fn read_frame<R: Read>(reader: &mut R, remaining: u64) -> io::Result<FrameRead> {
    if remaining == 0 {
        return Ok(FrameRead::End);
    }
    if remaining < FRAME_HEADER_LEN {
        return Ok(FrameRead::Torn);
    }

    let mut header = [0u8; FRAME_HEADER_LEN as usize];
    reader.read_exact(&mut header)?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as u64;
    let checksum = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    if FRAME_HEADER_LEN + len > remaining {
        return Ok(FrameRead::Torn);
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;

    if compute_checksum(&payload) != checksum {
        return Ok(FrameRead::ChecksumMismatch);
    }
    Ok(FrameRead::Record(payload))
}

/// Size on disk of a frame holding `payload_len` bytes.
pub fn frame_len(payload_len: usize) -> u64 {
    FRAME_HEADER_LEN + payload_len as u64
}
