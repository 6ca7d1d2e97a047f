//! Record encoding and decoding
//!
//! JSON is the interchange format. The binary snapshot is a compact cache
//! format built on postcard:
//!
//! ```text
//! [Magic: "UTOP"][major: u8][minor: u8][Length: u32 BE][postcard payload][CRC32: u32 BE]
//! ```
//!
//! Maximum payload size is 32 MiB.

use crate::integrity::{compute_checksum, verify_checksum};
use crate::{CURRENT_VERSION, DeviceRecord, RecordError, Result, SnapshotVersion};
use bytes::{Buf, BufMut, BytesMut};
use std::io::{Read, Write};

/// Maximum allowed snapshot payload size (32 MiB)
pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

/// Magic bytes at the start of every snapshot
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"UTOP";

/// Magic + version + length prefix
const HEADER_LEN: usize = 4 + 2 + 4;
const TRAILER_LEN: usize = 4;

/// Encode a list of device records as a JSON array
pub fn encode_json(devices: &[DeviceRecord]) -> Result<String> {
    serde_json::to_string_pretty(devices).map_err(RecordError::from)
}

/// Decode a JSON array of device records
///
/// Any missing mandatory key fails the whole import.
pub fn decode_json(json: &str) -> Result<Vec<DeviceRecord>> {
    serde_json::from_str(json).map_err(RecordError::from)
}

/// Encode a single device record as JSON
pub fn encode_device_json(device: &DeviceRecord) -> Result<String> {
    serde_json::to_string(device).map_err(RecordError::from)
}

/// Decode a single device record from JSON
pub fn decode_device_json(json: &str) -> Result<DeviceRecord> {
    serde_json::from_str(json).map_err(RecordError::from)
}

/// Encode device records as a framed binary snapshot
pub fn encode_snapshot(devices: &[DeviceRecord]) -> Result<Vec<u8>> {
    let payload = postcard::to_allocvec(devices)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(RecordError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    frame.put_slice(&SNAPSHOT_MAGIC);
    frame.put_u8(CURRENT_VERSION.major);
    frame.put_u8(CURRENT_VERSION.minor);
    frame.put_u32(payload.len() as u32);
    frame.put_slice(&payload);
    frame.put_u32(compute_checksum(&payload));

    Ok(frame.to_vec())
}

/// Decode a framed binary snapshot
pub fn decode_snapshot(frame: &[u8]) -> Result<Vec<DeviceRecord>> {
    if frame.len() < HEADER_LEN {
        return Err(RecordError::IncompleteFrame {
            expected: HEADER_LEN,
            actual: frame.len(),
        });
    }

    let mut buf = frame;
    if buf[..4] != SNAPSHOT_MAGIC {
        return Err(RecordError::BadMagic);
    }
    buf.advance(4);

    let version = SnapshotVersion {
        major: buf.get_u8(),
        minor: buf.get_u8(),
    };
    validate_version(&version)?;

    let length = buf.get_u32() as usize;
    if length > MAX_FRAME_SIZE {
        return Err(RecordError::FrameTooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }

    if buf.remaining() < length + TRAILER_LEN {
        return Err(RecordError::IncompleteFrame {
            expected: HEADER_LEN + length + TRAILER_LEN,
            actual: frame.len(),
        });
    }

    let payload = &buf[..length];
    buf.advance(length);
    let checksum = buf.get_u32();

    if !verify_checksum(payload, checksum) {
        return Err(RecordError::ChecksumMismatch {
            expected: checksum,
            actual: compute_checksum(payload),
        });
    }

    postcard::from_bytes(payload).map_err(RecordError::from)
}

/// Reject snapshots written with a different major version
fn validate_version(version: &SnapshotVersion) -> Result<()> {
    if !CURRENT_VERSION.is_compatible_with(version) {
        return Err(RecordError::IncompatibleVersion {
            major: version.major,
            minor: version.minor,
            expected_major: CURRENT_VERSION.major,
            expected_minor: CURRENT_VERSION.minor,
        });
    }
    Ok(())
}

/// Write a snapshot to a writer (e.g., a cache file)
pub fn write_snapshot<W: Write>(writer: &mut W, devices: &[DeviceRecord]) -> Result<()> {
    let frame = encode_snapshot(devices)?;
    writer.write_all(&frame)?;
    Ok(())
}

/// Read one snapshot from a reader
pub fn read_snapshot<R: Read>(reader: &mut R) -> Result<Vec<DeviceRecord>> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;

    let length = u32::from_be_bytes([header[6], header[7], header[8], header[9]]) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(RecordError::FrameTooLarge {
            size: length,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + length + TRAILER_LEN);
    frame.extend_from_slice(&header);
    frame.resize(HEADER_LEN + length + TRAILER_LEN, 0);
    reader.read_exact(&mut frame[HEADER_LEN..])?;

    decode_snapshot(&frame)
}
