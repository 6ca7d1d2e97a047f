//! Record error types

use thiserror::Error;

/// Errors raised while encoding or decoding topology records
#[derive(Debug, Error)]
pub enum RecordError {
    /// Malformed or incomplete JSON record (missing keys land here)
    #[error("Malformed record: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary snapshot payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    /// Field value outside the range the model can hold
    #[error("Invalid value {value} for field '{field}'")]
    InvalidField { field: &'static str, value: u64 },

    /// Snapshot does not start with the expected magic bytes
    #[error("Not a topology snapshot")]
    BadMagic,

    /// Snapshot written by an incompatible format version
    #[error(
        "Incompatible snapshot version: {major}.{minor} (expected {expected_major}.{expected_minor})"
    )]
    IncompatibleVersion {
        major: u8,
        minor: u8,
        expected_major: u8,
        expected_minor: u8,
    },

    /// Payload length exceeds maximum allowed size
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Incomplete snapshot data
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// Payload checksum does not match the trailer
    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// I/O error while reading or writing a snapshot
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for record results
pub type Result<T> = std::result::Result<T, RecordError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RecordError::IncompatibleVersion {
            major: 2,
            minor: 0,
            expected_major: 1,
            expected_minor: 0,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Incompatible snapshot version"));
        assert!(msg.contains("2.0"));
        assert!(msg.contains("1.0"));
    }

    #[test]
    fn test_checksum_mismatch_display() {
        let err = RecordError::ChecksumMismatch {
            expected: 0xdeadbeef,
            actual: 0x1,
        };
        assert!(err.to_string().contains("0xdeadbeef"));
    }
}
