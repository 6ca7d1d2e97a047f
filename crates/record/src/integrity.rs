//! Snapshot integrity checks
//!
//! A CRC32 of the postcard payload is stored after every snapshot frame so a
//! truncated or bit-flipped cache file is rejected instead of being imported.

use crc32fast::Hasher;

/// Compute the CRC32 checksum of a snapshot payload
#[inline]
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Verify a snapshot payload against its stored checksum
#[inline]
pub fn verify_checksum(data: &[u8], expected_checksum: u32) -> bool {
    compute_checksum(data) == expected_checksum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_deterministic() {
        let data = b"001-004";
        assert_eq!(compute_checksum(data), compute_checksum(data));
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let data = vec![0x12, 0x01, 0x00, 0x02];
        let checksum = compute_checksum(&data);

        let mut corrupted = data.clone();
        corrupted[2] ^= 0x01;

        assert!(verify_checksum(&data, checksum));
        assert!(!verify_checksum(&corrupted, checksum));
    }

    #[test]
    fn test_empty_payload() {
        assert!(verify_checksum(&[], compute_checksum(&[])));
    }
}
