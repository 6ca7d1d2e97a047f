//! Snapshot format version

use serde::{Deserialize, Serialize};

/// Binary snapshot format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotVersion {
    pub major: u8,
    pub minor: u8,
}

/// Version written by this build
pub const CURRENT_VERSION: SnapshotVersion = SnapshotVersion { major: 1, minor: 0 };

impl SnapshotVersion {
    /// A reader accepts any snapshot with the same major version
    pub fn is_compatible_with(&self, other: &SnapshotVersion) -> bool {
        self.major == other.major
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compatibility() {
        let v1_0 = SnapshotVersion { major: 1, minor: 0 };
        let v1_3 = SnapshotVersion { major: 1, minor: 3 };
        let v2_0 = SnapshotVersion { major: 2, minor: 0 };

        assert!(v1_3.is_compatible_with(&v1_0));
        assert!(v1_0.is_compatible_with(&v1_3));
        assert!(!v2_0.is_compatible_with(&v1_0));
    }
}
