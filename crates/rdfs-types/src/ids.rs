use std::fmt;

use serde::{Deserialize, Serialize};

strong_id!(
    /// Identifier of a single block within a block pool.
    BlockId,
    u64
);
strong_id!(
    /// Monotonic stamp distinguishing generations of the same block; also
    /// used as the recovery id handed to the primary replica.
    GenerationStamp,
    u64
);

/// Opaque, cluster-unique identifier of a data volume set.
///
/// Assigned on first registration and persisted by the datanode, so it
/// survives restarts and address changes. An empty storage id in a
/// registration means "never registered; please assign one".
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageId(pub String);

impl StorageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageId({})", self.0)
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for StorageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StorageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_id() {
        let id = BlockId(1234);
        assert_eq!(*id, 1234u64);
        assert_eq!(format!("{:?}", id), "BlockId(1234)");
    }

    #[test]
    fn test_generation_stamp_ord() {
        assert!(GenerationStamp(1) < GenerationStamp(2));
    }

    #[test]
    fn test_storage_id_empty() {
        assert!(StorageId::default().is_empty());
        assert!(!StorageId::new("DS-1").is_empty());
    }

    #[test]
    fn test_storage_id_display() {
        let id = StorageId::new("DS-42");
        assert_eq!(format!("{}", id), "DS-42");
        assert_eq!(format!("{:?}", id), "StorageId(DS-42)");
    }

    #[test]
    fn test_storage_id_serde() {
        let id = StorageId::new("DS-7");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"DS-7\"");
        let back: StorageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
