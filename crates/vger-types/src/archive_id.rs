use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chunk_id::ChunkId;

/// A 32-byte archive identifier: the content id of the archive metadata as
/// first written. A transferred archive keeps its source id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveId(pub [u8; 32]);

impl ArchiveId {
    pub fn compute(key: &[u8; 32], meta_bytes: &[u8]) -> Self {
        ArchiveId(ChunkId::compute(key, meta_bytes).0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Storage key path: `archives/<hex>`.
    pub fn storage_key(&self) -> String {
        format!("archives/{}", self.to_hex())
    }

    pub fn from_hex(hex_str: &str) -> std::result::Result<Self, String> {
        ChunkId::from_hex(hex_str).map(|c| ArchiveId(c.0))
    }

    /// Raw bytes for use as AAD context.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ArchiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchiveId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ArchiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}
