use blake2::digest::consts::U32;
use blake2::digest::Mac;
use blake2::Blake2bMac;
use serde::{Deserialize, Serialize};
use std::fmt;

type KeyedBlake2b256 = Blake2bMac<U32>;

/// Content id of a chunk: keyed BLAKE2b-256 over the plaintext bytes.
///
/// Two repositories produce the same id for the same bytes only when they
/// share the chunk id key, which is what lets a transfer dedup by id alone.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(pub [u8; 32]);

impl ChunkId {
    pub fn compute(key: &[u8; 32], data: &[u8]) -> Self {
        let mut hasher =
            KeyedBlake2b256::new_from_slice(key).expect("valid 32-byte key for BLAKE2b");
        Mac::update(&mut hasher, data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize().into_bytes());
        ChunkId(out)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex_str: &str) -> std::result::Result<Self, String> {
        let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {e}"))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))?;
        Ok(ChunkId(arr))
    }

    /// First byte as a two-char hex string, used for the shard directory.
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.0[..1])
    }

    /// Storage key path: `data/<shard>/<hex>`.
    pub fn storage_key(&self) -> String {
        format!("data/{}/{}", self.shard_prefix(), self.to_hex())
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}
