use crate::archive::item::ChunkRef;
use crate::compress::Compression;
use vger_types::chunk_id::ChunkId;
use vger_types::error::{Result, VgerError};

use super::Repository;

/// Content-addressed, reference-counted chunk storage.
///
/// Refcount changes are in-memory until the owner persists its index. The
/// `&self` methods are what a transfer uses from its workers: they move
/// codec-tagged payloads as they are and leave reference counting to the
/// caller's index delta.
pub trait ChunkStore {
    /// Id under which `data` is stored (keyed hash of the plaintext).
    fn chunk_id(&self, data: &[u8]) -> ChunkId;

    /// Whether the store already counts references to `id`.
    fn contains(&self, id: &ChunkId) -> bool;

    /// Codec-tagged payload of a stored chunk, not decoded.
    /// `IntegrityError` if the object is missing.
    fn get_encoded(&self, id: &ChunkId) -> Result<Vec<u8>>;

    /// Write a codec-tagged payload under `id` without adding a reference.
    /// Returns the size of the stored object.
    fn put_encoded(&self, id: &ChunkId, encoded: &[u8]) -> Result<u32>;

    /// Plaintext bytes of a chunk, or `None` if the store does not hold it.
    fn lookup(&self, id: &ChunkId) -> Result<Option<Vec<u8>>>;

    /// Store `data` under `id`. Re-putting a known id only adds a reference.
    /// `IntegrityError` if the bytes do not hash to `id`.
    fn put(&mut self, id: ChunkId, data: &[u8]) -> Result<ChunkRef>;

    /// Plaintext size of a stored chunk.
    fn get_size(&self, id: &ChunkId) -> Option<u64>;

    fn increment_ref(&mut self, id: &ChunkId) -> Result<u32>;

    /// Drop a reference; the object is deleted when none remain.
    fn decrement_ref(&mut self, id: &ChunkId) -> Result<u32>;
}

fn not_indexed(id: &ChunkId) -> VgerError {
    VgerError::Integrity(format!("chunk {} is not in the index", id.to_hex()))
}

impl ChunkStore for Repository {
    fn chunk_id(&self, data: &[u8]) -> ChunkId {
        self.compute_chunk_id(data)
    }

    fn contains(&self, id: &ChunkId) -> bool {
        self.chunk_index().contains(id)
    }

    fn get_encoded(&self, id: &ChunkId) -> Result<Vec<u8>> {
        self.read_chunk_encoded(id)
    }

    fn put_encoded(&self, id: &ChunkId, encoded: &[u8]) -> Result<u32> {
        self.write_chunk_encoded(id, encoded)
    }

    fn lookup(&self, id: &ChunkId) -> Result<Option<Vec<u8>>> {
        if !ChunkStore::contains(self, id) {
            return Ok(None);
        }
        self.read_chunk(id).map(Some)
    }

    fn put(&mut self, id: ChunkId, data: &[u8]) -> Result<ChunkRef> {
        let actual = self.compute_chunk_id(data);
        if actual != id {
            return Err(VgerError::Integrity(format!(
                "chunk bytes hash to {} but were stored as {}",
                actual.to_hex(),
                id.to_hex()
            )));
        }
        self.store_chunk_with_id(id, data, Compression::default())
    }

    fn get_size(&self, id: &ChunkId) -> Option<u64> {
        self.chunk_index().get(id).map(|e| e.size as u64)
    }

    fn increment_ref(&mut self, id: &ChunkId) -> Result<u32> {
        self.chunk_index_mut()
            .increment_refcount(id)
            .ok_or_else(|| not_indexed(id))
    }

    fn decrement_ref(&mut self, id: &ChunkId) -> Result<u32> {
        let rc = self
            .chunk_index_mut()
            .decrement(id)
            .ok_or_else(|| not_indexed(id))?;
        if rc == 0 {
            self.storage.delete(&id.storage_key())?;
        }
        Ok(rc)
    }
}
