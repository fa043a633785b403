use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use vger_types::chunk_id::ChunkId;

/// Reference count and sizes of every chunk object in a repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkIndex {
    entries: HashMap<ChunkId, ChunkIndexEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkIndexEntry {
    pub refcount: u32,
    /// Plaintext length.
    pub size: u32,
    /// Length of the stored object (encoded + encrypted + envelope).
    pub stored_size: u32,
}

impl ChunkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &ChunkId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &ChunkId) -> Option<&ChunkIndexEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Record one reference to `id`, creating the entry on first sight.
    pub fn add(&mut self, id: ChunkId, size: u32, stored_size: u32) {
        self.add_with_refs(id, size, stored_size, 1);
    }

    fn add_with_refs(&mut self, id: ChunkId, size: u32, stored_size: u32, refs: u32) {
        let entry = self.entries.entry(id).or_insert(ChunkIndexEntry {
            refcount: 0,
            size,
            stored_size,
        });
        entry.refcount += refs;
    }

    /// New refcount, or `None` when `id` is not indexed.
    pub fn increment_refcount(&mut self, id: &ChunkId) -> Option<u32> {
        self.add_refs(id, 1)
    }

    fn add_refs(&mut self, id: &ChunkId, refs: u32) -> Option<u32> {
        let entry = self.entries.get_mut(id)?;
        entry.refcount += refs;
        Some(entry.refcount)
    }

    /// Drop one reference and forget the chunk at zero. New refcount, or
    /// `None` when `id` is not indexed.
    pub fn decrement(&mut self, id: &ChunkId) -> Option<u32> {
        let entry = self.entries.get_mut(id)?;
        entry.refcount = entry.refcount.saturating_sub(1);
        let left = entry.refcount;
        if left == 0 {
            self.entries.remove(id);
        }
        Some(left)
    }
}

/// Index changes of one archive, held back until the archive commits.
#[derive(Debug, Default)]
pub struct IndexDelta {
    /// Chunks first written for this archive: `(id, size, stored_size, refs)`.
    pub new_entries: Vec<(ChunkId, u32, u32, u32)>,
    /// Extra references to chunks that were already indexed.
    pub refcount_bumps: HashMap<ChunkId, u32>,
}

impl IndexDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.new_entries.is_empty() && self.refcount_bumps.is_empty()
    }

    pub fn bump_refcount(&mut self, id: &ChunkId, by: u32) {
        *self.refcount_bumps.entry(*id).or_default() += by;
    }

    pub fn add_new_entry(&mut self, id: ChunkId, size: u32, stored_size: u32, refs: u32) {
        self.new_entries.push((id, size, stored_size, refs));
    }

    pub fn apply_to(self, index: &mut ChunkIndex) {
        for (id, size, stored_size, refs) in self.new_entries {
            index.add_with_refs(id, size, stored_size, refs);
        }
        for (id, refs) in self.refcount_bumps {
            index.add_refs(&id, refs);
        }
    }
}
