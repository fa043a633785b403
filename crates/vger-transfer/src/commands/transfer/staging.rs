use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::archive::item::ChunkRef;
use crate::compress::{self, Compression};
use crate::index::IndexDelta;
use crate::repo::chunk_store::ChunkStore;
use vger_types::chunk_id::ChunkId;
use vger_types::error::{Result, VgerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkKind {
    /// File content referenced from items.
    Content,
    /// Serialized item stream of the archive being written.
    Metadata,
}

#[derive(Debug, Clone, Copy)]
enum SlotState {
    /// Already in the destination index.
    Indexed,
    /// Planned by an earlier archive of the same dry run.
    PlannedEarlier,
    /// Claimed by one worker; the physical write is in progress or failed.
    InFlight,
    Written { size: u32, stored_size: u32 },
    Planned { size: u32 },
}

#[derive(Debug)]
struct Slot {
    refs: u32,
    kind: ChunkKind,
    state: SlotState,
}

/// Result of staging one archive's chunks.
#[derive(Debug, Default)]
pub(super) struct StagingOutcome {
    pub delta: IndexDelta,
    /// Objects physically written for this archive, for cleanup on abort.
    pub written: Vec<ChunkId>,
    /// Chunks a dry run would have written.
    pub planned: Vec<ChunkId>,
    pub new_content_chunks: u64,
    pub new_content_bytes: u64,
}

/// Per-archive chunk bookkeeping shared by the copy workers.
///
/// The first reference to an id claims it under the lock and performs the
/// only physical write; later references only count. Nothing reaches the
/// destination index until the caller applies the returned delta.
pub(super) struct ChunkStaging<'a> {
    dst: &'a (dyn ChunkStore + Sync),
    src: &'a (dyn ChunkStore + Sync),
    dry_run: bool,
    overlay: &'a HashSet<ChunkId>,
    slots: Mutex<HashMap<ChunkId, Slot>>,
}

impl<'a> ChunkStaging<'a> {
    pub fn new(
        dst: &'a (dyn ChunkStore + Sync),
        src: &'a (dyn ChunkStore + Sync),
        dry_run: bool,
        overlay: &'a HashSet<ChunkId>,
    ) -> Self {
        Self {
            dst,
            src,
            dry_run,
            overlay,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Add one reference to a content chunk, copying it from the source
    /// repository if the destination does not have it yet.
    pub fn stage_content(&self, chunk: &ChunkRef) -> Result<()> {
        if !self.claim(&chunk.id, ChunkKind::Content)? {
            return Ok(());
        }
        let state = if self.dry_run {
            SlotState::Planned { size: chunk.size }
        } else {
            self.copy_from_source(chunk)?
        };
        self.settle(&chunk.id, state)
    }

    /// Add one reference to a locally produced chunk and return its id in
    /// the destination.
    pub fn stage_local(&self, data: &[u8]) -> Result<ChunkId> {
        let id = self.dst.chunk_id(data);
        if !self.claim(&id, ChunkKind::Metadata)? {
            return Ok(id);
        }
        let size = data.len() as u32;
        let state = if self.dry_run {
            SlotState::Planned { size }
        } else {
            let encoded = compress::compress(Compression::default(), data)?;
            let stored_size = self.dst.put_encoded(&id, &encoded)?;
            SlotState::Written { size, stored_size }
        };
        self.settle(&id, state)?;
        Ok(id)
    }

    pub fn into_outcome(self) -> StagingOutcome {
        let slots = self
            .slots
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut outcome = StagingOutcome::default();
        for (id, slot) in slots {
            let counted = slot.kind == ChunkKind::Content;
            match slot.state {
                SlotState::Indexed => outcome.delta.bump_refcount(&id, slot.refs),
                SlotState::PlannedEarlier | SlotState::InFlight => {}
                SlotState::Written { size, stored_size } => {
                    outcome.delta.add_new_entry(id, size, stored_size, slot.refs);
                    outcome.written.push(id);
                    if counted {
                        outcome.new_content_chunks += 1;
                        outcome.new_content_bytes += size as u64;
                    }
                }
                SlotState::Planned { size } => {
                    outcome.planned.push(id);
                    if counted {
                        outcome.new_content_chunks += 1;
                        outcome.new_content_bytes += size as u64;
                    }
                }
            }
        }
        outcome
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<ChunkId, Slot>>> {
        self.slots
            .lock()
            .map_err(|_| VgerError::Other("chunk staging lock poisoned".into()))
    }

    /// Count a reference to `id`. Returns true when the caller won the
    /// claim and must produce the chunk.
    fn claim(&self, id: &ChunkId, kind: ChunkKind) -> Result<bool> {
        let mut slots = self.lock()?;
        if let Some(slot) = slots.get_mut(id) {
            slot.refs += 1;
            return Ok(false);
        }
        let state = if self.dst.contains(id) {
            SlotState::Indexed
        } else if self.overlay.contains(id) {
            SlotState::PlannedEarlier
        } else {
            SlotState::InFlight
        };
        let claimed = matches!(state, SlotState::InFlight);
        slots.insert(
            *id,
            Slot {
                refs: 1,
                kind,
                state,
            },
        );
        Ok(claimed)
    }

    fn settle(&self, id: &ChunkId, state: SlotState) -> Result<()> {
        if let Some(slot) = self.lock()?.get_mut(id) {
            slot.state = state;
        }
        Ok(())
    }

    /// Move a chunk's encoded payload from source to destination. The
    /// payload is decoded only to check that it still hashes to its id
    /// under the destination's key.
    fn copy_from_source(&self, chunk: &ChunkRef) -> Result<SlotState> {
        let id = chunk.id;
        let encoded = self
            .src
            .get_encoded(&id)
            .map_err(|e| as_integrity(&id, e))?;
        let plain = compress::decompress(&encoded).map_err(|e| as_integrity(&id, e))?;
        if plain.len() != chunk.size as usize {
            return Err(VgerError::Integrity(format!(
                "chunk {}: {} bytes in source, item records {}",
                id.to_hex(),
                plain.len(),
                chunk.size
            )));
        }
        let actual = self.dst.chunk_id(&plain);
        if actual != id {
            return Err(VgerError::Integrity(format!(
                "chunk {} hashes to {} in the destination",
                id.to_hex(),
                actual.to_hex()
            )));
        }
        let stored_size = self.dst.put_encoded(&id, &encoded)?;
        Ok(SlotState::Written {
            size: chunk.size,
            stored_size,
        })
    }
}

/// Unreadable or undecodable source chunks are integrity failures of the
/// archive being transferred. Storage I/O errors stay as they are.
fn as_integrity(id: &ChunkId, err: VgerError) -> VgerError {
    match err {
        VgerError::Io(_) | VgerError::Integrity(_) => err,
        other => VgerError::Integrity(format!("chunk {}: {other}", id.to_hex())),
    }
}
