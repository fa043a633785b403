//! Hardlink identity for one archive.
//!
//! Legacy archives link hardlinks asymmetrically: the first member of a set
//! (the master) carries the content and later members (slaves) only name the
//! master's path in `source`. The current format gives every member the same
//! `hlid` together with the full `chunks` and `size`.
//!
//! Resolution is two-phase. The first pass over an archive records every
//! legacy master ([`HardlinkResolver::observe`]); the second pass links slaves
//! to their master ([`HardlinkResolver::link_slave`]) and checks every
//! upgraded item against its group ([`HardlinkResolver::verify`]). A resolver
//! lives for one archive and is dropped afterwards.

use std::collections::HashMap;

use crate::archive::item::{chunks_size, ChunkRef, FileType, Item};
use crate::archive::legacy::LegacyItem;
use crate::archive::SourceItem;
use vger_types::error::{Result, VgerError};
use vger_types::hardlink_id::HardlinkId;

/// What every member of one hardlink group shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardlinkContent {
    pub hlid: HardlinkId,
    /// `None` for hardlinked non-regular files (fifos, devices).
    pub chunks: Option<Vec<ChunkRef>>,
    pub size: Option<u64>,
}

#[derive(Debug)]
struct GroupRecord {
    first_path: String,
    chunks: Option<Vec<ChunkRef>>,
    size: Option<u64>,
}

#[derive(Debug, Default)]
pub struct HardlinkResolver {
    masters: HashMap<String, HardlinkContent>,
    groups: HashMap<HardlinkId, GroupRecord>,
}

/// File types that can be members of a hardlink set.
pub fn is_hardlinkable(mode: u32) -> bool {
    matches!(
        FileType::from_mode(mode),
        Some(FileType::Regular | FileType::BlockDevice | FileType::CharDevice | FileType::Fifo)
    )
}

impl HardlinkResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// First pass: record hardlink masters of a legacy archive.
    pub fn observe(&mut self, item: &SourceItem) -> Result<()> {
        match item {
            SourceItem::Legacy(legacy) => self.observe_legacy(legacy),
            SourceItem::Current(_) => Ok(()),
        }
    }

    fn observe_legacy(&mut self, item: &LegacyItem) -> Result<()> {
        if !item.is_hardlink_master() || !is_hardlinkable(item.mode) {
            return Ok(());
        }
        let content = legacy_master_content(item);
        if let Some(existing) = self.masters.get(&item.path) {
            if *existing != content {
                return Err(VgerError::DedupMismatch {
                    path: item.path.clone(),
                    hlid: content.hlid.to_hex(),
                    detail: "path recorded twice as hardlink master with different content"
                        .into(),
                });
            }
            return Ok(());
        }
        self.masters.insert(item.path.clone(), content);
        Ok(())
    }

    /// Content of the master a legacy slave at `path` points to.
    ///
    /// `own_chunks` are chunks the slave itself carries, if any; they must
    /// agree with the master's.
    pub fn link_slave(
        &self,
        path: &str,
        master_path: &str,
        own_chunks: Option<&[ChunkRef]>,
    ) -> Result<&HardlinkContent> {
        let content = self
            .masters
            .get(master_path)
            .ok_or_else(|| VgerError::UnsupportedItem {
                path: path.to_string(),
                reason: format!("hardlink master '{master_path}' is not in the archive"),
            })?;
        if let Some(own) = own_chunks.filter(|c| !c.is_empty()) {
            if content.chunks.as_deref() != Some(own) {
                return Err(VgerError::DedupMismatch {
                    path: path.to_string(),
                    hlid: content.hlid.to_hex(),
                    detail: format!("chunks differ from master '{master_path}'"),
                });
            }
        }
        Ok(content)
    }

    /// Second pass: every item claiming an `hlid` must carry the same
    /// `chunks` and `size` as the first member seen.
    pub fn verify(&mut self, item: &Item) -> Result<()> {
        let Some(hlid) = item.hlid else {
            return Ok(());
        };
        match self.groups.get(&hlid) {
            None => {
                self.groups.insert(
                    hlid,
                    GroupRecord {
                        first_path: item.path.clone(),
                        chunks: item.chunks.clone(),
                        size: item.size,
                    },
                );
                Ok(())
            }
            Some(group) if group.chunks == item.chunks && group.size == item.size => Ok(()),
            Some(group) => Err(VgerError::DedupMismatch {
                path: item.path.clone(),
                hlid: hlid.to_hex(),
                detail: format!(
                    "size {:?} / {} chunks, but '{}' has size {:?} / {} chunks",
                    item.size,
                    item.chunks.as_ref().map_or(0, Vec::len),
                    group.first_path,
                    group.size,
                    group.chunks.as_ref().map_or(0, Vec::len),
                ),
            }),
        }
    }

    pub fn master_count(&self) -> usize {
        self.masters.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

fn legacy_master_content(item: &LegacyItem) -> HardlinkContent {
    let chunks = if FileType::from_mode(item.mode) == Some(FileType::Regular) {
        Some(
            item.chunks
                .iter()
                .flatten()
                .map(|c| ChunkRef::from(*c))
                .collect::<Vec<_>>(),
        )
    } else {
        None
    };
    HardlinkContent {
        hlid: HardlinkId::from_path(&item.path),
        size: chunks.as_deref().map(chunks_size),
        chunks,
    }
}
