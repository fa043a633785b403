//! Upgrade of legacy archives to the current format.

use chrono::{DateTime, FixedOffset, NaiveDateTime, SubsecRound, Utc};

use crate::archive::item::{chunks_size, ChunkRef, FileType, Item};
use crate::archive::legacy::{LegacyArchiveMeta, LegacyItem};
use crate::archive::{ArchiveMeta, ArchiveStats, SourceArchiveMeta, SourceItem, ARCHIVE_VERSION};
use crate::hardlink::{is_hardlinkable, HardlinkResolver};
use vger_types::error::{Result, VgerError};
use vger_types::hardlink_id::HardlinkId;

use super::{Upgrader, LEGACY_TO_CURRENT};

/// Legacy placeholder values that mean "not recorded".
#[derive(Debug, Clone)]
pub struct SentinelPolicy {
    /// Legacy writers stored `bsdflags = 0` when no flags were read.
    pub drop_zero_bsdflags: bool,
}

impl Default for SentinelPolicy {
    fn default() -> Self {
        Self {
            drop_zero_bsdflags: true,
        }
    }
}

/// Rewrites legacy archives: naive local timestamps become UTC instants,
/// master/slave hardlinks become symmetric `hlid` groups, sentinel values
/// and empty names are dropped, and `size` is computed from the chunks.
#[derive(Debug, Clone)]
pub struct LegacyToCurrent {
    offset: FixedOffset,
    sentinels: SentinelPolicy,
}

impl LegacyToCurrent {
    pub fn new(offset: FixedOffset, sentinels: SentinelPolicy) -> Self {
        Self { offset, sentinels }
    }

    /// Naive local time in the configured offset, as a UTC instant with
    /// microsecond precision.
    pub fn instant(&self, naive: NaiveDateTime) -> Result<DateTime<Utc>> {
        let local = naive
            .and_local_timezone(self.offset)
            .single()
            .ok_or_else(|| VgerError::InvalidFormat(format!("unrepresentable time {naive}")))?;
        Ok(local.with_timezone(&Utc).trunc_subsecs(6))
    }

    fn upgrade_legacy_meta(&self, meta: &LegacyArchiveMeta) -> Result<ArchiveMeta> {
        Ok(ArchiveMeta {
            version: ARCHIVE_VERSION,
            name: meta.name.clone(),
            hostname: meta.hostname.clone(),
            username: meta.username.clone(),
            start: self.instant(meta.time)?,
            time: self.instant(meta.time_end)?,
            comment: meta.comment.clone().filter(|c| !c.is_empty()),
            item_ptrs: Vec::new(),
            stats: ArchiveStats::default(),
        })
    }

    fn upgrade_legacy_item(&self, li: LegacyItem, hardlinks: &HardlinkResolver) -> Result<Item> {
        let Some(file_type) = FileType::from_mode(li.mode) else {
            return Err(VgerError::UnsupportedItem {
                path: li.path,
                reason: format!("unknown file type in mode {:o}", li.mode),
            });
        };

        let mut item = Item::new(li.path.clone(), li.mode, self.instant(li.mtime)?);
        item.uid = Some(li.uid);
        item.gid = Some(li.gid);
        item.user = li.user.filter(|u| !u.is_empty());
        item.group = li.group.filter(|g| !g.is_empty());
        item.atime = li.atime.map(|t| self.instant(t)).transpose()?;
        item.ctime = li.ctime.map(|t| self.instant(t)).transpose()?;
        item.xattrs = li.xattrs.filter(|x| !x.is_empty());
        item.rdev = li.rdev;
        item.bsdflags = match li.bsdflags {
            Some(0) if self.sentinels.drop_zero_bsdflags => None,
            flags => flags,
        };

        let own_chunks: Option<Vec<ChunkRef>> = li
            .chunks
            .map(|chunks| chunks.into_iter().map(ChunkRef::from).collect());

        if file_type == FileType::Symlink {
            let Some(target) = li.source else {
                return Err(VgerError::UnsupportedItem {
                    path: item.path,
                    reason: "symlink without target".into(),
                });
            };
            item.source = Some(target);
            return Ok(item);
        }

        if let Some(master_path) = li.source.as_deref().filter(|_| is_hardlinkable(li.mode)) {
            let content = hardlinks.link_slave(&item.path, master_path, own_chunks.as_deref())?;
            item.hlid = Some(content.hlid);
            item.chunks = content.chunks.clone();
            item.size = content.size;
            return Ok(item);
        }
        if li.source.is_some() {
            return Err(VgerError::UnsupportedItem {
                path: item.path,
                reason: "source set on a file type that cannot be hardlinked".into(),
            });
        }

        if file_type == FileType::Regular {
            let chunks = own_chunks.unwrap_or_default();
            let computed = chunks_size(&chunks);
            if let Some(recorded) = li.size {
                if recorded != computed {
                    return Err(VgerError::UnsupportedItem {
                        path: item.path,
                        reason: format!(
                            "recorded size {recorded} but chunks add up to {computed}"
                        ),
                    });
                }
            }
            item.set_chunks(chunks);
        }
        if li.hardlink_master == Some(true) && is_hardlinkable(li.mode) {
            item.hlid = Some(HardlinkId::from_path(&item.path));
        }
        Ok(item)
    }
}

impl Upgrader for LegacyToCurrent {
    fn name(&self) -> &'static str {
        LEGACY_TO_CURRENT
    }

    fn upgrade_archive_meta(&self, meta: &SourceArchiveMeta) -> Result<ArchiveMeta> {
        match meta {
            SourceArchiveMeta::Current(m) => Ok(m.clone()),
            SourceArchiveMeta::Legacy(m) => self.upgrade_legacy_meta(m),
        }
    }

    fn upgrade_item(&self, item: SourceItem, hardlinks: &HardlinkResolver) -> Result<Item> {
        match item {
            SourceItem::Current(item) => Ok(item),
            SourceItem::Legacy(item) => self.upgrade_legacy_item(item, hardlinks),
        }
    }
}
