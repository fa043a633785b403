//! Pre-upgrade archive layout.
//!
//! Timestamps are naive local times, optional attributes may be stored as
//! explicit nulls, and hardlinks are asymmetric: the first member is a
//! "master" carrying the content, later members are "slaves" whose `source`
//! names the master's path and whose `size` is 0.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use vger_types::chunk_id::ChunkId;

use super::item::ChunkRef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyArchiveMeta {
    pub version: u32,
    pub name: String,
    pub hostname: String,
    pub username: String,
    /// Start of the backup, naive local time.
    pub time: NaiveDateTime,
    pub time_end: NaiveDateTime,
    pub comment: Option<String>,
    pub items: Vec<ChunkId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyChunkRef {
    pub id: ChunkId,
    pub size: u32,
    pub csize: u32,
}

impl From<LegacyChunkRef> for ChunkRef {
    fn from(c: LegacyChunkRef) -> Self {
        ChunkRef {
            id: c.id,
            size: c.size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyItem {
    pub path: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub user: Option<String>,
    pub group: Option<String>,
    pub mtime: NaiveDateTime,
    #[serde(default)]
    pub atime: Option<NaiveDateTime>,
    #[serde(default)]
    pub ctime: Option<NaiveDateTime>,
    #[serde(default)]
    pub chunks: Option<Vec<LegacyChunkRef>>,
    #[serde(default)]
    pub size: Option<u64>,
    /// Symlink target, or the master path for a hardlink slave.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub hardlink_master: Option<bool>,
    /// 0 was written for "nothing recorded".
    #[serde(default)]
    pub bsdflags: Option<u32>,
    #[serde(default)]
    pub rdev: Option<u64>,
    #[serde(default)]
    pub xattrs: Option<BTreeMap<String, Vec<u8>>>,
}

impl LegacyItem {
    pub fn new(path: impl Into<String>, mode: u32, mtime: NaiveDateTime) -> Self {
        Self {
            path: path.into(),
            mode,
            uid: 0,
            gid: 0,
            user: None,
            group: None,
            mtime,
            atime: None,
            ctime: None,
            chunks: None,
            size: None,
            source: None,
            hardlink_master: None,
            bsdflags: None,
            rdev: None,
            xattrs: None,
        }
    }

    pub fn is_hardlink_master(&self) -> bool {
        self.hardlink_master == Some(true)
    }

    /// A slave points at its master through `source`; symlinks use the
    /// same field for their target and are never slaves.
    pub fn hardlink_master_path(&self) -> Option<&str> {
        if super::item::FileType::from_mode(self.mode) == Some(super::item::FileType::Symlink) {
            return None;
        }
        self.source.as_deref()
    }
}
