pub mod item;
pub mod legacy;
pub mod stream;
pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::repo::format::ObjectType;
use crate::repo::manifest::ArchiveEntry;
use crate::repo::Repository;
use vger_types::archive_id::ArchiveId;
use vger_types::chunk_id::ChunkId;
use vger_types::error::{Result, VgerError};

use self::item::Item;
use self::legacy::{LegacyArchiveMeta, LegacyItem};
use self::stream::ItemIter;

/// Version tag written into current-format archive metadata.
pub const ARCHIVE_VERSION: u32 = 2;

/// Archive metadata in the current layout. Stored encrypted at
/// `archives/<id>`. The id is fixed when the archive is first created and
/// a transferred archive keeps it, so it is not derived from these bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMeta {
    pub version: u32,
    pub name: String,
    pub hostname: String,
    pub username: String,
    pub start: DateTime<Utc>,
    /// End of the backup.
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Chunks holding the serialized item stream, in order.
    pub item_ptrs: Vec<ChunkId>,
    #[serde(default)]
    pub stats: ArchiveStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveStats {
    pub nfiles: u64,
    /// Total content size over all regular files.
    pub size: u64,
}

impl ArchiveStats {
    pub fn from_items(items: &[Item]) -> Self {
        let mut stats = Self::default();
        for item in items {
            stats.nfiles += 1;
            stats.size += item.size.unwrap_or(0);
        }
        stats
    }
}

/// Archive metadata as read from a source repository.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceArchiveMeta {
    Current(ArchiveMeta),
    Legacy(LegacyArchiveMeta),
}

impl SourceArchiveMeta {
    pub fn name(&self) -> &str {
        match self {
            Self::Current(m) => &m.name,
            Self::Legacy(m) => &m.name,
        }
    }

    pub fn item_ptrs(&self) -> &[ChunkId] {
        match self {
            Self::Current(m) => &m.item_ptrs,
            Self::Legacy(m) => &m.items,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::Legacy(_))
    }

    /// Lazily decode the archive's items. Each call starts a fresh pass
    /// over the stream.
    pub fn items<'a>(&'a self, repo: &'a Repository) -> SourceItemIter<'a> {
        match self {
            Self::Current(m) => SourceItemIter::Current(ItemIter::new(repo, &m.item_ptrs)),
            Self::Legacy(m) => SourceItemIter::Legacy(ItemIter::new(repo, &m.items)),
        }
    }
}

/// One item as read from a source archive, in whichever layout it was
/// written.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceItem {
    Current(Item),
    Legacy(LegacyItem),
}

impl SourceItem {
    pub fn path(&self) -> &str {
        match self {
            Self::Current(i) => &i.path,
            Self::Legacy(i) => &i.path,
        }
    }
}

pub enum SourceItemIter<'a> {
    Current(ItemIter<'a, Item>),
    Legacy(ItemIter<'a, LegacyItem>),
}

impl Iterator for SourceItemIter<'_> {
    type Item = Result<SourceItem>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Current(it) => it.next().map(|r| r.map(SourceItem::Current)),
            Self::Legacy(it) => it.next().map(|r| r.map(SourceItem::Legacy)),
        }
    }
}

/// Read and decode an archive's metadata object.
pub fn load_archive(repo: &Repository, entry: &ArchiveEntry) -> Result<SourceArchiveMeta> {
    let (obj_type, payload) = repo.read_archive_object(&entry.id)?;
    let meta = match obj_type {
        ObjectType::ArchiveMeta => SourceArchiveMeta::Current(rmp_serde::from_slice(&payload)?),
        ObjectType::LegacyArchiveMeta => {
            SourceArchiveMeta::Legacy(rmp_serde::from_slice(&payload)?)
        }
        other => {
            return Err(VgerError::InvalidFormat(format!(
                "archive '{}' has object type {other:?}",
                entry.name
            )))
        }
    };
    if meta.name() != entry.name {
        return Err(VgerError::Integrity(format!(
            "archive metadata names '{}' but the manifest lists '{}'",
            meta.name(),
            entry.name
        )));
    }
    Ok(meta)
}

/// Find an archive by name and read its metadata.
pub fn load_archive_by_name(repo: &Repository, name: &str) -> Result<SourceArchiveMeta> {
    let entry = repo
        .manifest()
        .find_archive(name)
        .ok_or_else(|| VgerError::ArchiveNotFound(name.into()))?;
    load_archive(repo, entry)
}

/// All items of a current-format archive.
pub fn load_items(repo: &Repository, name: &str) -> Result<Vec<Item>> {
    match load_archive_by_name(repo, name)? {
        SourceArchiveMeta::Current(meta) => ItemIter::new(repo, &meta.item_ptrs).collect(),
        SourceArchiveMeta::Legacy(_) => Err(VgerError::UnsupportedArchive {
            name: name.into(),
            reason: "archive uses the legacy layout".into(),
        }),
    }
}

/// Id under which archive metadata bytes are stored in `repo`.
pub fn archive_id_for(repo: &Repository, meta_bytes: &[u8]) -> ArchiveId {
    ArchiveId::compute(repo.chunk_id_key(), meta_bytes)
}
