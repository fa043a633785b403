use serde::Serialize;
use tracing::debug;

use crate::compress::Compression;
use crate::index::IndexDelta;
use crate::repo::format::ObjectType;
use crate::repo::manifest::ArchiveEntry;
use crate::repo::Repository;
use vger_types::archive_id::ArchiveId;
use vger_types::chunk_id::ChunkId;
use vger_types::error::{Result, VgerError};

use super::item::Item;
use super::legacy::{LegacyArchiveMeta, LegacyItem};
use super::stream::ItemStreamWriter;
use super::{archive_id_for, ArchiveMeta, ArchiveStats};

/// Store `items` and publish a current-format archive described by `meta`.
/// `meta.item_ptrs` and `meta.stats` are filled in here.
pub fn write_archive(
    repo: &mut Repository,
    mut meta: ArchiveMeta,
    items: &[Item],
    items_chunk_size: usize,
) -> Result<ArchiveId> {
    ensure_name_free(repo, &meta.name)?;
    meta.item_ptrs = store_item_stream(repo, items, items_chunk_size)?;
    meta.stats = ArchiveStats::from_items(items);
    let bytes = rmp_serde::to_vec_named(&meta)?;
    publish(repo, &meta.name, ObjectType::ArchiveMeta, &bytes)
}

/// Store `items` and publish an archive in the legacy layout.
pub fn write_legacy_archive(
    repo: &mut Repository,
    mut meta: LegacyArchiveMeta,
    items: &[LegacyItem],
    items_chunk_size: usize,
) -> Result<ArchiveId> {
    ensure_name_free(repo, &meta.name)?;
    meta.items = store_item_stream(repo, items, items_chunk_size)?;
    let bytes = rmp_serde::to_vec_named(&meta)?;
    publish(repo, &meta.name, ObjectType::LegacyArchiveMeta, &bytes)
}

fn ensure_name_free(repo: &Repository, name: &str) -> Result<()> {
    if repo.manifest().find_archive(name).is_some() {
        return Err(VgerError::ArchiveAlreadyExists(name.into()));
    }
    Ok(())
}

fn store_item_stream<T: Serialize>(
    repo: &mut Repository,
    items: &[T],
    items_chunk_size: usize,
) -> Result<Vec<ChunkId>> {
    let mut writer = ItemStreamWriter::new(items_chunk_size);
    for item in items {
        writer.push(item)?;
    }
    writer
        .finish()
        .iter()
        .map(|chunk| Ok(repo.store_chunk(chunk, Compression::default())?.id))
        .collect()
}

fn publish(
    repo: &mut Repository,
    name: &str,
    obj_type: ObjectType,
    meta_bytes: &[u8],
) -> Result<ArchiveId> {
    let id = archive_id_for(repo, meta_bytes);
    repo.write_archive_object(&id, obj_type, meta_bytes)?;
    repo.commit_archive(
        ArchiveEntry {
            name: name.to_string(),
            id,
        },
        IndexDelta::new(),
    )?;
    debug!(archive = %name, id = %id, "archive written");
    Ok(id)
}
