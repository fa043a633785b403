use crate::archive::item::Item;
use crate::archive::{ArchiveMeta, SourceArchiveMeta, SourceItem};
use crate::hardlink::HardlinkResolver;
use vger_types::error::{Result, VgerError};

use super::{Upgrader, NOOP};

/// Copies current-format archives unchanged. Legacy archives are refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOp;

impl Upgrader for NoOp {
    fn name(&self) -> &'static str {
        NOOP
    }

    fn upgrade_archive_meta(&self, meta: &SourceArchiveMeta) -> Result<ArchiveMeta> {
        match meta {
            SourceArchiveMeta::Current(m) => Ok(m.clone()),
            SourceArchiveMeta::Legacy(m) => Err(VgerError::UnsupportedArchive {
                name: m.name.clone(),
                reason: format!(
                    "legacy archive layout, transfer with the {} upgrader",
                    super::LEGACY_TO_CURRENT
                ),
            }),
        }
    }

    fn upgrade_item(&self, item: SourceItem, _hardlinks: &HardlinkResolver) -> Result<Item> {
        match item {
            SourceItem::Current(item) => Ok(item),
            SourceItem::Legacy(item) => Err(VgerError::UnsupportedItem {
                path: item.path,
                reason: "legacy item layout".into(),
            }),
        }
    }
}
