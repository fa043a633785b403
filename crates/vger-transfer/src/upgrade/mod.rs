pub mod identity;
pub mod legacy;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{FixedOffset, Offset, Utc};

use crate::archive::item::Item;
use crate::archive::{ArchiveMeta, SourceArchiveMeta, SourceItem};
use crate::hardlink::HardlinkResolver;
use vger_types::error::{Result, VgerError};

pub use self::identity::NoOp;
pub use self::legacy::{LegacyToCurrent, SentinelPolicy};

pub const NOOP: &str = "NoOp";
pub const LEGACY_TO_CURRENT: &str = "LegacyToCurrent";
/// Name the legacy upgrader is also known by.
pub const FROM_12_TO_20: &str = "From12To20";

/// Rewrites archive metadata and items into the current format.
pub trait Upgrader: Send + Sync {
    fn name(&self) -> &'static str;

    /// Current-format metadata for `meta`. `item_ptrs` and `stats` are
    /// filled in by the caller once the item stream is written.
    fn upgrade_archive_meta(&self, meta: &SourceArchiveMeta) -> Result<ArchiveMeta>;

    /// Rewrite one item. `hardlinks` has already observed the whole archive.
    fn upgrade_item(&self, item: SourceItem, hardlinks: &HardlinkResolver) -> Result<Item>;
}

/// Settings shared by the built-in upgraders.
#[derive(Debug, Clone)]
pub struct UpgradeOptions {
    /// Offset the legacy naive timestamps were recorded in.
    pub legacy_utc_offset: FixedOffset,
    pub sentinels: SentinelPolicy,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self {
            legacy_utc_offset: Utc.fix(),
            sentinels: SentinelPolicy::default(),
        }
    }
}

/// Named upgrade strategies.
pub struct UpgraderRegistry {
    entries: BTreeMap<String, Arc<dyn Upgrader>>,
}

impl UpgraderRegistry {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// `NoOp` plus `LegacyToCurrent` (alias `From12To20`).
    pub fn with_builtins(options: &UpgradeOptions) -> Self {
        let mut registry = Self::empty();
        registry.register(NOOP, Arc::new(NoOp));
        let legacy: Arc<dyn Upgrader> = Arc::new(LegacyToCurrent::new(
            options.legacy_utc_offset,
            options.sentinels.clone(),
        ));
        registry.register(LEGACY_TO_CURRENT, Arc::clone(&legacy));
        registry.register(FROM_12_TO_20, legacy);
        registry
    }

    pub fn register(&mut self, name: &str, upgrader: Arc<dyn Upgrader>) {
        self.entries.insert(name.to_string(), upgrader);
    }

    /// Look up `name`; `None` selects the identity upgrader.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn Upgrader>> {
        let name = name.unwrap_or(NOOP);
        self.entries.get(name).cloned().ok_or_else(|| {
            VgerError::Config(format!(
                "unknown upgrader '{name}' (known: {})",
                self.names().join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}
