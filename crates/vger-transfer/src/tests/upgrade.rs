use chrono::{DateTime, FixedOffset, Utc};

use crate::archive::item::{Item, S_IFDIR, S_IFREG};
use crate::archive::legacy::LegacyItem;
use crate::archive::{SourceArchiveMeta, SourceItem};
use crate::hardlink::HardlinkResolver;
use crate::testutil::{legacy_items, legacy_meta, legacy_start, plaintext_repo, UF_NODUMP};
use crate::upgrade::{
    LegacyToCurrent, NoOp, SentinelPolicy, UpgradeOptions, Upgrader, UpgraderRegistry,
    FROM_12_TO_20, LEGACY_TO_CURRENT, NOOP,
};
use vger_types::error::VgerError;
use vger_types::hardlink_id::HardlinkId;

fn plus_one_hour() -> FixedOffset {
    FixedOffset::east_opt(3600).unwrap()
}

fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn upgrader() -> LegacyToCurrent {
    LegacyToCurrent::new(plus_one_hour(), SentinelPolicy::default())
}

/// Upgrade every fixture item with both hardlink passes.
fn upgraded_fixture() -> Vec<Item> {
    let (mut repo, _) = plaintext_repo();
    let items: Vec<SourceItem> = legacy_items(&mut repo)
        .into_iter()
        .map(SourceItem::Legacy)
        .collect();
    let mut resolver = HardlinkResolver::new();
    for item in &items {
        resolver.observe(item).unwrap();
    }
    let up = upgrader();
    items
        .into_iter()
        .map(|item| {
            let item = up.upgrade_item(item, &resolver).unwrap();
            item.validate().unwrap();
            resolver.verify(&item).unwrap();
            item
        })
        .collect()
}

fn find<'a>(items: &'a [Item], path: &str) -> &'a Item {
    items
        .iter()
        .find(|i| i.path == path)
        .unwrap_or_else(|| panic!("no item {path}"))
}

#[test]
fn registry_resolves_names_and_alias() {
    let registry = UpgraderRegistry::with_builtins(&UpgradeOptions::default());
    assert_eq!(registry.resolve(None).unwrap().name(), NOOP);
    assert_eq!(registry.resolve(Some(NOOP)).unwrap().name(), NOOP);
    assert_eq!(
        registry.resolve(Some(LEGACY_TO_CURRENT)).unwrap().name(),
        LEGACY_TO_CURRENT
    );
    assert_eq!(
        registry.resolve(Some(FROM_12_TO_20)).unwrap().name(),
        LEGACY_TO_CURRENT
    );
    assert_eq!(registry.names().len(), 3);
}

#[test]
fn unknown_upgrader_is_a_configuration_error() {
    let registry = UpgraderRegistry::with_builtins(&UpgradeOptions::default());
    let err = registry.resolve(Some("From11To12")).err().unwrap();
    assert!(matches!(err, VgerError::Config(ref msg) if msg.contains("From11To12")));
}

#[test]
fn naive_times_become_utc_microseconds() {
    let t = upgrader().instant(legacy_start()).unwrap();
    assert_eq!(t, utc("2022-03-14T08:30:00.123456Z"));
}

#[test]
fn archive_meta_times_and_comment() {
    let meta = upgrader()
        .upgrade_archive_meta(&SourceArchiveMeta::Legacy(legacy_meta("archive1")))
        .unwrap();
    assert_eq!(meta.name, "archive1");
    assert_eq!(meta.version, crate::archive::ARCHIVE_VERSION);
    assert_eq!(meta.start, utc("2022-03-14T08:30:00.123456Z"));
    assert_eq!(meta.time, utc("2022-03-14T08:31:02.500000Z"));
    assert_eq!(meta.comment, None);
    assert!(meta.item_ptrs.is_empty());
}

#[test]
fn hardlinks_become_symmetric() {
    let items = upgraded_fixture();
    let one = find(&items, "input/hardlink1");
    let two = find(&items, "input/hardlink2");
    let hlid = HardlinkId::from_path("input/hardlink1");
    assert_eq!(one.hlid, Some(hlid));
    assert_eq!(two.hlid, Some(hlid));
    assert_eq!(one.size, Some(17));
    assert_eq!(two.size, Some(17));
    assert_eq!(one.chunks, two.chunks);
    assert_eq!(one.source, None);
    assert_eq!(two.source, None);
    assert_eq!(find(&items, "input/file1").hlid, None);
}

#[test]
fn bsdflags_sentinel_is_dropped_real_flags_kept() {
    let items = upgraded_fixture();
    assert_eq!(find(&items, "input/without_flags").bsdflags, None);
    assert_eq!(find(&items, "input/with_flags").bsdflags, Some(UF_NODUMP));
}

#[test]
fn sentinel_policy_can_keep_zero_flags() {
    let keep = LegacyToCurrent::new(
        plus_one_hour(),
        SentinelPolicy {
            drop_zero_bsdflags: false,
        },
    );
    let mut li = LegacyItem::new("f", S_IFREG | 0o644, legacy_start());
    li.chunks = Some(Vec::new());
    li.bsdflags = Some(0);
    let item = keep
        .upgrade_item(SourceItem::Legacy(li), &HardlinkResolver::new())
        .unwrap();
    assert_eq!(item.bsdflags, Some(0));
}

#[test]
fn unresolvable_owner_keeps_ids_only() {
    let items = upgraded_fixture();
    let strange = find(&items, "input/strange_uid_gid");
    assert_eq!(strange.uid, Some(54321));
    assert_eq!(strange.gid, Some(54321));
    assert_eq!(strange.user, None);
    assert_eq!(strange.group, None);
    assert_eq!(strange.display_user(), "54321");
    let value = serde_json::to_value(strange).unwrap();
    assert!(value.get("user").is_none());
    assert!(value.get("group").is_none());
}

#[test]
fn symlinks_and_special_files() {
    let items = upgraded_fixture();
    assert_eq!(find(&items, "input/symlink").source.as_deref(), Some("target"));
    assert_eq!(
        find(&items, "input/broken_symlink").source.as_deref(),
        Some("doesnotexist")
    );
    let cdev = find(&items, "input/cdev");
    assert_eq!(cdev.rdev, Some(0x0403));
    assert_eq!(cdev.user.as_deref(), Some("root"));
    assert_eq!(cdev.size, None);
    assert_eq!(find(&items, "input").size, None);
    assert_eq!(find(&items, "input/fifo").chunks, None);
    let xattrs = find(&items, "input/with_xattrs").xattrs.as_ref().unwrap();
    assert_eq!(xattrs["key1"], b"value");
    assert!(xattrs["key2"].is_empty());
}

#[test]
fn size_is_backfilled_from_chunks() {
    let items = upgraded_fixture();
    assert_eq!(find(&items, "input/empty").size, Some(0));
    assert_eq!(find(&items, "input/file1").size, Some(17));

    let (mut repo, _) = plaintext_repo();
    let mut li = legacy_items(&mut repo)
        .into_iter()
        .find(|i| i.path == "input/file1")
        .unwrap();
    li.size = None;
    let item = upgrader()
        .upgrade_item(SourceItem::Legacy(li), &HardlinkResolver::new())
        .unwrap();
    assert_eq!(item.size, Some(17));
}

#[test]
fn recorded_size_disagreeing_with_chunks_is_unsupported() {
    let (mut repo, _) = plaintext_repo();
    let mut li = legacy_items(&mut repo)
        .into_iter()
        .find(|i| i.path == "input/file1")
        .unwrap();
    li.size = Some(999);
    assert!(matches!(
        upgrader().upgrade_item(SourceItem::Legacy(li), &HardlinkResolver::new()),
        Err(VgerError::UnsupportedItem { path, reason })
            if path == "input/file1" && reason.contains("999")
    ));
}

#[test]
fn unknown_file_type_is_unsupported() {
    let li = LegacyItem::new("input/door", 0o644, legacy_start());
    assert!(matches!(
        upgrader().upgrade_item(SourceItem::Legacy(li), &HardlinkResolver::new()),
        Err(VgerError::UnsupportedItem { path, .. }) if path == "input/door"
    ));
}

#[test]
fn empty_names_are_dropped() {
    let mut li = LegacyItem::new("d", S_IFDIR | 0o755, legacy_start());
    li.user = Some(String::new());
    li.group = Some("staff".into());
    let item = upgrader()
        .upgrade_item(SourceItem::Legacy(li), &HardlinkResolver::new())
        .unwrap();
    assert_eq!(item.user, None);
    assert_eq!(item.group.as_deref(), Some("staff"));
}

#[test]
fn noop_refuses_legacy_input() {
    assert!(matches!(
        NoOp.upgrade_archive_meta(&SourceArchiveMeta::Legacy(legacy_meta("old"))),
        Err(VgerError::UnsupportedArchive { name, .. }) if name == "old"
    ));
    let li = LegacyItem::new("f", S_IFREG | 0o644, legacy_start());
    assert!(matches!(
        NoOp.upgrade_item(SourceItem::Legacy(li), &HardlinkResolver::new()),
        Err(VgerError::UnsupportedItem { .. })
    ));
}

#[test]
fn current_items_pass_through_both_upgraders() {
    let item = Item::new("x", S_IFDIR | 0o700, utc("2024-01-01T00:00:00Z"));
    let resolver = HardlinkResolver::new();
    assert_eq!(
        NoOp.upgrade_item(SourceItem::Current(item.clone()), &resolver).unwrap(),
        item
    );
    assert_eq!(
        upgrader()
            .upgrade_item(SourceItem::Current(item.clone()), &resolver)
            .unwrap(),
        item
    );
}
