use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::archive::item::{
    ChunkRef, Item, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFREG,
};
use crate::archive::legacy::{LegacyArchiveMeta, LegacyChunkRef, LegacyItem};
use crate::archive::writer::{write_archive, write_legacy_archive};
use crate::archive::{ArchiveMeta, ArchiveStats, ARCHIVE_VERSION};
use crate::compress::Compression;
use crate::repo::{EncryptionMode, Repository};
use crate::storage::StorageBackend;
use vger_crypto::key::KdfProfile;
use vger_types::archive_id::ArchiveId;
use vger_types::error::{Result, VgerError};
use vger_types::hardlink_id::HardlinkId;

pub const TEST_PASSPHRASE: &str = "test-passphrase";
pub const HARDLINK_CONTENT: &[u8] = b"hardlink content\n";
pub const UF_NODUMP: u32 = 0x0000_0001;
pub const ITEMS_CHUNK_SIZE: usize = 512;

/// In-memory storage backend. Clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn snapshot(&self) -> HashMap<String, Vec<u8>> {
        self.data.lock().unwrap().clone()
    }

    pub fn remove(&self, key: &str) {
        self.data.lock().unwrap().remove(key);
    }

    pub fn overwrite(&self, key: &str, data: Vec<u8>) {
        self.data.lock().unwrap().insert(key.to_string(), data);
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.data.lock().unwrap().contains_key(key))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix) && !k.ends_with('/'))
            .cloned()
            .collect())
    }

    fn create_dir(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

/// Memory backend whose manifest writes fail once armed.
#[derive(Clone, Default)]
pub struct FailingManifest {
    pub inner: MemoryBackend,
    armed: Arc<AtomicBool>,
}

impl FailingManifest {
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

impl StorageBackend for FailingManifest {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        if key == "manifest" && self.armed.load(Ordering::SeqCst) {
            return Err(VgerError::Other("manifest write refused".into()));
        }
        self.inner.put(key, data)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix)
    }

    fn create_dir(&self, key: &str) -> Result<()> {
        self.inner.create_dir(key)
    }
}

/// Memory backend that records every mutating call.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    pub inner: MemoryBackend,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// `put <key>` / `delete <key>` in call order.
    pub fn mutations(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn puts(&self) -> Vec<String> {
        self.mutations()
            .into_iter()
            .filter_map(|m| m.strip_prefix("put ").map(str::to_string))
            .collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }
}

impl StorageBackend for RecordingBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.log.lock().unwrap().push(format!("put {key}"));
        self.inner.put(key, data)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.log.lock().unwrap().push(format!("delete {key}"));
        self.inner.delete(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix)
    }

    fn create_dir(&self, key: &str) -> Result<()> {
        self.inner.create_dir(key)
    }
}

pub fn plaintext_repo() -> (Repository, MemoryBackend) {
    let storage = MemoryBackend::new();
    let repo = Repository::init(
        Box::new(storage.clone()),
        EncryptionMode::None,
        None,
        KdfProfile::Weak,
        None,
    )
    .expect("init plaintext repo");
    (repo, storage)
}

pub fn encrypted_repo() -> (Repository, MemoryBackend) {
    let storage = MemoryBackend::new();
    let repo = Repository::init(
        Box::new(storage.clone()),
        EncryptionMode::Aes256Gcm,
        Some(TEST_PASSPHRASE),
        KdfProfile::Weak,
        None,
    )
    .expect("init encrypted repo");
    (repo, storage)
}

/// A repository sharing `other`'s chunk id key, with recorded writes.
pub fn related_repo(other: &Repository, mode: EncryptionMode) -> (Repository, RecordingBackend) {
    let storage = RecordingBackend::new();
    let pass = (mode == EncryptionMode::Aes256Gcm).then_some(TEST_PASSPHRASE);
    let repo = Repository::init(
        Box::new(storage.clone()),
        mode,
        pass,
        KdfProfile::Weak,
        Some(other),
    )
    .expect("init related repo");
    storage.clear_log();
    (repo, storage)
}

/// Re-open a repository from its storage, as a later process would.
pub fn reopen<B: StorageBackend + Clone + 'static>(
    storage: &B,
    passphrase: Option<&str>,
) -> Repository {
    Repository::open(Box::new(storage.clone()), passphrase).expect("reopen repo")
}

pub fn naive(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32, nanos: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_nano_opt(h, min, s, nanos)
        .unwrap()
}

/// Backup start of the legacy fixture, local time at +01:00.
pub fn legacy_start() -> NaiveDateTime {
    naive(2022, 3, 14, 9, 30, 0, 123_456_789)
}

fn store(repo: &mut Repository, data: &[u8]) -> Vec<LegacyChunkRef> {
    if data.is_empty() {
        return Vec::new();
    }
    let r = repo
        .store_chunk(data, Compression::default())
        .expect("store chunk");
    vec![LegacyChunkRef {
        id: r.id,
        size: r.size,
        csize: r.size,
    }]
}

fn legacy_item(path: &str, mode: u32) -> LegacyItem {
    let mut item = LegacyItem::new(path, mode, legacy_start());
    item.uid = 1000;
    item.gid = 1000;
    item.user = Some("backup".into());
    item.group = Some("backup".into());
    item.atime = Some(naive(2022, 3, 14, 9, 31, 0, 0));
    item.ctime = Some(naive(2022, 3, 14, 9, 29, 0, 999_999_999));
    item
}

fn legacy_file(repo: &mut Repository, path: &str, data: &[u8]) -> LegacyItem {
    let mut item = legacy_item(path, S_IFREG | 0o644);
    item.chunks = Some(store(repo, data));
    item.size = Some(data.len() as u64);
    item
}

/// Items of a legacy archive like the 1.2-era test data: hardlinks, symlinks,
/// special files, xattrs, flags and unresolvable owners.
pub fn legacy_items(repo: &mut Repository) -> Vec<LegacyItem> {
    let mut items = vec![legacy_item("input", S_IFDIR | 0o755)];

    items.push(legacy_file(repo, "input/file1", b"content of file1\n"));
    items.push(legacy_file(repo, "input/empty", b""));

    let mut master = legacy_file(repo, "input/hardlink1", HARDLINK_CONTENT);
    master.hardlink_master = Some(true);
    items.push(master);
    let mut slave = legacy_item("input/hardlink2", S_IFREG | 0o644);
    slave.source = Some("input/hardlink1".into());
    slave.size = Some(0);
    items.push(slave);

    let mut symlink = legacy_item("input/symlink", S_IFLNK | 0o777);
    symlink.source = Some("target".into());
    items.push(symlink);
    let mut broken = legacy_item("input/broken_symlink", S_IFLNK | 0o777);
    broken.source = Some("doesnotexist".into());
    items.push(broken);

    items.push(legacy_item("input/fifo", S_IFIFO | 0o644));
    for (path, kind, rdev) in [
        ("input/cdev", S_IFCHR, 0x0403u64),
        ("input/bdev", S_IFBLK, 0x0801u64),
    ] {
        let mut dev = legacy_item(path, kind | 0o600);
        dev.uid = 0;
        dev.gid = 0;
        dev.user = Some("root".into());
        dev.group = Some("root".into());
        dev.rdev = Some(rdev);
        items.push(dev);
    }

    let mut xattrs = legacy_file(repo, "input/with_xattrs", b"x");
    xattrs.xattrs = Some(BTreeMap::from([
        ("key1".to_string(), b"value".to_vec()),
        ("key2".to_string(), Vec::new()),
    ]));
    items.push(xattrs);

    let mut without_flags = legacy_file(repo, "input/without_flags", b"no flags");
    without_flags.bsdflags = Some(0);
    items.push(without_flags);
    let mut with_flags = legacy_file(repo, "input/with_flags", b"nodump");
    with_flags.bsdflags = Some(UF_NODUMP);
    items.push(with_flags);

    let mut strange = legacy_file(repo, "input/strange_uid_gid", b"owner unknown");
    strange.uid = 54321;
    strange.gid = 54321;
    strange.user = None;
    strange.group = None;
    items.push(strange);

    items
}

pub fn legacy_meta(name: &str) -> LegacyArchiveMeta {
    LegacyArchiveMeta {
        version: 1,
        name: name.to_string(),
        hostname: "fixture-host".into(),
        username: "backup".into(),
        time: legacy_start(),
        time_end: naive(2022, 3, 14, 9, 31, 2, 500_000_000),
        comment: Some(String::new()),
        items: Vec::new(),
    }
}

/// Write the legacy fixture archive `name` into `repo`.
pub fn write_legacy_fixture(repo: &mut Repository, name: &str) -> ArchiveId {
    let items = legacy_items(repo);
    write_legacy_archive(repo, legacy_meta(name), &items, ITEMS_CHUNK_SIZE)
        .expect("write legacy archive")
}

pub fn current_meta(name: &str) -> ArchiveMeta {
    ArchiveMeta {
        version: ARCHIVE_VERSION,
        name: name.to_string(),
        hostname: "fixture-host".into(),
        username: "backup".into(),
        start: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 3).unwrap(),
        comment: None,
        item_ptrs: Vec::new(),
        stats: ArchiveStats::default(),
    }
}

pub fn current_file(repo: &mut Repository, path: &str, data: &[u8]) -> Item {
    let mut item = Item::new(
        path,
        S_IFREG | 0o644,
        Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap(),
    );
    item.uid = Some(1000);
    item.gid = Some(1000);
    item.user = Some("backup".into());
    item.group = Some("backup".into());
    let chunks: Vec<ChunkRef> = if data.is_empty() {
        Vec::new()
    } else {
        vec![repo
            .store_chunk(data, Compression::default())
            .expect("store chunk")]
    };
    item.set_chunks(chunks);
    item
}

/// Current-format items: a directory, two files with equal content and a
/// two-member hardlink group.
pub fn current_items(repo: &mut Repository) -> Vec<Item> {
    let mtime = Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap();
    let mut dir = Item::new("data", S_IFDIR | 0o755, mtime);
    dir.uid = Some(1000);
    dir.gid = Some(1000);

    let a = current_file(repo, "data/a.txt", b"same bytes in two files");
    let b = current_file(repo, "data/b.txt", b"same bytes in two files");
    let hlid = HardlinkId::from_path("data/link1");
    let mut link1 = current_file(repo, "data/link1", HARDLINK_CONTENT);
    link1.hlid = Some(hlid);
    let mut link2 = current_file(repo, "data/link2", HARDLINK_CONTENT);
    link2.hlid = Some(hlid);
    let mut symlink = Item::new("data/symlink", S_IFLNK | 0o777, mtime);
    symlink.source = Some("a.txt".into());
    vec![dir, a, b, link1, link2, symlink]
}

pub fn write_current_fixture(repo: &mut Repository, name: &str) -> ArchiveId {
    let items = current_items(repo);
    write_archive(repo, current_meta(name), &items, ITEMS_CHUNK_SIZE)
        .expect("write current archive")
}
