//! Move archives from a source ("other") repository into a destination,
//! optionally rewriting them with an upgrader.
//!
//! Archives are processed one at a time in source manifest order. Each one
//! goes `Pending -> Streaming -> Transformed -> Committing -> Committed`; any
//! failure before the commit leaves it `Aborted` with the destination index
//! and manifest untouched.

mod staging;

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::AtomicBool;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::archive::item::{ChunkRef, Item};
use crate::archive::stream::ItemStreamWriter;
use crate::archive::{self, ArchiveStats};
use crate::commands::util::{check_interrupted, open_repo, with_repo_lock};
use crate::config::TransferConfig;
use crate::hardlink::HardlinkResolver;
use crate::passphrase::{OTHER_PASSPHRASE_ENV, PASSPHRASE_ENV};
use crate::repo::format::ObjectType;
use crate::repo::manifest::ArchiveEntry;
use crate::repo::Repository;
use crate::upgrade::{UpgradeOptions, Upgrader, UpgraderRegistry};
use vger_types::archive_id::ArchiveId;
use vger_types::chunk_id::ChunkId;
use vger_types::error::{Result, VgerError};

use self::staging::{ChunkStaging, StagingOutcome};

/// Knobs of one transfer that do not change its meaning.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub upgrade: UpgradeOptions,
    /// Exact archive names to transfer; empty means all.
    pub match_archives: Vec<String>,
    pub items_chunk_size: usize,
    /// Chunk copy workers (0 = all cores, 1 = sequential).
    pub max_threads: usize,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            upgrade: UpgradeOptions::default(),
            match_archives: Vec::new(),
            items_chunk_size: 256 * 1024,
            max_threads: 0,
        }
    }
}

impl TransferOptions {
    pub fn from_config(config: &TransferConfig) -> Result<Self> {
        Ok(Self {
            upgrade: UpgradeOptions {
                legacy_utc_offset: config.legacy_offset()?,
                ..UpgradeOptions::default()
            },
            match_archives: config.match_archives.clone(),
            items_chunk_size: config.items_chunk_size,
            max_threads: config.limits.max_threads,
        })
    }
}

pub struct TransferRequest<'a> {
    /// Upgrader name; identity when `None`.
    pub upgrader: Option<&'a str>,
    pub dry_run: bool,
    pub options: TransferOptions,
    /// Checked before each archive.
    pub shutdown: Option<&'a AtomicBool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveOutcome {
    Committed,
    SkippedExisting,
    DryRunOnly,
    Aborted(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    pub name: String,
    pub id: String,
    pub outcome: ArchiveOutcome,
    pub item_count: u64,
    /// Content chunks written (or, in a dry run, that would be written).
    pub new_chunks: u64,
    /// Plaintext bytes of those chunks.
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferTotals {
    pub committed: u64,
    pub skipped: u64,
    pub dry_run_only: u64,
    pub aborted: u64,
    pub items: u64,
    pub new_chunks: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub dry_run: bool,
    pub archives: Vec<ArchiveReport>,
    pub totals: TransferTotals,
}

impl TransferReport {
    fn new(dry_run: bool, archives: Vec<ArchiveReport>) -> Self {
        let mut totals = TransferTotals::default();
        for a in &archives {
            match a.outcome {
                ArchiveOutcome::Committed => totals.committed += 1,
                ArchiveOutcome::SkippedExisting => totals.skipped += 1,
                ArchiveOutcome::DryRunOnly => totals.dry_run_only += 1,
                ArchiveOutcome::Aborted(_) => totals.aborted += 1,
            }
            totals.items += a.item_count;
            totals.new_chunks += a.new_chunks;
            totals.bytes_written += a.bytes_written;
        }
        Self {
            dry_run,
            archives,
            totals,
        }
    }

    pub fn archive(&self, name: &str) -> Option<&ArchiveReport> {
        self.archives.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveState {
    Pending,
    Streaming,
    Transformed,
    Committing,
    Committed,
}

impl fmt::Display for ArchiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArchiveState::Pending => "pending",
            ArchiveState::Streaming => "streaming",
            ArchiveState::Transformed => "transformed",
            ArchiveState::Committing => "committing",
            ArchiveState::Committed => "committed",
        })
    }
}

/// Tracks and logs the state of the archive being transferred.
struct Progress<'a> {
    archive: &'a str,
    state: ArchiveState,
}

impl<'a> Progress<'a> {
    fn new(archive: &'a str) -> Self {
        Self {
            archive,
            state: ArchiveState::Pending,
        }
    }

    fn advance(&mut self, next: ArchiveState) {
        debug!(archive = %self.archive, from = %self.state, to = %next, "archive state");
        self.state = next;
    }
}

/// Everything shared by the archives of one run.
struct RunContext<'a> {
    src: &'a Repository,
    upgrader: &'a dyn Upgrader,
    dry_run: bool,
    options: &'a TransferOptions,
    pool: Option<&'a rayon::ThreadPool>,
    /// Chunk ids a dry run has planned so far.
    overlay: HashSet<ChunkId>,
}

/// Load config, resolve credentials, open both repositories and transfer.
/// The destination is locked for the duration of a real run.
pub fn run_with_config(
    config: &TransferConfig,
    shutdown: Option<&AtomicBool>,
) -> Result<TransferReport> {
    config.validate()?;
    let options = TransferOptions::from_config(config)?;
    UpgraderRegistry::with_builtins(&options.upgrade).resolve(config.upgrader.as_deref())?;

    let src = open_repo(
        &config.other_repository,
        &config.other_encryption,
        OTHER_PASSPHRASE_ENV,
    )?;
    let mut dst = open_repo(&config.repository, &config.encryption, PASSPHRASE_ENV)?;

    let request = TransferRequest {
        upgrader: config.upgrader.as_deref(),
        dry_run: config.dry_run,
        options,
        shutdown,
    };
    if request.dry_run {
        run(&mut dst, &src, &request)
    } else {
        with_repo_lock(&mut dst, |dst| run(dst, &src, &request))
    }
}

/// Transfer archives from `src` into `dst`.
///
/// Archive-scoped failures are recorded in the report and the next archive
/// is attempted; anything else aborts the run. A dry run writes nothing.
pub fn run(
    dst: &mut Repository,
    src: &Repository,
    request: &TransferRequest<'_>,
) -> Result<TransferReport> {
    let registry = UpgraderRegistry::with_builtins(&request.options.upgrade);
    let upgrader = registry.resolve(request.upgrader)?;
    check_compatible(dst, src)?;
    let pool = build_transform_pool(request.options.max_threads)?;

    let mut ctx = RunContext {
        src,
        upgrader: upgrader.as_ref(),
        dry_run: request.dry_run,
        options: &request.options,
        pool: pool.as_ref(),
        overlay: HashSet::new(),
    };

    let wanted: HashSet<&str> = request
        .options
        .match_archives
        .iter()
        .map(String::as_str)
        .collect();
    for name in &wanted {
        if src.manifest().find_archive(name).is_none() {
            warn!(archive = %name, "no such archive in the source repository");
        }
    }

    let mut reports = Vec::new();
    for entry in &src.manifest().archives {
        if !wanted.is_empty() && !wanted.contains(entry.name.as_str()) {
            continue;
        }
        check_interrupted(request.shutdown)?;

        if dst.manifest().find_by_id(&entry.id).is_some() {
            info!(archive = %entry.name, "already in destination, skipping");
            reports.push(ArchiveReport {
                name: entry.name.clone(),
                id: entry.id.to_hex(),
                outcome: ArchiveOutcome::SkippedExisting,
                item_count: 0,
                new_chunks: 0,
                bytes_written: 0,
            });
            continue;
        }

        match transfer_archive(dst, &mut ctx, entry) {
            Ok(report) => reports.push(report),
            Err(err) if err.is_archive_scoped() => {
                warn!(archive = %entry.name, error = %err, "archive aborted");
                reports.push(ArchiveReport {
                    name: entry.name.clone(),
                    id: entry.id.to_hex(),
                    outcome: ArchiveOutcome::Aborted(err.to_string()),
                    item_count: 0,
                    new_chunks: 0,
                    bytes_written: 0,
                });
            }
            Err(err) => return Err(err),
        }
    }

    let report = TransferReport::new(request.dry_run, reports);
    info!(
        upgrader = upgrader.name(),
        dry_run = request.dry_run,
        committed = report.totals.committed,
        skipped = report.totals.skipped,
        aborted = report.totals.aborted,
        new_chunks = report.totals.new_chunks,
        bytes = report.totals.bytes_written,
        "transfer finished"
    );
    Ok(report)
}

/// Content ids are only meaningful across repositories that share the chunk
/// id key, and content must not leave encryption on the way.
fn check_compatible(dst: &Repository, src: &Repository) -> Result<()> {
    if dst.chunk_id_key() != src.chunk_id_key() {
        return Err(VgerError::Config(
            "repositories are not related: chunk id keys differ \
             (create the destination related to the source repository)"
                .into(),
        ));
    }
    if src.crypto.is_encrypting() && !dst.crypto.is_encrypting() {
        return Err(VgerError::Config(
            "refusing to transfer from an encrypted repository to an unencrypted one".into(),
        ));
    }
    Ok(())
}

fn build_transform_pool(max_threads: usize) -> Result<Option<rayon::ThreadPool>> {
    if max_threads == 1 {
        return Ok(None);
    }

    let mut builder = rayon::ThreadPoolBuilder::new();
    if max_threads > 1 {
        builder = builder.num_threads(max_threads);
    }

    builder
        .build()
        .map(Some)
        .map_err(|e| VgerError::Other(format!("failed to create rayon thread pool: {e}")))
}

fn transfer_archive(
    dst: &mut Repository,
    ctx: &mut RunContext<'_>,
    entry: &ArchiveEntry,
) -> Result<ArchiveReport> {
    let mut progress = Progress::new(&entry.name);
    if dst.manifest().find_archive(&entry.name).is_some() {
        return Err(VgerError::ArchiveAlreadyExists(entry.name.clone()));
    }

    progress.advance(ArchiveState::Streaming);
    let source_meta = archive::load_archive(ctx.src, entry)?;
    let mut meta = ctx.upgrader.upgrade_archive_meta(&source_meta)?;
    let items = upgrade_items(ctx, &source_meta)?;
    progress.advance(ArchiveState::Transformed);

    let staging = ChunkStaging::new(&*dst, ctx.src, ctx.dry_run, &ctx.overlay);
    let staged = stage_content(&staging, &items, ctx.pool).and_then(|()| {
        write_item_stream(&staging, &items, ctx.options.items_chunk_size)
    });
    let outcome = staging.into_outcome();
    let item_ptrs = match staged {
        Ok(ptrs) => ptrs,
        Err(err) => {
            discard_written(dst, &outcome.written, None);
            return Err(err);
        }
    };
    debug!(
        archive = %entry.name,
        items = items.len(),
        new_chunks = outcome.new_content_chunks,
        refs_to_existing = outcome.delta.refcount_bumps.len(),
        "chunks staged"
    );

    let mut report = ArchiveReport {
        name: entry.name.clone(),
        id: entry.id.to_hex(),
        outcome: ArchiveOutcome::DryRunOnly,
        item_count: items.len() as u64,
        new_chunks: outcome.new_content_chunks,
        bytes_written: outcome.new_content_bytes,
    };

    if ctx.dry_run {
        ctx.overlay.extend(outcome.planned.iter().copied());
        info!(archive = %entry.name, items = report.item_count, "dry run: would transfer");
        return Ok(report);
    }

    progress.advance(ArchiveState::Committing);
    meta.item_ptrs = item_ptrs;
    meta.stats = ArchiveStats::from_items(&items);
    commit(dst, entry, &meta, outcome)?;
    progress.advance(ArchiveState::Committed);
    report.outcome = ArchiveOutcome::Committed;
    info!(
        archive = %entry.name,
        items = report.item_count,
        new_chunks = report.new_chunks,
        bytes = report.bytes_written,
        "archive transferred"
    );
    Ok(report)
}

/// Both hardlink passes over the lazily decoded source items.
fn upgrade_items(
    ctx: &RunContext<'_>,
    source_meta: &archive::SourceArchiveMeta,
) -> Result<Vec<Item>> {
    let mut hardlinks = HardlinkResolver::new();
    for item in source_meta.items(ctx.src) {
        hardlinks.observe(&item?)?;
    }

    let mut items = Vec::new();
    for item in source_meta.items(ctx.src) {
        let item = ctx.upgrader.upgrade_item(item?, &hardlinks)?;
        item.validate()?;
        hardlinks.verify(&item)?;
        items.push(item);
    }
    debug!(
        archive = %source_meta.name(),
        items = items.len(),
        hardlink_groups = hardlinks.group_count(),
        "items upgraded"
    );
    Ok(items)
}

fn stage_content(
    staging: &ChunkStaging<'_>,
    items: &[Item],
    pool: Option<&rayon::ThreadPool>,
) -> Result<()> {
    let refs: Vec<&ChunkRef> = items.iter().flat_map(|i| i.chunks.iter().flatten()).collect();
    match pool {
        Some(pool) => pool.install(|| refs.par_iter().try_for_each(|r| staging.stage_content(r))),
        None => refs.iter().try_for_each(|r| staging.stage_content(r)),
    }
}

fn write_item_stream(
    staging: &ChunkStaging<'_>,
    items: &[Item],
    items_chunk_size: usize,
) -> Result<Vec<ChunkId>> {
    let mut writer = ItemStreamWriter::new(items_chunk_size);
    for item in items {
        writer.push(item)?;
    }
    writer
        .finish()
        .iter()
        .map(|chunk| staging.stage_local(chunk))
        .collect()
}

/// Store the metadata object and publish the archive. The transferred
/// archive keeps the source archive's id.
fn commit(
    dst: &mut Repository,
    entry: &ArchiveEntry,
    meta: &archive::ArchiveMeta,
    outcome: StagingOutcome,
) -> Result<()> {
    let StagingOutcome { delta, written, .. } = outcome;
    let bytes = rmp_serde::to_vec_named(meta)?;
    if let Err(err) = dst.write_archive_object(&entry.id, ObjectType::ArchiveMeta, &bytes) {
        discard_written(dst, &written, Some(&entry.id));
        return Err(err);
    }
    if let Err(err) = dst.commit_archive(entry.clone(), delta) {
        let unreferenced = unreferenced_on_disk(dst, written);
        discard_written(dst, &unreferenced, Some(&entry.id));
        return Err(err);
    }
    Ok(())
}

/// Chunks of a failed commit that the persisted index does not count.
/// Anything it might still count is kept, so a later run never trusts an
/// index entry whose object is gone.
fn unreferenced_on_disk(dst: &Repository, written: Vec<ChunkId>) -> Vec<ChunkId> {
    match dst.stored_chunk_index() {
        Ok(stored) => written.into_iter().filter(|id| !stored.contains(id)).collect(),
        Err(err) => {
            warn!(error = %err, "cannot read back the chunk index, keeping written chunks");
            Vec::new()
        }
    }
}

/// Best-effort removal of objects written for an aborted archive.
fn discard_written(dst: &Repository, written: &[ChunkId], archive: Option<&ArchiveId>) {
    let keys = written
        .iter()
        .map(ChunkId::storage_key)
        .chain(archive.map(ArchiveId::storage_key));
    for key in keys {
        if let Err(err) = dst.storage.delete(&key) {
            warn!(key = %key, error = %err, "failed to remove object of aborted archive");
        }
    }
}
