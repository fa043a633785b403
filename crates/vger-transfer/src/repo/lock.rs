use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::platform;
use crate::storage::StorageBackend;
use vger_types::error::{Result, VgerError};

/// Advisory lock object stored at `locks/<ts>-<uuid>.json`.
#[derive(Debug, Serialize, Deserialize)]
struct LockEntry {
    hostname: String,
    pid: u32,
    time: String,
}

const LOCKS_PREFIX: &str = "locks/";
const STALE_AFTER_HOURS: i64 = 6;

/// Handle to an acquired lock.
#[derive(Debug)]
pub struct LockGuard {
    key: String,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Acquire the repository lock. The oldest lock object wins; a loser
/// removes its own object and reports the holder.
pub fn acquire_lock(storage: &dyn StorageBackend) -> Result<LockGuard> {
    cleanup_stale_locks(storage, Duration::hours(STALE_AFTER_HOURS))?;

    let now = Utc::now();
    let entry = LockEntry {
        hostname: platform::hostname(),
        pid: std::process::id(),
        time: now.to_rfc3339(),
    };
    // Zero-padded micros first: lexical order is acquisition order.
    let key = format!(
        "{LOCKS_PREFIX}{:020}-{:032x}.json",
        now.timestamp_micros(),
        rand::random::<u128>()
    );
    let body = serde_json::to_vec(&entry)
        .map_err(|e| VgerError::Other(format!("encoding lock {key}: {e}")))?;
    storage.put(&key, &body)?;

    let oldest = list_lock_keys(storage)?.into_iter().min();
    match oldest {
        Some(ref first) if *first == key => {}
        other => {
            let _ = storage.delete(&key);
            return Err(VgerError::Locked(other.unwrap_or_else(|| key.clone())));
        }
    }

    debug!(lock = %key, "acquired repository lock");
    Ok(LockGuard { key })
}

pub fn release_lock(storage: &dyn StorageBackend, guard: LockGuard) -> Result<()> {
    storage.delete(&guard.key)
}

fn list_lock_keys(storage: &dyn StorageBackend) -> Result<Vec<String>> {
    Ok(storage
        .list(LOCKS_PREFIX)?
        .into_iter()
        .filter(|k| k.starts_with(LOCKS_PREFIX) && k.ends_with(".json"))
        .collect())
}

/// Age of the lock object at `key`, or `None` when it can't be read.
fn lock_age(storage: &dyn StorageBackend, key: &str) -> Result<Option<(LockEntry, Duration)>> {
    let entry = storage
        .get(key)?
        .and_then(|data| serde_json::from_slice::<LockEntry>(&data).ok());
    Ok(entry.and_then(|entry| {
        let taken = chrono::DateTime::parse_from_rfc3339(&entry.time).ok()?;
        let age = Utc::now().signed_duration_since(taken.with_timezone(&Utc));
        Some((entry, age))
    }))
}

fn cleanup_stale_locks(storage: &dyn StorageBackend, max_age: Duration) -> Result<()> {
    for key in list_lock_keys(storage)? {
        match lock_age(storage, &key)? {
            Some((entry, age)) if age > max_age => {
                warn!(lock = %key, host = %entry.hostname, pid = entry.pid, "removing stale repository lock");
                if let Err(err) = storage.delete(&key) {
                    warn!(lock = %key, error = %err, "could not remove stale lock");
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryBackend;

    #[test]
    fn second_acquire_is_locked_until_release() {
        let storage = MemoryBackend::new();
        let guard = acquire_lock(&storage).unwrap();
        assert!(matches!(acquire_lock(&storage), Err(VgerError::Locked(_))));
        assert_eq!(list_lock_keys(&storage).unwrap().len(), 1);
        release_lock(&storage, guard).unwrap();
        let again = acquire_lock(&storage).unwrap();
        release_lock(&storage, again).unwrap();
        assert!(list_lock_keys(&storage).unwrap().is_empty());
    }

    #[test]
    fn stale_lock_is_cleaned_up() {
        let storage = MemoryBackend::new();
        let old = LockEntry {
            hostname: "elsewhere".into(),
            pid: 1,
            time: (Utc::now() - Duration::hours(7)).to_rfc3339(),
        };
        storage
            .put(
                "locks/00000000000000000001-dead.json",
                &serde_json::to_vec(&old).unwrap(),
            )
            .unwrap();
        let guard = acquire_lock(&storage).unwrap();
        assert_ne!(guard.key(), "locks/00000000000000000001-dead.json");
        release_lock(&storage, guard).unwrap();
    }
}
