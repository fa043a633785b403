use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::config::{EncryptionConfig, RepositoryConfig};
use crate::passphrase::configured_passphrase;
use crate::repo::lock;
use crate::repo::Repository;
use crate::storage;
use vger_types::error::{Result, VgerError};

/// Open the repository at `location`, unlocking it with the passphrase
/// configured in `encryption` (or found in `env_var`).
pub fn open_repo(
    location: &RepositoryConfig,
    encryption: &EncryptionConfig,
    env_var: &str,
) -> Result<Repository> {
    let passphrase = configured_passphrase(encryption, env_var)?;
    Repository::open(
        storage::backend_from_config(location)?,
        passphrase.as_deref().map(String::as_str),
    )
}

/// `Err(Interrupted)` once the shutdown flag has been raised.
pub fn check_interrupted(shutdown: Option<&AtomicBool>) -> Result<()> {
    match shutdown {
        Some(flag) if flag.load(Ordering::Relaxed) => Err(VgerError::Interrupted),
        _ => Ok(()),
    }
}

/// Run `action` with the repository lock held. The lock is released even
/// when `action` fails; the action's error wins over a release error.
pub fn with_repo_lock<T>(
    repo: &mut Repository,
    action: impl FnOnce(&mut Repository) -> Result<T>,
) -> Result<T> {
    let guard = lock::acquire_lock(repo.storage.as_ref())?;
    let key = guard.key().to_string();
    let outcome = action(repo);
    let released = lock::release_lock(repo.storage.as_ref(), guard);

    match (outcome, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(release_err)) => {
            warn!(lock = %key, error = %release_err, "failed to release repository lock");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::plaintext_repo;

    #[test]
    fn lock_is_released_after_a_failed_action() {
        let (mut repo, storage) = plaintext_repo();
        let result: Result<()> =
            with_repo_lock(&mut repo, |_| Err(VgerError::Other("boom".into())));
        assert!(matches!(result, Err(VgerError::Other(_))));
        assert!(storage.keys().iter().all(|k| !k.starts_with("locks/")));
        assert_eq!(with_repo_lock(&mut repo, |_| Ok(7)).unwrap(), 7);
    }

    #[test]
    fn unset_or_missing_flag_is_not_an_interrupt() {
        assert!(check_interrupted(None).is_ok());
        assert!(check_interrupted(Some(&AtomicBool::new(false))).is_ok());
        assert!(matches!(
            check_interrupted(Some(&AtomicBool::new(true))),
            Err(VgerError::Interrupted)
        ));
    }
}
