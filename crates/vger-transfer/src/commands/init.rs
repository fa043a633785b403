use tracing::info;

use crate::config::TransferConfig;
use crate::passphrase::{passphrase_for_init, OTHER_PASSPHRASE_ENV, PASSPHRASE_ENV};
use crate::repo::Repository;
use crate::storage;
use vger_types::error::Result;

use super::util::open_repo;

/// Create the destination repository related to the source ("other")
/// repository, so archives can later be transferred between them by
/// content id.
pub fn run(config: &TransferConfig) -> Result<Repository> {
    config.validate()?;
    let other = open_repo(
        &config.other_repository,
        &config.other_encryption,
        OTHER_PASSPHRASE_ENV,
    )?;

    let passphrase = passphrase_for_init(&config.encryption, PASSPHRASE_ENV)?;
    let repo = Repository::init(
        storage::backend_from_config(&config.repository)?,
        config.encryption.mode,
        passphrase.as_deref().map(String::as_str),
        config.encryption.kdf,
        Some(&other),
    )?;
    info!(
        repo = %repo.id_hex(),
        related_to = %other.id_hex(),
        mode = repo.config.encryption.as_str(),
        "created related repository"
    );
    Ok(repo)
}
