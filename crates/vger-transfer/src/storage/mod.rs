pub mod local_backend;

use crate::config::RepositoryConfig;
use vger_types::error::{Result, VgerError};

use self::local_backend::LocalBackend;

/// Flat key/value view of a repository. Keys are `/`-separated.
pub trait StorageBackend: Send + Sync {
    /// Read an object; `Ok(None)` when the key does not exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write an object atomically, replacing any previous value.
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Delete an object. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// List all object keys below `prefix`.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    fn create_dir(&self, key: &str) -> Result<()>;
}

/// Resolve a repository URL to a local filesystem path.
///
/// Accepts a bare path or a `file://` URL. Remote schemes are rejected.
pub fn local_path_from_url(url: &str) -> Result<String> {
    if url.trim().is_empty() {
        return Err(VgerError::Config("repository url is empty".into()));
    }
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(path.to_string());
    }
    if let Some((scheme, _)) = url.split_once("://") {
        return Err(VgerError::UnsupportedBackend(scheme.to_string()));
    }
    Ok(url.to_string())
}

/// Build a storage backend from the repository configuration.
pub fn backend_from_config(cfg: &RepositoryConfig) -> Result<Box<dyn StorageBackend>> {
    let path = local_path_from_url(&cfg.url)?;
    Ok(Box::new(LocalBackend::new(&path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_forms() {
        assert_eq!(local_path_from_url("/srv/repo").unwrap(), "/srv/repo");
        assert_eq!(local_path_from_url("file:///srv/repo").unwrap(), "/srv/repo");
        assert!(matches!(
            local_path_from_url("s3://bucket/repo"),
            Err(VgerError::UnsupportedBackend(s)) if s == "s3"
        ));
        assert!(matches!(local_path_from_url(" "), Err(VgerError::Config(_))));
    }
}
