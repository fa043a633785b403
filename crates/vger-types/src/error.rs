use thiserror::Error;

pub type Result<T> = std::result::Result<T, VgerError>;

#[derive(Debug, Error)]
pub enum VgerError {
    #[error("repository not found at '{0}'")]
    RepoNotFound(String),

    #[error("repository already exists at '{0}'")]
    RepoAlreadyExists(String),

    #[error("decryption failed: wrong passphrase or corrupted data")]
    DecryptionFailed,

    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("archive not found: '{0}'")]
    ArchiveNotFound(String),

    #[error("archive already exists: '{0}'")]
    ArchiveAlreadyExists(String),

    #[error("invalid repository format: {0}")]
    InvalidFormat(String),

    #[error("unknown object type tag: {0}")]
    UnknownObjectType(u8),

    #[error("unknown compression tag: {0}")]
    UnknownCompressionTag(u8),

    #[error("unsupported repository version: {0}")]
    UnsupportedVersion(u32),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unsupported backend: '{0}'")]
    UnsupportedBackend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("repository is locked by another process (lock: {0})")]
    Locked(String),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("operation interrupted")]
    Interrupted,

    /// Two members of one hardlink group disagree on their content.
    #[error("hardlink content mismatch at '{path}' (hlid {hlid}): {detail}")]
    DedupMismatch {
        path: String,
        hlid: String,
        detail: String,
    },

    /// Chunk bytes are missing or do not hash to their recorded id.
    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("unsupported item '{path}': {reason}")]
    UnsupportedItem { path: String, reason: String },

    #[error("unsupported archive '{name}': {reason}")]
    UnsupportedArchive { name: String, reason: String },

    #[error("{0}")]
    Other(String),
}

impl VgerError {
    /// Errors that abort a single archive of a transfer while later archives
    /// are still attempted. Everything else aborts the whole operation.
    pub fn is_archive_scoped(&self) -> bool {
        matches!(
            self,
            VgerError::DedupMismatch { .. }
                | VgerError::Integrity(_)
                | VgerError::UnsupportedItem { .. }
                | VgerError::UnsupportedArchive { .. }
                | VgerError::ArchiveAlreadyExists(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_scoped_errors() {
        assert!(VgerError::Integrity("missing chunk".into()).is_archive_scoped());
        assert!(VgerError::ArchiveAlreadyExists("a1".into()).is_archive_scoped());
        assert!(VgerError::UnsupportedItem {
            path: "x".into(),
            reason: "socket".into(),
        }
        .is_archive_scoped());
        assert!(VgerError::DedupMismatch {
            path: "x".into(),
            hlid: "00".into(),
            detail: "size".into(),
        }
        .is_archive_scoped());
    }

    #[test]
    fn infrastructure_errors_are_not_archive_scoped() {
        assert!(!VgerError::Config("bad".into()).is_archive_scoped());
        assert!(!VgerError::DecryptionFailed.is_archive_scoped());
        assert!(!VgerError::Interrupted.is_archive_scoped());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert!(!VgerError::from(io).is_archive_scoped());
    }

    #[test]
    fn dedup_mismatch_message_names_path() {
        let err = VgerError::DedupMismatch {
            path: "tmp/hardlink2".into(),
            hlid: "ab".into(),
            detail: "size 17 != 12".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("tmp/hardlink2"));
        assert!(msg.contains("size 17 != 12"));
    }
}
