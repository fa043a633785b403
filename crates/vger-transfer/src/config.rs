use std::path::Path;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::repo::EncryptionMode;
use vger_crypto::key::KdfProfile;
use vger_types::error::{Result, VgerError};

/// Configuration of one transfer run: a destination repository, the source
/// ("other") repository and how archives are rewritten on the way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Destination repository.
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    /// Source repository.
    pub other_repository: RepositoryConfig,
    #[serde(default)]
    pub other_encryption: EncryptionConfig,
    /// Upgrader name; identity when absent.
    #[serde(default)]
    pub upgrader: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    /// UTC offset the legacy archives' naive timestamps were recorded in.
    #[serde(default = "default_legacy_utc_offset")]
    pub legacy_utc_offset: String,
    /// Exact archive names to transfer; empty means all.
    #[serde(default)]
    pub match_archives: Vec<String>,
    /// Target size of one serialized item-stream chunk.
    #[serde(default = "default_items_chunk_size")]
    pub items_chunk_size: usize,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Local path or `file://` URL.
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default = "default_encryption_mode")]
    pub mode: EncryptionMode,
    pub passphrase: Option<String>,
    pub passcommand: Option<String>,
    /// KDF strength used when a key is written (repository init).
    #[serde(default)]
    pub kdf: KdfProfile,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            mode: default_encryption_mode(),
            passphrase: None,
            passcommand: None,
            kdf: KdfProfile::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Chunk copy worker threads (0 = all cores, 1 = sequential).
    #[serde(default)]
    pub max_threads: usize,
}

fn default_encryption_mode() -> EncryptionMode {
    EncryptionMode::Aes256Gcm
}

fn default_legacy_utc_offset() -> String {
    "+00:00".to_string()
}

fn default_items_chunk_size() -> usize {
    256 * 1024
}

impl TransferConfig {
    pub fn validate(&self) -> Result<()> {
        if self.repository.url.trim().is_empty() || self.other_repository.url.trim().is_empty() {
            return Err(VgerError::Config(
                "repository and other_repository urls are required".into(),
            ));
        }
        if self.repository.url == self.other_repository.url {
            return Err(VgerError::Config(
                "repository and other_repository must differ".into(),
            ));
        }
        if self.items_chunk_size == 0 {
            return Err(VgerError::Config("items_chunk_size must be > 0".into()));
        }
        self.legacy_offset()?;
        Ok(())
    }

    /// Parsed `legacy_utc_offset`, e.g. `+01:00`.
    pub fn legacy_offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.legacy_utc_offset)
    }
}

pub fn parse_utc_offset(value: &str) -> Result<FixedOffset> {
    value
        .trim()
        .parse::<FixedOffset>()
        .map_err(|e| VgerError::Config(format!("invalid utc offset '{value}': {e}")))
}

pub fn parse_config(contents: &str) -> Result<TransferConfig> {
    let config: TransferConfig = serde_yaml::from_str(contents)
        .map_err(|e| VgerError::Config(format!("invalid config: {e}")))?;
    config.validate()?;
    Ok(config)
}

/// Load, parse and validate a YAML config file.
pub fn load_config(path: &Path) -> Result<TransferConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| VgerError::Config(format!("cannot read '{}': {e}", path.display())))?;
    parse_config(&contents)
        .map_err(|e| VgerError::Config(format!("'{}': {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
repository:
  url: /srv/repo2
other_repository:
  url: /srv/repo1
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.upgrader, None);
        assert!(!cfg.dry_run);
        assert_eq!(cfg.encryption.mode, EncryptionMode::Aes256Gcm);
        assert_eq!(cfg.encryption.kdf, KdfProfile::Strong);
        assert_eq!(cfg.limits.max_threads, 0);
        assert_eq!(cfg.legacy_offset().unwrap(), FixedOffset::east_opt(0).unwrap());
    }

    #[test]
    fn full_config() {
        let cfg = parse_config(
            r#"
repository:
  url: file:///srv/repo2
encryption:
  mode: none
other_repository:
  url: /srv/repo1
other_encryption:
  mode: aes256gcm
  passcommand: "pass show borg"
  kdf: weak
upgrader: From12To20
dry_run: true
legacy_utc_offset: "+01:00"
match_archives: [archive1]
limits:
  max_threads: 4
"#,
        )
        .unwrap();
        assert_eq!(cfg.encryption.mode, EncryptionMode::None);
        assert_eq!(cfg.other_encryption.kdf, KdfProfile::Weak);
        assert_eq!(cfg.upgrader.as_deref(), Some("From12To20"));
        assert_eq!(cfg.match_archives, vec!["archive1"]);
        assert_eq!(
            cfg.legacy_offset().unwrap(),
            FixedOffset::east_opt(3600).unwrap()
        );
    }

    #[test]
    fn bad_offset_is_config_error() {
        let yaml = format!("{MINIMAL}legacy_utc_offset: \"one hour\"\n");
        assert!(matches!(parse_config(&yaml), Err(VgerError::Config(_))));
    }

    #[test]
    fn same_repository_twice_is_rejected() {
        let yaml = "repository:\n  url: /a\nother_repository:\n  url: /a\n";
        assert!(matches!(parse_config(yaml), Err(VgerError::Config(_))));
    }

    #[test]
    fn load_config_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transfer.yaml");
        std::fs::write(&path, "repository: [").unwrap();
        let err = load_config(&path).unwrap_err().to_string();
        assert!(err.contains("transfer.yaml"));
    }
}
