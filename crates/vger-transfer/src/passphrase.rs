use std::time::Duration;

use zeroize::{Zeroize, Zeroizing};

use crate::config::EncryptionConfig;
use crate::platform::shell;
use crate::repo::EncryptionMode;
use vger_types::error::{Result, VgerError};

const PASSCOMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment fallback for the destination repository.
pub const PASSPHRASE_ENV: &str = "VGER_PASSPHRASE";
/// Environment fallback for the source repository.
pub const OTHER_PASSPHRASE_ENV: &str = "VGER_OTHER_PASSPHRASE";

/// Resolve a passphrase from config: explicit value, then `passcommand`,
/// then the `env_var` fallback. `Ok(None)` when nothing is configured.
pub fn configured_passphrase(
    encryption: &EncryptionConfig,
    env_var: &str,
) -> Result<Option<Zeroizing<String>>> {
    if let Some(ref p) = encryption.passphrase {
        return Ok(Some(Zeroizing::new(p.clone())));
    }

    if let Some(ref cmd) = encryption.passcommand {
        let output =
            shell::run_script_with_timeout(cmd, PASSCOMMAND_TIMEOUT).map_err(VgerError::Io)?;
        if !output.status.success() {
            return Err(VgerError::Config(format!(
                "passcommand failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let mut raw = String::from_utf8(output.stdout)
            .map_err(|e| VgerError::Config(format!("passcommand output is not UTF-8: {e}")))?;
        let pass = Zeroizing::new(raw.trim().to_string());
        raw.zeroize();

        if pass.is_empty() {
            return Err(VgerError::Config(
                "passcommand returned an empty passphrase".into(),
            ));
        }
        return Ok(Some(pass));
    }

    match std::env::var(env_var) {
        Ok(pass) if !pass.is_empty() => Ok(Some(Zeroizing::new(pass))),
        _ => Ok(None),
    }
}

/// Passphrase required to create a repository in `encryption.mode`.
pub fn passphrase_for_init(
    encryption: &EncryptionConfig,
    env_var: &str,
) -> Result<Option<Zeroizing<String>>> {
    if encryption.mode == EncryptionMode::None {
        return Ok(None);
    }
    match configured_passphrase(encryption, env_var)? {
        Some(pass) => Ok(Some(pass)),
        None => Err(VgerError::Config(
            "passphrase required for encrypted repository".into(),
        )),
    }
}
