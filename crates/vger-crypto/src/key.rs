use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use vger_types::error::{Result, VgerError};

const KDF_ALGORITHM: &str = "argon2id";
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Key material of one repository: a per-repository encryption key and the
/// chunk id key, which related repositories share.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    pub encryption_key: [u8; KEY_LEN],
    pub chunk_id_key: [u8; KEY_LEN],
}

/// Argon2id cost preset applied when a key blob is sealed. Opening a blob
/// reads the costs stored in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KdfProfile {
    #[default]
    Strong,
    /// Cheap parameters for tests and throwaway repositories.
    Weak,
}

impl KdfProfile {
    fn costs(self) -> (u32, u32, u32) {
        // (time, memory KiB, lanes)
        match self {
            KdfProfile::Strong => (3, 64 * 1024, 4),
            KdfProfile::Weak => (1, 8, 1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: String,
    pub time_cost: u32,
    pub memory_cost: u32,
    pub parallelism: u32,
    pub salt: Vec<u8>,
}

impl KdfParams {
    fn fresh(profile: KdfProfile) -> Self {
        let (time_cost, memory_cost, parallelism) = profile.costs();
        let mut salt = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Self {
            algorithm: KDF_ALGORITHM.into(),
            time_cost,
            memory_cost,
            parallelism,
            salt,
        }
    }
}

/// Passphrase-sealed master key, persisted at `keys/repokey`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedKey {
    pub kdf: KdfParams,
    pub nonce: Vec<u8>,
    /// AES-256-GCM of `encryption_key || chunk_id_key`, with the msgpack
    /// encoding of `kdf` as associated data.
    pub sealed: Vec<u8>,
}

impl MasterKey {
    pub fn generate() -> Self {
        let mut chunk_id_key = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut chunk_id_key);
        Self::related_to(&chunk_id_key)
    }

    /// Fresh encryption key around an existing repository's chunk id key.
    pub fn related_to(chunk_id_key: &[u8; KEY_LEN]) -> Self {
        let mut encryption_key = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut encryption_key);
        Self {
            encryption_key,
            chunk_id_key: *chunk_id_key,
        }
    }

    pub fn seal(&self, passphrase: &str, profile: KdfProfile) -> Result<EncryptedKey> {
        let kdf = KdfParams::fresh(profile);
        let wrap = Wrapping::derive(passphrase, &kdf)?;

        let mut both = Zeroizing::new([0u8; 2 * KEY_LEN]);
        both[..KEY_LEN].copy_from_slice(&self.encryption_key);
        both[KEY_LEN..].copy_from_slice(&self.chunk_id_key);

        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let sealed = wrap
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &both[..],
                    aad: &wrap.aad,
                },
            )
            .map_err(|e| VgerError::KeyDerivation(format!("seal master key: {e}")))?;

        Ok(EncryptedKey {
            kdf,
            nonce: nonce.to_vec(),
            sealed,
        })
    }
}

impl EncryptedKey {
    /// Recover the master key. A wrong passphrase and a modified blob both
    /// give `DecryptionFailed`.
    pub fn open(&self, passphrase: &str) -> Result<MasterKey> {
        if self.nonce.len() != NONCE_LEN {
            return Err(VgerError::InvalidFormat(format!(
                "key blob nonce is {} bytes",
                self.nonce.len()
            )));
        }
        let wrap = Wrapping::derive(passphrase, &self.kdf)?;
        let both = Zeroizing::new(
            wrap.cipher
                .decrypt(
                    Nonce::from_slice(&self.nonce),
                    Payload {
                        msg: &self.sealed,
                        aad: &wrap.aad,
                    },
                )
                .map_err(|_| VgerError::DecryptionFailed)?,
        );
        if both.len() != 2 * KEY_LEN {
            return Err(VgerError::DecryptionFailed);
        }

        let mut key = MasterKey {
            encryption_key: [0u8; KEY_LEN],
            chunk_id_key: [0u8; KEY_LEN],
        };
        key.encryption_key.copy_from_slice(&both[..KEY_LEN]);
        key.chunk_id_key.copy_from_slice(&both[KEY_LEN..]);
        Ok(key)
    }
}

/// Cipher derived from a passphrase, plus the associated data binding it to
/// its KDF parameters.
struct Wrapping {
    cipher: Aes256Gcm,
    aad: Vec<u8>,
}

impl Wrapping {
    fn derive(passphrase: &str, kdf: &KdfParams) -> Result<Self> {
        if kdf.algorithm != KDF_ALGORITHM {
            return Err(VgerError::KeyDerivation(format!(
                "unsupported kdf '{}'",
                kdf.algorithm
            )));
        }
        let params = argon2::Params::new(
            kdf.memory_cost,
            kdf.time_cost,
            kdf.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| VgerError::KeyDerivation(format!("argon2 params: {e}")))?;

        let mut derived = Zeroizing::new([0u8; KEY_LEN]);
        Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
            .hash_password_into(passphrase.as_bytes(), &kdf.salt, derived.as_mut())
            .map_err(|e| VgerError::KeyDerivation(format!("argon2: {e}")))?;

        let cipher = Aes256Gcm::new_from_slice(derived.as_ref())
            .map_err(|e| VgerError::KeyDerivation(format!("wrapping cipher: {e}")))?;
        let aad = rmp_serde::to_vec(kdf)?;
        Ok(Self { cipher, aad })
    }
}
