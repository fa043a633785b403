//! Object encryption for repositories, plus the passphrase-wrapped key
//! material (`key`) that feeds it.

pub mod aes_gcm;
pub mod key;

use vger_types::error::Result;

/// Seals and opens repository objects. Implementations are handed their key
/// material by the caller; nothing here consults the environment.
pub trait CryptoEngine: Send + Sync {
    /// Output is self-contained: whatever `decrypt` needs besides the key
    /// and `aad` (nonce, tag) travels inside it.
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>>;

    /// Fails with `DecryptionFailed` when `aad` or the key differ from
    /// those used by `encrypt`.
    fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>>;

    fn is_encrypting(&self) -> bool;

    /// Key of the keyed BLAKE2b-256 that names chunks.
    fn chunk_id_key(&self) -> &[u8; 32];
}

/// Pass-through engine for unencrypted repositories. Chunk ids stay keyed.
pub struct PlaintextEngine {
    id_key: [u8; 32],
}

impl PlaintextEngine {
    pub fn new(chunk_id_key: &[u8; 32]) -> Self {
        Self {
            id_key: *chunk_id_key,
        }
    }
}

impl CryptoEngine for PlaintextEngine {
    fn encrypt(&self, plaintext: &[u8], _aad: &[u8]) -> Result<Vec<u8>> {
        Ok(Vec::from(plaintext))
    }

    fn decrypt(&self, data: &[u8], _aad: &[u8]) -> Result<Vec<u8>> {
        Ok(Vec::from(data))
    }

    fn is_encrypting(&self) -> bool {
        false
    }

    fn chunk_id_key(&self) -> &[u8; 32] {
        &self.id_key
    }
}
