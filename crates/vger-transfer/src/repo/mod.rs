pub mod chunk_store;
pub mod format;
pub mod lock;
pub mod manifest;

use std::sync::Arc;

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::archive::item::ChunkRef;
use crate::compress::{self, Compression};
use crate::index::{ChunkIndex, IndexDelta};
use crate::storage::StorageBackend;
use vger_crypto::aes_gcm::Aes256GcmEngine;
use vger_crypto::key::{EncryptedKey, KdfProfile, MasterKey};
use vger_crypto::{CryptoEngine, PlaintextEngine};
use vger_types::archive_id::ArchiveId;
use vger_types::chunk_id::ChunkId;
use vger_types::error::{Result, VgerError};

use self::format::{pack_object, unpack_object, unpack_object_expect, ObjectType};
use self::manifest::{ArchiveEntry, Manifest};

const REPO_VERSION: u32 = 1;
const MANIFEST_OBJECT_CONTEXT: &[u8] = b"manifest";
const INDEX_OBJECT_CONTEXT: &[u8] = b"index";

/// Persisted (unencrypted) at the `config` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub version: u32,
    pub id: Vec<u8>,
    pub encryption: EncryptionMode,
    pub created: DateTime<Utc>,
    /// Plaintext repositories created related to another repository carry
    /// the shared chunk id key here; otherwise it is derived from `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id_key: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionMode {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "aes256gcm")]
    Aes256Gcm,
}

impl EncryptionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionMode::None => "none",
            EncryptionMode::Aes256Gcm => "aes256gcm",
        }
    }
}

/// A handle to an opened repository.
pub struct Repository {
    pub storage: Arc<dyn StorageBackend>,
    pub crypto: Arc<dyn CryptoEngine>,
    pub config: RepoConfig,
    manifest: Manifest,
    chunk_index: ChunkIndex,
}

impl Repository {
    /// Initialize a new repository.
    ///
    /// With `related`, the new repository shares the other repository's chunk
    /// id key (fresh encryption key), so identical content gets identical ids
    /// in both and archives can be transferred without re-chunking.
    pub fn init(
        storage: Box<dyn StorageBackend>,
        encryption: EncryptionMode,
        passphrase: Option<&str>,
        kdf: KdfProfile,
        related: Option<&Repository>,
    ) -> Result<Self> {
        let storage: Arc<dyn StorageBackend> = Arc::from(storage);
        if storage.exists("config")? {
            return Err(VgerError::RepoAlreadyExists("repository".into()));
        }

        let mut repo_id = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut repo_id);
        let related_key = related.map(|r| *r.crypto.chunk_id_key());

        let mut repo_config = RepoConfig {
            version: REPO_VERSION,
            id: repo_id,
            encryption,
            created: Utc::now(),
            chunk_id_key: None,
        };

        let (crypto, encrypted_key): (Arc<dyn CryptoEngine>, Option<EncryptedKey>) =
            match encryption {
                EncryptionMode::None => {
                    if related.is_some_and(|r| r.crypto.is_encrypting()) {
                        return Err(VgerError::Config(
                            "an unencrypted repository cannot be related to an encrypted one"
                                .into(),
                        ));
                    }
                    let key = match related_key {
                        Some(key) => {
                            repo_config.chunk_id_key = Some(key.to_vec());
                            key
                        }
                        None => derive_plaintext_chunk_id_key(&repo_config.id),
                    };
                    (Arc::new(PlaintextEngine::new(&key)), None)
                }
                EncryptionMode::Aes256Gcm => {
                    let pass = passphrase.ok_or_else(|| {
                        VgerError::Config("passphrase required for encrypted repository".into())
                    })?;
                    let master_key = match related_key {
                        Some(key) => MasterKey::related_to(&key),
                        None => MasterKey::generate(),
                    };
                    let enc_key = master_key.seal(pass, kdf)?;
                    let engine =
                        Aes256GcmEngine::new(&master_key.encryption_key, &master_key.chunk_id_key);
                    (Arc::new(engine), Some(enc_key))
                }
            };

        storage.put("config", &rmp_serde::to_vec_named(&repo_config)?)?;
        if let Some(enc_key) = &encrypted_key {
            storage.create_dir("keys/")?;
            storage.put("keys/repokey", &rmp_serde::to_vec(enc_key)?)?;
        }
        storage.create_dir("archives/")?;
        storage.create_dir("data/")?;
        storage.create_dir("locks/")?;

        let repo = Repository {
            storage,
            crypto,
            config: repo_config,
            manifest: Manifest::new(),
            chunk_index: ChunkIndex::new(),
        };
        repo.write_index(&repo.chunk_index)?;
        repo.write_manifest(&repo.manifest)?;
        debug!(repo = %repo.id_hex(), mode = repo.config.encryption.as_str(), "initialized repository");
        Ok(repo)
    }

    /// Open an existing repository.
    pub fn open(storage: Box<dyn StorageBackend>, passphrase: Option<&str>) -> Result<Self> {
        let storage: Arc<dyn StorageBackend> = Arc::from(storage);

        let config_data = storage
            .get("config")?
            .ok_or_else(|| VgerError::RepoNotFound("config not found".into()))?;
        let repo_config: RepoConfig = rmp_serde::from_slice(&config_data)?;
        if repo_config.version != REPO_VERSION {
            return Err(VgerError::UnsupportedVersion(repo_config.version));
        }

        let crypto: Arc<dyn CryptoEngine> = match repo_config.encryption {
            EncryptionMode::None => {
                let key = match &repo_config.chunk_id_key {
                    Some(stored) => <[u8; 32]>::try_from(stored.as_slice()).map_err(|_| {
                        VgerError::InvalidFormat("chunk_id_key must be 32 bytes".into())
                    })?,
                    None => derive_plaintext_chunk_id_key(&repo_config.id),
                };
                Arc::new(PlaintextEngine::new(&key))
            }
            EncryptionMode::Aes256Gcm => {
                let key_data = storage
                    .get("keys/repokey")?
                    .ok_or_else(|| VgerError::InvalidFormat("missing keys/repokey".into()))?;
                let enc_key: EncryptedKey = rmp_serde::from_slice(&key_data)?;
                let pass = passphrase.ok_or_else(|| {
                    VgerError::Config("passphrase required for encrypted repository".into())
                })?;
                let master_key = enc_key.open(pass)?;
                Arc::new(Aes256GcmEngine::new(
                    &master_key.encryption_key,
                    &master_key.chunk_id_key,
                ))
            }
        };

        let manifest_data = storage
            .get("manifest")?
            .ok_or_else(|| VgerError::InvalidFormat("missing manifest".into()))?;
        let manifest: Manifest = rmp_serde::from_slice(&unpack_object_expect(
            &manifest_data,
            ObjectType::Manifest,
            MANIFEST_OBJECT_CONTEXT,
            crypto.as_ref(),
        )?)?;

        let chunk_index = read_index(storage.as_ref(), crypto.as_ref())?;

        Ok(Repository {
            storage,
            crypto,
            config: repo_config,
            manifest,
            chunk_index,
        })
    }

    /// The chunk index as currently persisted, which may differ from the
    /// in-memory one after a failed commit.
    pub fn stored_chunk_index(&self) -> Result<ChunkIndex> {
        read_index(self.storage.as_ref(), self.crypto.as_ref())
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn chunk_index(&self) -> &ChunkIndex {
        &self.chunk_index
    }

    pub fn id_hex(&self) -> String {
        hex::encode(&self.config.id)
    }

    pub fn chunk_id_key(&self) -> &[u8; 32] {
        self.crypto.chunk_id_key()
    }

    pub fn compute_chunk_id(&self, data: &[u8]) -> ChunkId {
        ChunkId::compute(self.crypto.chunk_id_key(), data)
    }

    // ----- Chunk objects -----

    /// Decrypt a chunk object and return its codec-tagged payload.
    pub fn read_chunk_encoded(&self, id: &ChunkId) -> Result<Vec<u8>> {
        let data = self
            .storage
            .get(&id.storage_key())?
            .ok_or_else(|| VgerError::Integrity(format!("chunk {} is missing", id.to_hex())))?;
        unpack_object_expect(&data, ObjectType::ChunkData, &id.0, self.crypto.as_ref())
    }

    /// Read and decode a chunk to its plaintext bytes.
    pub fn read_chunk(&self, id: &ChunkId) -> Result<Vec<u8>> {
        compress::decompress(&self.read_chunk_encoded(id)?)
    }

    /// Encrypt and store a codec-tagged payload. Returns the stored size.
    /// Does not touch the index.
    pub fn write_chunk_encoded(&self, id: &ChunkId, encoded: &[u8]) -> Result<u32> {
        let packed =
            pack_object(ObjectType::ChunkData, &id.0, encoded, self.crypto.as_ref())?;
        self.storage.put(&id.storage_key(), &packed)?;
        Ok(packed.len() as u32)
    }

    /// Store plaintext bytes as a chunk, or add a reference if the content
    /// is already present. The index change is persisted by the next commit.
    pub fn store_chunk(&mut self, data: &[u8], compression: Compression) -> Result<ChunkRef> {
        let id = self.compute_chunk_id(data);
        self.store_chunk_with_id(id, data, compression)
    }

    pub(crate) fn store_chunk_with_id(
        &mut self,
        id: ChunkId,
        data: &[u8],
        compression: Compression,
    ) -> Result<ChunkRef> {
        let size = data.len() as u32;
        if self.chunk_index.increment_refcount(&id).is_none() {
            let encoded = compress::compress(compression, data)?;
            let stored_size = self.write_chunk_encoded(&id, &encoded)?;
            self.chunk_index.add(id, size, stored_size);
        }
        Ok(ChunkRef { id, size })
    }

    pub(crate) fn chunk_index_mut(&mut self) -> &mut ChunkIndex {
        &mut self.chunk_index
    }

    // ----- Archive objects -----

    /// Decrypt an archive metadata object. The type tag tells the current
    /// layout from the legacy one.
    pub fn read_archive_object(&self, id: &ArchiveId) -> Result<(ObjectType, Vec<u8>)> {
        let data = self
            .storage
            .get(&id.storage_key())?
            .ok_or_else(|| VgerError::ArchiveNotFound(id.to_hex()))?;
        unpack_object(&data, id.as_bytes(), self.crypto.as_ref())
    }

    pub fn write_archive_object(
        &self,
        id: &ArchiveId,
        obj_type: ObjectType,
        payload: &[u8],
    ) -> Result<()> {
        let packed = pack_object(obj_type, id.as_bytes(), payload, self.crypto.as_ref())?;
        self.storage.put(&id.storage_key(), &packed)
    }

    /// Publish an archive whose metadata object is already stored.
    ///
    /// Applies `delta` to a copy of the index and appends `entry` to a copy
    /// of the manifest, writes the index and then the manifest, and only
    /// then swaps the in-memory state. If the manifest write fails the
    /// previous index is written back, so neither the in-memory nor the
    /// persisted state refers to the archive's new chunks.
    pub fn commit_archive(&mut self, entry: ArchiveEntry, delta: IndexDelta) -> Result<()> {
        if self.manifest.find_archive(&entry.name).is_some() {
            return Err(VgerError::ArchiveAlreadyExists(entry.name));
        }
        let mut next_index = self.chunk_index.clone();
        delta.apply_to(&mut next_index);
        let mut next_manifest = self.manifest.clone();
        next_manifest.archives.push(entry);
        next_manifest.timestamp = Utc::now();

        self.write_index(&next_index)?;
        if let Err(err) = self.write_manifest(&next_manifest) {
            // Put back the index that matches the unchanged manifest.
            if let Err(restore_err) = self.write_index(&self.chunk_index) {
                warn!(
                    archive = %next_manifest.archives.last().map_or("", |e| e.name.as_str()),
                    error = %restore_err,
                    "could not restore the chunk index after a failed commit"
                );
            }
            return Err(err);
        }
        self.chunk_index = next_index;
        self.manifest = next_manifest;
        Ok(())
    }

    /// Persist the in-memory index and manifest.
    pub fn save_state(&mut self) -> Result<()> {
        self.manifest.timestamp = Utc::now();
        self.write_index(&self.chunk_index)?;
        self.write_manifest(&self.manifest)
    }

    fn write_index(&self, index: &ChunkIndex) -> Result<()> {
        let packed = pack_object(
            ObjectType::ChunkIndex,
            INDEX_OBJECT_CONTEXT,
            &rmp_serde::to_vec(index)?,
            self.crypto.as_ref(),
        )?;
        self.storage.put("index", &packed)
    }

    fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        let packed = pack_object(
            ObjectType::Manifest,
            MANIFEST_OBJECT_CONTEXT,
            &rmp_serde::to_vec(manifest)?,
            self.crypto.as_ref(),
        )?;
        self.storage.put("manifest", &packed)
    }
}

fn read_index(storage: &dyn StorageBackend, crypto: &dyn CryptoEngine) -> Result<ChunkIndex> {
    let data = storage
        .get("index")?
        .ok_or_else(|| VgerError::InvalidFormat("missing index".into()))?;
    let payload = unpack_object_expect(&data, ObjectType::ChunkIndex, INDEX_OBJECT_CONTEXT, crypto)?;
    Ok(rmp_serde::from_slice(&payload)?)
}

fn derive_plaintext_chunk_id_key(repo_id: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    let mut hasher = Blake2bVar::new(32).expect("32 is a valid BLAKE2b output size");
    hasher.update(repo_id);
    hasher
        .finalize_variable(&mut key)
        .expect("output buffer matches requested size");
    key
}
