//! Local encrypted key storage implementation
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::{KeyError, KeyResult};
use crate::key_types::{
    organization_key_id, KeyHandle, KeyId, KeyMetadata, KeyVersion, KeyVersionState,
};
use crate::kms::KeyManager;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use keyward_types::KeyType;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Master key for wrapping stored key material
pub type MasterKey = [u8; 32];

/// Raw material of one key version
pub type KeyMaterial = [u8; 32];

/// On-disk record: metadata plus wrapped material per version (hex)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyRecord {
    metadata: KeyMetadata,
    material: BTreeMap<u32, String>,
}

/// Local encrypted key store
pub struct LocalKeyManager {
    /// Storage directory
    storage_path: PathBuf,
    /// Master wrapping key
    master_key: MasterKey,
    /// In-memory view of all key records
    records: tokio::sync::RwLock<HashMap<KeyId, KeyRecord>>,
}

impl LocalKeyManager {
    /// Create a new local key manager
    ///
    /// # Arguments
    /// * `storage_path` - Directory where key records will be stored
    /// * `master_key` - Optional master key (if None, will derive from environment or generate)
    pub async fn new<P: AsRef<Path>>(
        storage_path: P,
        master_key: Option<&[u8]>,
    ) -> KeyResult<Self> {
        let storage_path = storage_path.as_ref().to_path_buf();

        fs::create_dir_all(&storage_path).await?;

        let master_key = match master_key {
            Some(key) => {
                if key.len() != 32 {
                    return Err(KeyError::Configuration(
                        "Master key must be exactly 32 bytes".to_string(),
                    ));
                }
                let mut mk = [0u8; 32];
                mk.copy_from_slice(key);
                mk
            }
            None => Self::derive_master_key(std::env::var("KEYWARD_MASTER_KEY").ok().as_deref()),
        };

        let manager = Self {
            storage_path,
            master_key,
            records: tokio::sync::RwLock::new(HashMap::new()),
        };

        manager.load_records().await?;

        Ok(manager)
    }

    /// Derive the master key from a hex string or passphrase, or generate one
    pub fn derive_master_key(source: Option<&str>) -> MasterKey {
        if let Some(key_str) = source {
            if let Ok(key_bytes) = hex::decode(key_str) {
                if key_bytes.len() == 32 {
                    let mut mk = [0u8; 32];
                    mk.copy_from_slice(&key_bytes);
                    return mk;
                }
            }
            let hash = Sha256::digest(key_str.as_bytes());
            let mut mk = [0u8; 32];
            mk.copy_from_slice(&hash);
            return mk;
        }

        warn!("No KEYWARD_MASTER_KEY found, generating a new one. Stored keys will not survive a restart!");
        let mut master_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut master_key);
        master_key
    }

    /// Create version 1 of an organization key
    pub async fn provision_organization(
        &self,
        organization_id: &str,
        key_type: KeyType,
    ) -> KeyResult<KeyHandle> {
        let key_id = organization_key_id(organization_id, key_type);
        let mut records = self.records.write().await;

        if records.contains_key(&key_id) {
            return Err(KeyError::AlreadyExists(key_id));
        }

        info!(
            organization_id = organization_id,
            key_type = %key_type,
            "Provisioning organization key"
        );

        let metadata = KeyMetadata::new(organization_id, key_type);
        let mut material = BTreeMap::new();
        material.insert(1, hex::encode(self.wrap(&Self::generate_material())?));

        let record = KeyRecord { metadata, material };
        self.save_record(&record).await?;
        let handle = record.metadata.handle(1);
        records.insert(key_id, record);

        Ok(handle)
    }

    /// Unwrapped material for a usable key version
    pub async fn key_material(
        &self,
        organization_id: &str,
        key_type: KeyType,
        version: u32,
    ) -> KeyResult<KeyMaterial> {
        let key_id = organization_key_id(organization_id, key_type);
        let records = self.records.read().await;
        let record = records
            .get(&key_id)
            .ok_or_else(|| KeyError::NotFound(key_id.clone()))?;

        let key_version = record.metadata.version(version).ok_or_else(|| {
            KeyError::NotFound(format!("{} version {}", key_id, version))
        })?;
        if !key_version.state.is_usable() {
            return Err(KeyError::VersionUnavailable {
                key_id,
                version,
                state: key_version.state.to_string(),
            });
        }

        let wrapped = record.material.get(&version).ok_or_else(|| {
            KeyError::NotFound(format!("{} material for version {}", key_id, version))
        })?;
        let wrapped = hex::decode(wrapped)
            .map_err(|e| KeyError::InvalidFormat(format!("Invalid wrapped key: {}", e)))?;
        let plain = self.unwrap_material(&wrapped)?;
        if plain.len() != 32 {
            return Err(KeyError::InvalidFormat(format!(
                "Key material for {} version {} has {} bytes",
                key_id,
                version,
                plain.len()
            )));
        }

        let mut material = [0u8; 32];
        material.copy_from_slice(&plain);
        Ok(material)
    }

    /// Metadata snapshot for a key
    pub async fn metadata(&self, organization_id: &str, key_type: KeyType) -> KeyResult<KeyMetadata> {
        let key_id = organization_key_id(organization_id, key_type);
        let records = self.records.read().await;
        records
            .get(&key_id)
            .map(|r| r.metadata.clone())
            .ok_or(KeyError::NotFound(key_id))
    }

    fn generate_material() -> KeyMaterial {
        let mut material = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut material);
        material
    }

    /// Encrypt key material under the master key
    fn wrap(&self, key_value: &[u8]) -> KeyResult<Vec<u8>> {
        let cipher = Aes256Gcm::new(&self.master_key.into());
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, key_value)
            .map_err(|e| KeyError::Encryption(format!("Key wrapping failed: {}", e)))?;

        // Prepend nonce to ciphertext
        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt key material
    fn unwrap_material(&self, encrypted: &[u8]) -> KeyResult<Vec<u8>> {
        if encrypted.len() < 12 {
            return Err(KeyError::Decryption("Wrapped key too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = encrypted.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let cipher = Aes256Gcm::new(&self.master_key.into());

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| KeyError::Decryption(format!("Key unwrapping failed: {}", e)))
    }

    /// Get path for a key record
    fn record_path(&self, key_id: &KeyId) -> PathBuf {
        let sanitized = key_id.replace('/', "_").replace('\\', "_");
        self.storage_path.join(format!("{}.json", sanitized))
    }

    /// Load key records from disk
    async fn load_records(&self) -> KeyResult<()> {
        let mut records = self.records.write().await;
        records.clear();

        let mut entries = fs::read_dir(&self.storage_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                match fs::read_to_string(&path).await {
                    Ok(content) => match serde_json::from_str::<KeyRecord>(&content) {
                        Ok(record) => {
                            records.insert(record.metadata.id.clone(), record);
                        }
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Failed to parse key record");
                        }
                    },
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to read key record");
                    }
                }
            }
        }

        debug!("Loaded {} key records", records.len());
        Ok(())
    }

    /// Save a key record to disk
    async fn save_record(&self, record: &KeyRecord) -> KeyResult<()> {
        let path = self.record_path(&record.metadata.id);
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&path, json).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyManager for LocalKeyManager {
    async fn current_key(
        &self,
        organization_id: &str,
        key_type: KeyType,
    ) -> KeyResult<KeyHandle> {
        let metadata = self.metadata(organization_id, key_type).await?;
        Ok(metadata.handle(metadata.current_version))
    }

    async fn rotate_organization_key(
        &self,
        organization_id: &str,
        key_type: KeyType,
    ) -> KeyResult<KeyHandle> {
        let key_id = organization_key_id(organization_id, key_type);
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&key_id)
            .ok_or_else(|| KeyError::NotFound(key_id.clone()))?;

        if let Some(staged) = record.metadata.staged_version() {
            let version = staged.version;
            info!(key_id = %key_id, version = version, "Resuming staged key version");
            return Ok(record.metadata.handle(version));
        }

        let new_version = record.metadata.current_version + 1;
        info!(key_id = %key_id, version = new_version, "Staging new key version");

        let mut updated = record.clone();
        updated
            .metadata
            .versions
            .push(KeyVersion::new(new_version, KeyVersionState::Staged));
        updated
            .material
            .insert(new_version, hex::encode(self.wrap(&Self::generate_material())?));
        updated.metadata.updated_at = Utc::now().timestamp();

        self.save_record(&updated).await?;
        *record = updated;

        Ok(record.metadata.handle(new_version))
    }

    async fn staged_version(
        &self,
        organization_id: &str,
        key_type: KeyType,
    ) -> KeyResult<Option<u32>> {
        let metadata = self.metadata(organization_id, key_type).await?;
        Ok(metadata.staged_version().map(|v| v.version))
    }

    async fn commit_key_version(
        &self,
        organization_id: &str,
        key_type: KeyType,
        version: u32,
    ) -> KeyResult<()> {
        let key_id = organization_key_id(organization_id, key_type);
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&key_id)
            .ok_or_else(|| KeyError::NotFound(key_id.clone()))?;

        let mut updated = record.clone();
        if !updated.metadata.activate(version) {
            return Err(KeyError::Rotation(format!(
                "Version {} of {} is not staged",
                version, key_id
            )));
        }

        self.save_record(&updated).await?;
        *record = updated;

        info!(key_id = %key_id, version = version, "Key version committed");
        Ok(())
    }

    async fn discard_key_version(
        &self,
        organization_id: &str,
        key_type: KeyType,
        version: u32,
    ) -> KeyResult<()> {
        let key_id = organization_key_id(organization_id, key_type);
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&key_id)
            .ok_or_else(|| KeyError::NotFound(key_id.clone()))?;

        let is_staged = record
            .metadata
            .version(version)
            .map(|v| v.state == KeyVersionState::Staged)
            .unwrap_or(false);
        if !is_staged {
            return Err(KeyError::Rotation(format!(
                "Version {} of {} is not staged",
                version, key_id
            )));
        }

        let mut updated = record.clone();
        updated.metadata.versions.retain(|v| v.version != version);
        updated.material.remove(&version);
        updated.metadata.updated_at = Utc::now().timestamp();

        self.save_record(&updated).await?;
        *record = updated;

        info!(key_id = %key_id, version = version, "Staged key version discarded");
        Ok(())
    }

    async fn prune_key_versions(
        &self,
        organization_id: &str,
        key_type: KeyType,
        keep: u32,
        archive: bool,
    ) -> KeyResult<Vec<u32>> {
        let key_id = organization_key_id(organization_id, key_type);
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&key_id)
            .ok_or_else(|| KeyError::NotFound(key_id.clone()))?;

        let pruned: Vec<u32> = record
            .metadata
            .retained_versions()
            .into_iter()
            .skip(keep.max(1) as usize)
            .collect();
        if pruned.is_empty() {
            return Ok(pruned);
        }

        let mut updated = record.clone();
        for v in &mut updated.metadata.versions {
            if pruned.contains(&v.version) {
                v.state = if archive {
                    KeyVersionState::Archived
                } else {
                    KeyVersionState::Destroyed
                };
            }
        }
        if !archive {
            for version in &pruned {
                updated.material.remove(version);
            }
        }
        updated.metadata.updated_at = Utc::now().timestamp();

        self.save_record(&updated).await?;
        *record = updated;

        info!(
            key_id = %key_id,
            pruned = ?pruned,
            archived = archive,
            "Pruned old key versions"
        );
        Ok(pruned)
    }

    async fn list_organizations(&self) -> KeyResult<Vec<String>> {
        let records = self.records.read().await;
        let organizations: BTreeSet<String> = records
            .values()
            .map(|r| r.metadata.organization_id.clone())
            .collect();
        Ok(organizations.into_iter().collect())
    }

    async fn last_rotated_at(
        &self,
        organization_id: &str,
        key_type: KeyType,
    ) -> KeyResult<Option<DateTime<Utc>>> {
        let metadata = self.metadata(organization_id, key_type).await?;
        Ok(metadata
            .last_rotated_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single()))
    }
}
