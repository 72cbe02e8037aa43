//! Key management and field encryption interfaces
//!
//! The rotation orchestrator only talks to these traits, so the backing
//! implementation can be swapped:
//! - Local encrypted storage (current implementation)
//! - AWS KMS
//! - Azure Key Vault
//! - HashiCorp Vault
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


use crate::error::KeyResult;
use crate::key_types::{EncryptionContext, KeyHandle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyward_types::KeyType;

/// Per-organization key lifecycle operations
#[async_trait]
pub trait KeyManager: Send + Sync {
    /// Current active version of an organization key
    async fn current_key(&self, organization_id: &str, key_type: KeyType)
        -> KeyResult<KeyHandle>;

    /// Generate material for the next version without activating it.
    ///
    /// Calling this again while a staged version exists returns that version,
    /// so an interrupted rotation can resume with the same material.
    async fn rotate_organization_key(
        &self,
        organization_id: &str,
        key_type: KeyType,
    ) -> KeyResult<KeyHandle>;

    /// Version staged by an earlier, unfinished rotation
    async fn staged_version(
        &self,
        organization_id: &str,
        key_type: KeyType,
    ) -> KeyResult<Option<u32>>;

    /// Make a staged version the current one
    async fn commit_key_version(
        &self,
        organization_id: &str,
        key_type: KeyType,
        version: u32,
    ) -> KeyResult<()>;

    /// Drop a staged version that never protected any data
    async fn discard_key_version(
        &self,
        organization_id: &str,
        key_type: KeyType,
        version: u32,
    ) -> KeyResult<()>;

    /// Keep the newest `keep` versions; older ones are archived or destroyed.
    /// Returns the pruned version numbers.
    async fn prune_key_versions(
        &self,
        organization_id: &str,
        key_type: KeyType,
        keep: u32,
        archive: bool,
    ) -> KeyResult<Vec<u32>>;

    /// Organizations that hold at least one key
    async fn list_organizations(&self) -> KeyResult<Vec<String>>;

    /// When a rotation last committed a version, `None` if never rotated
    async fn last_rotated_at(
        &self,
        organization_id: &str,
        key_type: KeyType,
    ) -> KeyResult<Option<DateTime<Utc>>>;
}

/// Encrypts and decrypts individual field values
#[async_trait]
pub trait FieldEncryptor: Send + Sync {
    async fn encrypt_field(&self, plaintext: &str, context: &EncryptionContext)
        -> KeyResult<String>;

    async fn decrypt_field(&self, ciphertext: &str, context: &EncryptionContext)
        -> KeyResult<String>;

    /// Key version a ciphertext was produced under, when the format records it
    fn key_version_of(&self, _ciphertext: &str) -> Option<u32> {
        None
    }
}
