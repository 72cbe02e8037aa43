//! Key type definitions
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


use keyward_types::KeyType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a key
pub type KeyId = String;

/// Build the key identifier for an organization's key of a given type
pub fn organization_key_id(organization_id: &str, key_type: KeyType) -> KeyId {
    format!("{}.{}", organization_id, key_type.as_str())
}

/// Reference to one version of an organization key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyHandle {
    pub id: KeyId,
    pub organization_id: String,
    pub key_type: KeyType,
    pub version: u32,
}

/// Encryption context passed to a field encryptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncryptionContext {
    pub organization_id: String,
    pub field_name: String,
    pub key_version: u32,
}

impl EncryptionContext {
    pub fn new(
        organization_id: impl Into<String>,
        field_name: impl Into<String>,
        key_version: u32,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            field_name: field_name.into(),
            key_version,
        }
    }
}

/// Lifecycle of a key version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyVersionState {
    /// Generated for an in-flight rotation, not yet the current version
    Staged,
    /// The current version used for new ciphertext
    Active,
    /// Superseded, still usable for decryption
    Retired,
    /// Pruned but material kept as a backup
    Archived,
    /// Pruned and material removed
    Destroyed,
}

impl KeyVersionState {
    /// Whether the version's material may be used by an encryptor
    pub fn is_usable(&self) -> bool {
        matches!(
            self,
            KeyVersionState::Staged | KeyVersionState::Active | KeyVersionState::Retired
        )
    }
}

impl fmt::Display for KeyVersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyVersionState::Staged => "staged",
            KeyVersionState::Active => "active",
            KeyVersionState::Retired => "retired",
            KeyVersionState::Archived => "archived",
            KeyVersionState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Key version information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyVersion {
    /// Version number (incremental)
    pub version: u32,
    /// When this version was created
    pub created_at: i64,
    pub state: KeyVersionState,
}

impl KeyVersion {
    pub fn new(version: u32, state: KeyVersionState) -> Self {
        Self {
            version,
            created_at: chrono::Utc::now().timestamp(),
            state,
        }
    }
}

/// Key metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMetadata {
    /// Key identifier
    pub id: KeyId,
    pub organization_id: String,
    /// Key type
    pub key_type: KeyType,
    /// Current active version
    pub current_version: u32,
    /// All versions of this key
    pub versions: Vec<KeyVersion>,
    /// When the key was created
    pub created_at: i64,
    /// When the key was last updated
    pub updated_at: i64,
    /// When a rotation last committed a new version
    pub last_rotated_at: Option<i64>,
}

impl KeyMetadata {
    pub fn new(organization_id: &str, key_type: KeyType) -> Self {
        let now = chrono::Utc::now().timestamp();

        Self {
            id: organization_key_id(organization_id, key_type),
            organization_id: organization_id.to_string(),
            key_type,
            current_version: 1,
            versions: vec![KeyVersion::new(1, KeyVersionState::Active)],
            created_at: now,
            updated_at: now,
            last_rotated_at: None,
        }
    }

    pub fn version(&self, version: u32) -> Option<&KeyVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    pub fn staged_version(&self) -> Option<&KeyVersion> {
        self.versions
            .iter()
            .find(|v| v.state == KeyVersionState::Staged)
    }

    pub fn handle(&self, version: u32) -> KeyHandle {
        KeyHandle {
            id: self.id.clone(),
            organization_id: self.organization_id.clone(),
            key_type: self.key_type,
            version,
        }
    }

    /// Promote a staged version to active and retire the previous one
    pub fn activate(&mut self, version: u32) -> bool {
        if !self
            .versions
            .iter()
            .any(|v| v.version == version && v.state == KeyVersionState::Staged)
        {
            return false;
        }

        for v in &mut self.versions {
            if v.version == version {
                v.state = KeyVersionState::Active;
            } else if v.state == KeyVersionState::Active {
                v.state = KeyVersionState::Retired;
            }
        }

        let now = chrono::Utc::now().timestamp();
        self.current_version = version;
        self.updated_at = now;
        self.last_rotated_at = Some(now);
        true
    }

    /// Versions still holding usable material, newest first
    pub fn retained_versions(&self) -> Vec<u32> {
        let mut versions: Vec<u32> = self
            .versions
            .iter()
            .filter(|v| matches!(v.state, KeyVersionState::Active | KeyVersionState::Retired))
            .map(|v| v.version)
            .collect();
        versions.sort_unstable_by(|a, b| b.cmp(a));
        versions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activate_retires_previous_version() {
        let mut metadata = KeyMetadata::new("org-1", KeyType::FieldEncryption);
        metadata.versions.push(KeyVersion::new(2, KeyVersionState::Staged));

        assert!(metadata.activate(2));
        assert_eq!(metadata.current_version, 2);
        assert_eq!(metadata.version(1).unwrap().state, KeyVersionState::Retired);
        assert_eq!(metadata.version(2).unwrap().state, KeyVersionState::Active);
        assert!(metadata.last_rotated_at.is_some());
        assert_eq!(metadata.retained_versions(), vec![2, 1]);
    }

    #[test]
    fn test_activate_requires_staged_version() {
        let mut metadata = KeyMetadata::new("org-1", KeyType::FieldEncryption);
        assert!(!metadata.activate(1));
        assert!(!metadata.activate(7));
        assert_eq!(metadata.current_version, 1);
    }

    #[test]
    fn test_key_id_format() {
        assert_eq!(
            organization_key_id("org-1", KeyType::FieldEncryption),
            "org-1.field_encryption"
        );
    }
}
