//! Service integration helpers for using key management in services
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
use crate::field_encryptor::AesFieldEncryptor;
use crate::local_store::LocalKeyManager;
use std::env;
use std::sync::Arc;
use tracing::info;

/// Key manager and the field encryptor that reads from it
pub struct KeyServices {
    pub key_manager: Arc<LocalKeyManager>,
    pub encryptor: Arc<AesFieldEncryptor>,
}

/// Initialize the local key manager for a service
pub async fn init_key_manager(
    storage_path: Option<&str>,
    master_key: Option<&str>,
) -> KeyResult<KeyServices> {
    let path = storage_path
        .map(|p| p.to_string())
        .or_else(|| env::var("KEY_STORAGE_PATH").ok())
        .unwrap_or_else(|| "./keys".to_string());

    info!(path = %path, "Initializing key manager");

    let master_key = master_key
        .map(|m| m.to_string())
        .or_else(|| env::var("KEYWARD_MASTER_KEY").ok());
    let derived = LocalKeyManager::derive_master_key(master_key.as_deref());

    let key_manager = Arc::new(LocalKeyManager::new(&path, Some(&derived)).await?);
    let encryptor = Arc::new(AesFieldEncryptor::new(key_manager.clone()));

    Ok(KeyServices {
        key_manager,
        encryptor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::KeyManager;
    use keyward_types::KeyType;

    #[tokio::test]
    async fn test_init_key_manager_with_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();

        let services = init_key_manager(Some(path), Some("local dev passphrase"))
            .await
            .unwrap();
        services
            .key_manager
            .provision_organization("org-1", KeyType::FieldEncryption)
            .await
            .unwrap();

        // Same passphrase unwraps the same material after a restart
        let restarted = init_key_manager(Some(path), Some("local dev passphrase"))
            .await
            .unwrap();
        let handle = restarted
            .key_manager
            .current_key("org-1", KeyType::FieldEncryption)
            .await
            .unwrap();
        assert_eq!(handle.version, 1);
        assert!(restarted
            .key_manager
            .key_material("org-1", KeyType::FieldEncryption, 1)
            .await
            .is_ok());
    }
}
