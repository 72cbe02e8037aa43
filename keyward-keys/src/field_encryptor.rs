//! AES-256-GCM field encryptor backed by the local key manager
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
use crate::key_types::EncryptionContext;
use crate::kms::FieldEncryptor;
use crate::local_store::LocalKeyManager;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use keyward_types::KeyType;
use sha2::{Digest, Sha256};
use std::sync::Arc;

const CIPHERTEXT_PREFIX: &str = "enc:v";
const NONCE_SIZE: usize = 12;

/// Field encryptor producing `enc:v{version}:{hex(nonce || ciphertext)}`
pub struct AesFieldEncryptor {
    keys: Arc<LocalKeyManager>,
}

impl AesFieldEncryptor {
    pub fn new(keys: Arc<LocalKeyManager>) -> Self {
        Self { keys }
    }

    /// Per-field subkey so one field's ciphertext cannot be replayed into another
    async fn field_cipher(&self, context: &EncryptionContext) -> KeyResult<Aes256Gcm> {
        let material = self
            .keys
            .key_material(
                &context.organization_id,
                KeyType::FieldEncryption,
                context.key_version,
            )
            .await?;

        let mut hasher = Sha256::new();
        hasher.update(material);
        hasher.update(b"|");
        hasher.update(context.field_name.as_bytes());
        let digest = hasher.finalize();

        let mut subkey = [0u8; 32];
        subkey.copy_from_slice(&digest);
        Ok(Aes256Gcm::new(&subkey.into()))
    }

    fn associated_data(context: &EncryptionContext) -> String {
        format!("{}|{}", context.organization_id, context.field_name)
    }

    /// Split `enc:v{n}:{hex}` into version and raw bytes
    fn parse(ciphertext: &str) -> KeyResult<(u32, Vec<u8>)> {
        let rest = ciphertext.strip_prefix(CIPHERTEXT_PREFIX).ok_or_else(|| {
            KeyError::InvalidFormat("Value is not an encrypted field".to_string())
        })?;
        let (version, body) = rest.split_once(':').ok_or_else(|| {
            KeyError::InvalidFormat("Missing key version separator".to_string())
        })?;
        let version = version
            .parse::<u32>()
            .map_err(|e| KeyError::InvalidFormat(format!("Invalid key version: {}", e)))?;
        let bytes = hex::decode(body)
            .map_err(|e| KeyError::InvalidFormat(format!("Invalid ciphertext encoding: {}", e)))?;
        Ok((version, bytes))
    }
}

#[async_trait]
impl FieldEncryptor for AesFieldEncryptor {
    async fn encrypt_field(
        &self,
        plaintext: &str,
        context: &EncryptionContext,
    ) -> KeyResult<String> {
        let cipher = self.field_cipher(context).await?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let aad = Self::associated_data(context);

        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| KeyError::Encryption(format!("Field encryption failed: {}", e)))?;

        let mut bytes = nonce.to_vec();
        bytes.extend_from_slice(&ciphertext);
        Ok(format!(
            "{}{}:{}",
            CIPHERTEXT_PREFIX,
            context.key_version,
            hex::encode(bytes)
        ))
    }

    async fn decrypt_field(
        &self,
        ciphertext: &str,
        context: &EncryptionContext,
    ) -> KeyResult<String> {
        let (version, bytes) = Self::parse(ciphertext)?;
        if version != context.key_version {
            return Err(KeyError::Decryption(format!(
                "Ciphertext is under key version {}, expected {}",
                version, context.key_version
            )));
        }
        if bytes.len() < NONCE_SIZE {
            return Err(KeyError::Decryption("Ciphertext too short".to_string()));
        }

        let cipher = self.field_cipher(context).await?;
        let (nonce_bytes, body) = bytes.split_at(NONCE_SIZE);
        let aad = Self::associated_data(context);

        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: body,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| KeyError::Decryption(format!("Field decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| KeyError::InvalidFormat(format!("Invalid UTF-8: {}", e)))
    }

    fn key_version_of(&self, ciphertext: &str) -> Option<u32> {
        Self::parse(ciphertext).ok().map(|(version, _)| version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::KeyManager;

    async fn encryptor(dir: &std::path::Path) -> (Arc<LocalKeyManager>, AesFieldEncryptor) {
        let keys = Arc::new(LocalKeyManager::new(dir, Some(&[1u8; 32])).await.unwrap());
        keys.provision_organization("org-1", KeyType::FieldEncryption)
            .await
            .unwrap();
        (keys.clone(), AesFieldEncryptor::new(keys))
    }

    #[tokio::test]
    async fn test_encrypt_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let (_, encryptor) = encryptor(dir.path()).await;
        let context = EncryptionContext::new("org-1", "tax_id", 1);

        let ciphertext = encryptor.encrypt_field("12-3456789", &context).await.unwrap();
        assert!(ciphertext.starts_with("enc:v1:"));
        assert_eq!(encryptor.key_version_of(&ciphertext), Some(1));

        let plaintext = encryptor.decrypt_field(&ciphertext, &context).await.unwrap();
        assert_eq!(plaintext, "12-3456789");
    }

    #[tokio::test]
    async fn test_ciphertext_bound_to_field() {
        let dir = tempfile::tempdir().unwrap();
        let (_, encryptor) = encryptor(dir.path()).await;

        let ciphertext = encryptor
            .encrypt_field("secret", &EncryptionContext::new("org-1", "tax_id", 1))
            .await
            .unwrap();
        let result = encryptor
            .decrypt_field(&ciphertext, &EncryptionContext::new("org-1", "email", 1))
            .await;
        assert!(matches!(result, Err(KeyError::Decryption(_))));
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (keys, encryptor) = encryptor(dir.path()).await;
        keys.rotate_organization_key("org-1", KeyType::FieldEncryption)
            .await
            .unwrap();

        let ciphertext = encryptor
            .encrypt_field("secret", &EncryptionContext::new("org-1", "tax_id", 2))
            .await
            .unwrap();
        let result = encryptor
            .decrypt_field(&ciphertext, &EncryptionContext::new("org-1", "tax_id", 1))
            .await;
        assert!(matches!(result, Err(KeyError::Decryption(_))));
    }

    #[tokio::test]
    async fn test_garbage_is_invalid_format() {
        let dir = tempfile::tempdir().unwrap();
        let (_, encryptor) = encryptor(dir.path()).await;

        let result = encryptor
            .decrypt_field("plain text", &EncryptionContext::new("org-1", "tax_id", 1))
            .await;
        assert!(matches!(result, Err(KeyError::InvalidFormat(_))));
        assert_eq!(encryptor.key_version_of("plain text"), None);
    }
}
