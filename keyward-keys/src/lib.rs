//! Key Management System for Keyward
//!
//! Provides per-organization key storage, staged rotation, version pruning
//! and a field encryptor built on top of the stored key material.
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


pub mod error;
pub mod field_encryptor;
pub mod key_types;
pub mod kms;
pub mod local_store;
pub mod service_integration;

pub use error::{KeyError, KeyResult};
pub use field_encryptor::AesFieldEncryptor;
pub use key_types::{EncryptionContext, KeyHandle, KeyId, KeyMetadata, KeyVersion, KeyVersionState};
pub use keyward_types::KeyType;
pub use kms::{FieldEncryptor, KeyManager};
pub use local_store::LocalKeyManager;
pub use service_integration::*;
