//! Access to records holding encrypted fields
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


use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{RotationError, RotationResult};

/// A row of a business model, reduced to the fields rotation cares about
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Count, page and update encrypted columns of business models
#[async_trait]
pub trait EncryptedDataStore: Send + Sync {
    /// Records of the organization whose `field` is set
    async fn count_encrypted(
        &self,
        model_name: &str,
        field_name: &str,
        organization_id: &str,
    ) -> RotationResult<u64>;

    /// Page of records whose `field` is set, in a stable order
    async fn fetch_page(
        &self,
        model_name: &str,
        field_name: &str,
        organization_id: &str,
        offset: u64,
        limit: u64,
    ) -> RotationResult<Vec<Record>>;

    /// Overwrite one field of one record
    async fn update_field(
        &self,
        model_name: &str,
        field_name: &str,
        organization_id: &str,
        record_id: &str,
        value: &str,
    ) -> RotationResult<()>;
}

#[derive(Debug, Clone)]
struct StoredRecord {
    organization_id: String,
    record: Record,
}

/// Process-local data store, ordered by insertion
#[derive(Default)]
pub struct InMemoryDataStore {
    models: RwLock<HashMap<String, Vec<StoredRecord>>>,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, model_name: &str, organization_id: &str, record: Record) {
        self.models
            .write()
            .await
            .entry(model_name.to_string())
            .or_default()
            .push(StoredRecord {
                organization_id: organization_id.to_string(),
                record,
            });
    }

    pub async fn get(&self, model_name: &str, record_id: &str) -> Option<Record> {
        self.models
            .read()
            .await
            .get(model_name)?
            .iter()
            .find(|stored| stored.record.id == record_id)
            .map(|stored| stored.record.clone())
    }

    fn matches(stored: &StoredRecord, field_name: &str, organization_id: &str) -> bool {
        stored.organization_id == organization_id
            && stored
                .record
                .field(field_name)
                .is_some_and(|value| !value.is_null())
    }
}

#[async_trait]
impl EncryptedDataStore for InMemoryDataStore {
    async fn count_encrypted(
        &self,
        model_name: &str,
        field_name: &str,
        organization_id: &str,
    ) -> RotationResult<u64> {
        let models = self.models.read().await;
        let count = models
            .get(model_name)
            .map(|records| {
                records
                    .iter()
                    .filter(|stored| Self::matches(stored, field_name, organization_id))
                    .count()
            })
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn fetch_page(
        &self,
        model_name: &str,
        field_name: &str,
        organization_id: &str,
        offset: u64,
        limit: u64,
    ) -> RotationResult<Vec<Record>> {
        let models = self.models.read().await;
        let Some(records) = models.get(model_name) else {
            return Ok(Vec::new());
        };

        Ok(records
            .iter()
            .filter(|stored| Self::matches(stored, field_name, organization_id))
            .skip(offset as usize)
            .take(limit as usize)
            .map(|stored| stored.record.clone())
            .collect())
    }

    async fn update_field(
        &self,
        model_name: &str,
        field_name: &str,
        organization_id: &str,
        record_id: &str,
        value: &str,
    ) -> RotationResult<()> {
        let mut models = self.models.write().await;
        let stored = models
            .get_mut(model_name)
            .and_then(|records| {
                records.iter_mut().find(|stored| {
                    stored.record.id == record_id && stored.organization_id == organization_id
                })
            })
            .ok_or_else(|| {
                RotationError::Store(format!("{} record {} not found", model_name, record_id))
            })?;

        stored
            .record
            .fields
            .insert(field_name.to_string(), Value::String(value.to_string()));
        Ok(())
    }
}
