//! PostgreSQL access to encrypted business tables
//!
//! Table and column names come only from the encrypted field registry; every
//! model table carries `id` and `organization_id` columns.
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
use serde_json::Value;
use tokio_postgres::{Client, NoTls};
use tracing::{error, info};

use crate::data_store::{EncryptedDataStore, Record};
use crate::error::{RotationError, RotationResult};
use crate::registry::EncryptedFieldRegistry;

/// Data store over the platform database
pub struct PostgresDataStore {
    client: Client,
    registry: EncryptedFieldRegistry,
}

impl PostgresDataStore {
    pub async fn connect(database_url: &str, registry: EncryptedFieldRegistry) -> RotationResult<Self> {
        info!("Connecting to data database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "Data database connection error");
            }
        });

        info!(fields = registry.fields().len(), "Data database connected");

        Ok(Self { client, registry })
    }

    /// Quoted identifiers for a registered (model, field) pair
    fn identifiers(&self, model_name: &str, field_name: &str) -> RotationResult<(String, String)> {
        if !self.registry.contains(model_name, field_name) {
            return Err(RotationError::Store(format!(
                "{}.{} is not a registered encrypted field",
                model_name, field_name
            )));
        }
        Ok((quote_identifier(model_name)?, quote_identifier(field_name)?))
    }
}

fn quote_identifier(name: &str) -> RotationResult<String> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        return Err(RotationError::Store(format!("Invalid identifier: {}", name)));
    }
    Ok(format!("\"{}\"", name))
}

fn to_db_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl EncryptedDataStore for PostgresDataStore {
    async fn count_encrypted(
        &self,
        model_name: &str,
        field_name: &str,
        organization_id: &str,
    ) -> RotationResult<u64> {
        let (table, column) = self.identifiers(model_name, field_name)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE organization_id::text = $1 AND {} IS NOT NULL",
            table, column
        );

        let row = self.client.query_one(&sql, &[&organization_id]).await?;
        let count: i64 = row.try_get(0)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn fetch_page(
        &self,
        model_name: &str,
        field_name: &str,
        organization_id: &str,
        offset: u64,
        limit: u64,
    ) -> RotationResult<Vec<Record>> {
        let (table, column) = self.identifiers(model_name, field_name)?;
        let sql = format!(
            "SELECT id::text, {column}::text FROM {table} \
             WHERE organization_id::text = $1 AND {column} IS NOT NULL \
             ORDER BY id LIMIT $2 OFFSET $3",
            table = table,
            column = column
        );

        let rows = self
            .client
            .query(&sql, &[&organization_id, &to_db_int(limit), &to_db_int(offset)])
            .await?;

        rows.iter()
            .map(|row| -> RotationResult<Record> {
                let id: String = row.try_get(0)?;
                let value: Option<String> = row.try_get(1)?;
                let value = value.map(Value::String).unwrap_or(Value::Null);
                Ok(Record::new(id).with_field(field_name, value))
            })
            .collect()
    }

    async fn update_field(
        &self,
        model_name: &str,
        field_name: &str,
        organization_id: &str,
        record_id: &str,
        value: &str,
    ) -> RotationResult<()> {
        let (table, column) = self.identifiers(model_name, field_name)?;
        let sql = format!(
            "UPDATE {} SET {} = $1 WHERE id::text = $2 AND organization_id::text = $3",
            table, column
        );

        let updated = self
            .client
            .execute(&sql, &[&value, &record_id, &organization_id])
            .await?;

        if updated == 0 {
            return Err(RotationError::Store(format!(
                "{} record {} not found",
                model_name, record_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("tax_id").unwrap(), "\"tax_id\"");
        assert!(quote_identifier("tax_id; DROP TABLE vendors").is_err());
        assert!(quote_identifier("").is_err());
        assert!(quote_identifier("Vendors").is_err());
    }
}
