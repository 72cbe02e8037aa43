//! PostgreSQL audit log
//!
//! Events are written in a single transaction per flush so a batch is either
//! fully persisted or left in the caller's buffer.
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
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info};

use crate::error::{AuditError, AuditResult};
use crate::event::{AuditEvent, MAX_STORED_METRIC};
use crate::store::{AuditQuery, AuditStore};

const SELECT_COLUMNS: &str = r#"
    id, organization_id, event_type, operation, status, event_timestamp,
    risk_level, compliance_flags, integrity_hash, user_id, ip_address,
    model_name, field_name, record_id, duration_ms, data_size
"#;

/// Audit store backed by an `audit_events` table
pub struct PostgresAuditStore {
    client: Mutex<Client>,
}

impl PostgresAuditStore {
    /// Connect and make sure the schema exists
    pub async fn connect(database_url: &str) -> AuditResult<Self> {
        info!("Connecting to audit database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "Audit database connection error");
            }
        });

        Self::run_migrations(&client).await?;

        info!("Audit database connected and initialized");

        Ok(Self {
            client: Mutex::new(client),
        })
    }

    async fn run_migrations(client: &Client) -> AuditResult<()> {
        client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS audit_events (
                    id UUID PRIMARY KEY,
                    organization_id TEXT NOT NULL,
                    event_type VARCHAR(32) NOT NULL,
                    operation TEXT NOT NULL,
                    status VARCHAR(16) NOT NULL,
                    event_timestamp TIMESTAMPTZ NOT NULL,
                    risk_level VARCHAR(16) NOT NULL,
                    compliance_flags TEXT[] NOT NULL DEFAULT '{}',
                    integrity_hash CHAR(64) NOT NULL,
                    user_id TEXT,
                    ip_address TEXT,
                    model_name TEXT,
                    field_name TEXT,
                    record_id TEXT,
                    duration_ms BIGINT,
                    data_size BIGINT
                );

                CREATE INDEX IF NOT EXISTS idx_audit_events_org_time
                ON audit_events(organization_id, event_timestamp);

                CREATE INDEX IF NOT EXISTS idx_audit_events_time
                ON audit_events(event_timestamp);
                "#,
            )
            .await?;

        Ok(())
    }

    /// Recorded events are already capped at `MAX_STORED_METRIC`
    fn to_db_int(value: Option<u64>) -> Option<i64> {
        value.map(|v| i64::try_from(v.min(MAX_STORED_METRIC)).unwrap_or(i64::MAX))
    }

    fn from_db_int(value: Option<i64>) -> Option<u64> {
        value.map(|v| u64::try_from(v).unwrap_or(0))
    }

    fn event_from_row(row: &Row) -> AuditResult<AuditEvent> {
        let event_type: String = row.try_get("event_type")?;
        let status: String = row.try_get("status")?;
        let risk_level: String = row.try_get("risk_level")?;

        Ok(AuditEvent {
            id: row.try_get("id")?,
            organization_id: row.try_get("organization_id")?,
            event_type: event_type.parse()?,
            operation: row.try_get("operation")?,
            status: status.parse()?,
            timestamp: row.try_get("event_timestamp")?,
            risk_level: risk_level.parse()?,
            compliance_flags: row.try_get("compliance_flags")?,
            integrity_hash: row.try_get("integrity_hash")?,
            user_id: row.try_get("user_id")?,
            ip_address: row.try_get("ip_address")?,
            model_name: row.try_get("model_name")?,
            field_name: row.try_get("field_name")?,
            record_id: row.try_get("record_id")?,
            duration_ms: Self::from_db_int(row.try_get("duration_ms")?),
            data_size: Self::from_db_int(row.try_get("data_size")?),
        })
    }
}

#[async_trait]
impl AuditStore for PostgresAuditStore {
    async fn append_events(&self, events: &[AuditEvent]) -> AuditResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut client = self.client.lock().await;
        let transaction = client.transaction().await?;
        let statement = transaction
            .prepare(
                r#"
                INSERT INTO audit_events (
                    id, organization_id, event_type, operation, status, event_timestamp,
                    risk_level, compliance_flags, integrity_hash, user_id, ip_address,
                    model_name, field_name, record_id, duration_ms, data_size
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .await?;

        for event in events {
            let duration_ms = Self::to_db_int(event.duration_ms);
            let data_size = Self::to_db_int(event.data_size);
            transaction
                .execute(
                    &statement,
                    &[
                        &event.id,
                        &event.organization_id,
                        &event.event_type.as_str(),
                        &event.operation,
                        &event.status.as_str(),
                        &event.timestamp,
                        &event.risk_level.as_str(),
                        &event.compliance_flags,
                        &event.integrity_hash,
                        &event.user_id,
                        &event.ip_address,
                        &event.model_name,
                        &event.field_name,
                        &event.record_id,
                        &duration_ms,
                        &data_size,
                    ],
                )
                .await?;
        }

        transaction.commit().await?;

        debug!(count = events.len(), "Audit batch committed");
        Ok(())
    }

    async fn query_events(&self, query: &AuditQuery) -> AuditResult<Vec<AuditEvent>> {
        let sql = format!(
            "SELECT {} FROM audit_events \
             WHERE organization_id = $1 AND event_timestamp >= $2 AND event_timestamp <= $3 \
             ORDER BY event_timestamp, id",
            SELECT_COLUMNS
        );

        let client = self.client.lock().await;
        let rows = client
            .query(&sql, &[&query.organization_id, &query.start, &query.end])
            .await?;

        rows.iter().map(Self::event_from_row).collect()
    }

    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> AuditResult<u64> {
        let client = self.client.lock().await;
        let removed = client
            .execute(
                "DELETE FROM audit_events WHERE event_timestamp < $1",
                &[&cutoff],
            )
            .await
            .map_err(|e| AuditError::Store(format!("Failed to delete old audit events: {}", e)))?;

        Ok(removed)
    }
}
