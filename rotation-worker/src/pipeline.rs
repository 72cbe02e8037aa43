//! Re-encryption pipeline
//!
//! Builds the per-job plan over the encrypted field registry and migrates one
//! (model, field) pair at a time, page by page, to the job's new key version.
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


use keyward_audit::{AuditEngine, AuditEventType, NewAuditEvent};
use keyward_keys::{EncryptionContext, FieldEncryptor, KeyHandle};
use keyward_types::RotationJob;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::data_store::{EncryptedDataStore, Record};
use crate::error::{RotationError, RotationResult};
use crate::job::JobTable;
use crate::registry::EncryptedFieldRegistry;
use crate::retry::{retry_with_backoff, RetryConfig};

/// Rough per-record cost used for plan estimates
pub const ESTIMATED_MS_PER_RECORD: u64 = 10;

/// Work for one encrypted column, computed fresh for every job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReEncryptionPlanEntry {
    pub model_name: String,
    pub field_name: String,
    pub total_records: u64,
    pub batch_size: u64,
    pub estimated_duration: Duration,
}

/// How a plan entry ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Finished,
    /// The job left the in-progress state between batches
    Stopped,
}

/// Page size for a column with `total_records` encrypted values
pub fn batch_size_for(total_records: u64) -> u64 {
    match total_records {
        0..=1_000 => 100,
        1_001..=10_000 => 500,
        10_001..=100_000 => 1_000,
        _ => 2_000,
    }
}

pub fn estimate_duration(total_records: u64) -> Duration {
    Duration::from_millis(total_records.saturating_mul(ESTIMATED_MS_PER_RECORD))
}

pub struct ReEncryptionPipeline {
    registry: EncryptedFieldRegistry,
    data_store: Arc<dyn EncryptedDataStore>,
    encryptor: Arc<dyn FieldEncryptor>,
    retry_config: RetryConfig,
    pub(crate) audit: Option<Arc<AuditEngine>>,
}

impl ReEncryptionPipeline {
    pub fn new(
        registry: EncryptedFieldRegistry,
        data_store: Arc<dyn EncryptedDataStore>,
        encryptor: Arc<dyn FieldEncryptor>,
    ) -> Self {
        Self {
            registry,
            data_store,
            encryptor,
            retry_config: RetryConfig::default(),
            audit: None,
        }
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Report per-record failures to the audit log
    pub fn with_audit(mut self, audit: Arc<AuditEngine>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn registry(&self) -> &EncryptedFieldRegistry {
        &self.registry
    }

    /// One entry per registered column holding at least one value for the organization
    pub async fn create_re_encryption_plan(
        &self,
        organization_id: &str,
    ) -> RotationResult<Vec<ReEncryptionPlanEntry>> {
        let mut plan = Vec::new();

        for field in self.registry.fields() {
            let total_records = self
                .data_store
                .count_encrypted(&field.model_name, &field.field_name, organization_id)
                .await?;
            if total_records == 0 {
                continue;
            }

            plan.push(ReEncryptionPlanEntry {
                model_name: field.model_name.clone(),
                field_name: field.field_name.clone(),
                total_records,
                batch_size: batch_size_for(total_records),
                estimated_duration: estimate_duration(total_records),
            });
        }

        let total: u64 = plan.iter().map(|e| e.total_records).sum();
        info!(
            organization_id = organization_id,
            entries = plan.len(),
            total_records = total,
            estimated_ms = estimate_duration(total).as_millis() as u64,
            "Re-encryption plan created"
        );

        Ok(plan)
    }

    /// Migrate every record of one plan entry.
    ///
    /// Record failures are counted on the job and do not stop the entry; a page
    /// that cannot be fetched after all retries fails the whole entry.
    pub async fn re_encrypt_model_data(
        &self,
        jobs: &JobTable,
        job: &RotationJob,
        entry: &ReEncryptionPlanEntry,
        new_key: &KeyHandle,
    ) -> RotationResult<EntryOutcome> {
        let mut offset: u64 = 0;

        loop {
            let limit = entry.batch_size.min(entry.total_records.saturating_sub(offset));
            if limit == 0 {
                break;
            }

            if !jobs.is_in_progress(job.id).await {
                info!(
                    job_id = %job.id,
                    model = %entry.model_name,
                    field = %entry.field_name,
                    offset = offset,
                    "Job no longer in progress, stopping re-encryption"
                );
                return Ok(EntryOutcome::Stopped);
            }

            let page = self.fetch_page(job, entry, offset, limit).await?;
            if page.is_empty() {
                break;
            }

            for record in &page {
                match self
                    .re_encrypt_record(&entry.model_name, &entry.field_name, record, job, new_key)
                    .await
                {
                    Ok(true) => {
                        jobs.record_processed(job.id).await;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        jobs.record_failed(job.id).await;
                        warn!(
                            job_id = %job.id,
                            record_id = %record.id,
                            model = %entry.model_name,
                            field = %entry.field_name,
                            error = %e,
                            "Record re-encryption failed"
                        );
                        self.audit_record_failure(job, entry, record, &e).await;
                    }
                }
            }

            debug!(
                job_id = %job.id,
                model = %entry.model_name,
                field = %entry.field_name,
                offset = offset,
                batch = page.len(),
                "Batch re-encrypted"
            );
            offset += page.len() as u64;
        }

        Ok(EntryOutcome::Finished)
    }

    async fn fetch_page(
        &self,
        job: &RotationJob,
        entry: &ReEncryptionPlanEntry,
        offset: u64,
        limit: u64,
    ) -> RotationResult<Vec<Record>> {
        let store = Arc::clone(&self.data_store);
        let model = entry.model_name.clone();
        let field = entry.field_name.clone();
        let organization_id = job.organization_id.clone();

        retry_with_backoff(&self.retry_config, || {
            let store = Arc::clone(&store);
            let model = model.clone();
            let field = field.clone();
            let organization_id = organization_id.clone();
            Box::pin(async move {
                store
                    .fetch_page(&model, &field, &organization_id, offset, limit)
                    .await
            })
        })
        .await
        .map_err(|e| RotationError::BatchFetchFailure {
            model: entry.model_name.clone(),
            field: entry.field_name.clone(),
            offset,
            attempts: self.retry_config.max_attempts(),
            reason: e.to_string(),
        })
    }

    /// Move one field value from the job's old key version to `new_key`.
    ///
    /// Returns `Ok(false)` when the record holds nothing to migrate. A value
    /// already under the new version counts as migrated, so a resumed job does
    /// not fail on records an earlier attempt rewrote.
    pub async fn re_encrypt_record(
        &self,
        model_name: &str,
        field_name: &str,
        record: &Record,
        job: &RotationJob,
        new_key: &KeyHandle,
    ) -> RotationResult<bool> {
        let Some(Value::String(ciphertext)) = record.field(field_name) else {
            return Ok(false);
        };

        if self.encryptor.key_version_of(ciphertext) == Some(new_key.version) {
            return Ok(true);
        }

        let failure = |reason: String| RotationError::RecordReEncryptionFailure {
            record_id: record.id.clone(),
            field: field_name.to_string(),
            reason,
        };

        let old_context = EncryptionContext::new(&job.organization_id, field_name, job.old_version);
        let plaintext = self
            .encryptor
            .decrypt_field(ciphertext, &old_context)
            .await
            .map_err(|e| failure(e.to_string()))?;

        let new_context = EncryptionContext::new(&job.organization_id, field_name, new_key.version);
        let reencrypted = self
            .encryptor
            .encrypt_field(&plaintext, &new_context)
            .await
            .map_err(|e| failure(e.to_string()))?;

        self.data_store
            .update_field(
                model_name,
                field_name,
                &job.organization_id,
                &record.id,
                &reencrypted,
            )
            .await
            .map_err(|e| failure(e.to_string()))?;

        Ok(true)
    }

    async fn audit_record_failure(
        &self,
        job: &RotationJob,
        entry: &ReEncryptionPlanEntry,
        record: &Record,
        error: &RotationError,
    ) {
        let Some(audit) = &self.audit else {
            return;
        };

        let event = NewAuditEvent::new(
            &job.organization_id,
            AuditEventType::DataEncryption,
            "re_encrypt_record",
        )
        .failed()
        .with_field(&entry.model_name, &entry.field_name)
        .with_record(&record.id);

        if let Err(e) = audit.log_event(event).await {
            warn!(
                job_id = %job.id,
                record_error = %error,
                error = %e,
                "Failed to audit record failure"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_steps() {
        assert_eq!(batch_size_for(1), 100);
        assert_eq!(batch_size_for(1_000), 100);
        assert_eq!(batch_size_for(1_001), 500);
        assert_eq!(batch_size_for(10_000), 500);
        assert_eq!(batch_size_for(100_000), 1_000);
        assert_eq!(batch_size_for(100_001), 2_000);
    }

    #[test]
    fn test_batch_size_is_monotonic() {
        let samples = [0, 10, 999, 1_000, 5_000, 50_000, 500_000, u64::MAX];
        for pair in samples.windows(2) {
            assert!(batch_size_for(pair[0]) <= batch_size_for(pair[1]));
        }
    }

    #[test]
    fn test_estimate_is_linear() {
        assert_eq!(estimate_duration(0), Duration::ZERO);
        assert_eq!(estimate_duration(300), Duration::from_secs(3));
        assert_eq!(estimate_duration(600), 2 * estimate_duration(300));
    }
}
