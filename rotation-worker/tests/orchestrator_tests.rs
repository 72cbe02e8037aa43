//! Rotation orchestrator scenarios against a local key manager and in-memory stores
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
use keyward_audit::{AuditEngine, AuditEngineConfig, AuditEventType, InMemoryAuditStore};
use keyward_keys::{
    AesFieldEncryptor, EncryptionContext, FieldEncryptor, KeyManager, KeyType, LocalKeyManager,
};
use keyward_types::{
    EventType, JobProgress, JobStatus, KeyRotationCompletedPayload, RotationJob, RotationPolicy,
    RotationType,
};
use message_bus_client::InMemoryBus;
use rotation_worker::{
    EncryptedDataStore, EncryptedFieldRegistry, InMemoryDataStore, KeyRotationOrchestrator,
    OrchestratorConfig, ReEncryptionPipeline, Record, RetryConfig, RotationError, RotationResult,
    CANCELLED_BY_USER,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::assert_ok;
use uuid::Uuid;

const MASTER: [u8; 32] = [9u8; 32];

struct Harness {
    _dir: TempDir,
    keys: Arc<LocalKeyManager>,
    encryptor: Arc<AesFieldEncryptor>,
    data: Arc<InMemoryDataStore>,
    audit_store: Arc<InMemoryAuditStore>,
    audit: Arc<AuditEngine>,
    bus: Arc<InMemoryBus>,
    orchestrator: Arc<KeyRotationOrchestrator>,
}

async fn harness(organizations: &[&str]) -> Harness {
    harness_with_store(organizations, None).await
}

async fn harness_with_store(
    organizations: &[&str],
    data_store: Option<Arc<dyn EncryptedDataStore>>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let keys = Arc::new(LocalKeyManager::new(dir.path(), Some(&MASTER)).await.unwrap());
    for org in organizations {
        keys.provision_organization(org, KeyType::FieldEncryption)
            .await
            .unwrap();
    }
    let encryptor = Arc::new(AesFieldEncryptor::new(keys.clone()));
    let data = Arc::new(InMemoryDataStore::new());
    let store: Arc<dyn EncryptedDataStore> = match data_store {
        Some(store) => store,
        None => data.clone(),
    };

    let audit_store = Arc::new(InMemoryAuditStore::new());
    let audit = Arc::new(AuditEngine::new(
        audit_store.clone(),
        AuditEngineConfig::default(),
    ));
    let bus = Arc::new(InMemoryBus::new());

    let pipeline = ReEncryptionPipeline::new(
        EncryptedFieldRegistry::new([("vendors", "tax_id")]),
        store,
        encryptor.clone(),
    )
    .with_retry_config(RetryConfig::with_attempts(2, 0));

    let config = OrchestratorConfig {
        job_retention: Duration::from_secs(60),
        ..OrchestratorConfig::default()
    };
    let orchestrator = Arc::new(
        KeyRotationOrchestrator::new(config, keys.clone(), pipeline)
            .with_audit(audit.clone())
            .with_message_bus(bus.clone()),
    );

    Harness {
        _dir: dir,
        keys,
        encryptor,
        data,
        audit_store,
        audit,
        bus,
        orchestrator,
    }
}

impl Harness {
    async fn insert_encrypted(&self, org: &str, id: &str, plaintext: &str) {
        let context = EncryptionContext::new(org, "tax_id", 1);
        let ciphertext = self.encryptor.encrypt_field(plaintext, &context).await.unwrap();
        self.data
            .insert("vendors", org, Record::new(id).with_field("tax_id", ciphertext))
            .await;
    }

    async fn wait_for_terminal(&self, job_id: Uuid) -> RotationJob {
        for _ in 0..500 {
            if let Some(job) = self.orchestrator.get_job_status(job_id).await {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", job_id);
    }

    /// Lifecycle events are published after counters and audit are updated
    async fn wait_for_event(&self, event_type: EventType) {
        for _ in 0..500 {
            if self.bus.published().iter().any(|e| e.event_type == event_type) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{} was never published", event_type.as_str());
    }
}

#[tokio::test]
async fn test_rotation_with_one_failing_record_completes() {
    let h = harness(&["org-1"]).await;
    h.insert_encrypted("org-1", "v1", "12-3456789").await;
    h.insert_encrypted("org-1", "v2", "98-7654321").await;
    h.data
        .insert(
            "vendors",
            "org-1",
            Record::new("v3").with_field("tax_id", "enc:v1:00ff"),
        )
        .await;

    let job_id = h
        .orchestrator
        .schedule_key_rotation("org-1", RotationType::Manual)
        .await
        .unwrap();

    let scheduled = h.orchestrator.get_job_status(job_id).await.unwrap();
    assert_eq!(scheduled.status, JobStatus::Pending);
    assert_eq!(scheduled.old_version, 1);
    assert_eq!(scheduled.new_version, 2);

    let job = h.wait_for_terminal(job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(
        job.progress,
        JobProgress {
            total_records: 3,
            processed_records: 2,
            failed_records: 1,
        }
    );
    assert!(job.error.is_none());
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());

    let current = h.keys.current_key("org-1", KeyType::FieldEncryption).await.unwrap();
    assert_eq!(current.version, 2);

    // Migrated value reads back under the new version only
    let record = h.data.get("vendors", "v1").await.unwrap();
    let Some(Value::String(ciphertext)) = record.field("tax_id") else {
        panic!("tax_id missing");
    };
    assert_eq!(h.encryptor.key_version_of(ciphertext), Some(2));
    let plaintext = h
        .encryptor
        .decrypt_field(ciphertext, &EncryptionContext::new("org-1", "tax_id", 2))
        .await
        .unwrap();
    assert_eq!(plaintext, "12-3456789");

    // The broken value is left untouched
    let broken = h.data.get("vendors", "v3").await.unwrap();
    assert_eq!(broken.field("tax_id"), Some(&Value::from("enc:v1:00ff")));

    h.wait_for_event(EventType::KeyRotationCompleted).await;
    let published = h.bus.published();
    let completed = published
        .iter()
        .find(|e| e.event_type == EventType::KeyRotationCompleted)
        .expect("completed event published");
    let payload: KeyRotationCompletedPayload = completed.payload_as().unwrap();
    assert_eq!(payload.job_id, job_id);
    assert_eq!(payload.new_version, 2);

    h.audit.flush_audit_buffer().await.unwrap();
    let events = h.audit_store.all_events().await;
    assert!(events
        .iter()
        .any(|e| e.event_type == AuditEventType::KeyRotation && !e.is_failure()));
    let record_failures: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == AuditEventType::DataEncryption && e.is_failure())
        .collect();
    assert_eq!(record_failures.len(), 1);
    assert_eq!(record_failures[0].record_id.as_deref(), Some("v3"));

    let stats = h.orchestrator.get_rotation_stats().await;
    assert_eq!(stats.total_completed, 1);
    assert_eq!(stats.records_processed, 2);
    assert_eq!(stats.records_failed, 1);
    assert_eq!(stats.active_jobs, 0);
    assert_eq!(stats.completed_jobs, 1);
}

#[tokio::test]
async fn test_schedule_is_idempotent_per_organization() {
    let h = harness(&["org-1"]).await;

    let first = h
        .orchestrator
        .schedule_key_rotation("org-1", RotationType::Manual)
        .await
        .unwrap();
    let second = h
        .orchestrator
        .schedule_key_rotation("org-1", RotationType::Scheduled)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(h.orchestrator.get_active_jobs().await.len(), 1);
    assert_eq!(h.orchestrator.get_rotation_stats().await.total_scheduled, 1);

    h.wait_for_terminal(first).await;
}

#[tokio::test]
async fn test_fourth_organization_exceeds_ceiling() {
    let h = harness(&["org-1", "org-2", "org-3", "org-4"]).await;

    for org in ["org-1", "org-2", "org-3"] {
        assert_ok!(
            h.orchestrator
                .schedule_key_rotation(org, RotationType::Manual)
                .await
        );
    }

    let result = h
        .orchestrator
        .schedule_key_rotation("org-4", RotationType::Manual)
        .await;
    assert!(matches!(
        result,
        Err(RotationError::ConcurrencyLimitExceeded { limit: 3 })
    ));
    assert_eq!(h.orchestrator.get_active_jobs().await.len(), 3);
}

#[tokio::test]
async fn test_cancel_completed_job_is_noop() {
    let h = harness(&["org-1"]).await;
    h.insert_encrypted("org-1", "v1", "secret").await;

    let job_id = h
        .orchestrator
        .schedule_key_rotation("org-1", RotationType::Manual)
        .await
        .unwrap();
    let completed = h.wait_for_terminal(job_id).await;
    assert_eq!(completed.status, JobStatus::Completed);

    assert!(!h.orchestrator.cancel_job(job_id).await);
    assert_eq!(h.orchestrator.get_job_status(job_id).await, Some(completed));
}

#[tokio::test]
async fn test_cancel_pending_job_discards_staged_key() {
    let h = harness(&["org-1"]).await;
    h.insert_encrypted("org-1", "v1", "secret").await;

    let job_id = h
        .orchestrator
        .schedule_key_rotation("org-1", RotationType::Manual)
        .await
        .unwrap();
    assert!(h.orchestrator.cancel_job(job_id).await);

    let job = h.wait_for_terminal(job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some(CANCELLED_BY_USER));
    assert_eq!(job.progress.processed_records, 0);

    let current = h.keys.current_key("org-1", KeyType::FieldEncryption).await.unwrap();
    assert_eq!(current.version, 1);

    h.wait_for_event(EventType::KeyRotationFailed).await;
    assert_eq!(
        h.keys.staged_version("org-1", KeyType::FieldEncryption).await.unwrap(),
        None
    );
    assert!(h.orchestrator.get_active_jobs().await.is_empty());
}

#[tokio::test]
async fn test_emergency_rotation_respects_policy() {
    let h = harness(&["org-1", "org-2"]).await;
    let locked = RotationPolicy {
        emergency_rotation_enabled: false,
        ..RotationPolicy::default()
    };
    h.orchestrator
        .set_rotation_policy("org-1", locked)
        .await
        .unwrap();

    let denied = h
        .orchestrator
        .emergency_key_rotation("org-1", "laptop stolen")
        .await;
    assert!(matches!(denied, Err(RotationError::EmergencyRotationDisabled(_))));
    assert!(h.orchestrator.get_active_jobs().await.is_empty());

    let job_id = h
        .orchestrator
        .emergency_key_rotation("org-2", "credential leak")
        .await
        .unwrap();
    let job = h.orchestrator.get_job_status(job_id).await.unwrap();
    assert_eq!(job.rotation_type, RotationType::Emergency);
    assert_eq!(job.reason.as_deref(), Some("credential leak"));

    let job = h.wait_for_terminal(job_id).await;
    assert_eq!(job.status, JobStatus::Completed);
    h.wait_for_event(EventType::KeyRotationCompleted).await;

    h.audit.flush_audit_buffer().await.unwrap();
    let flagged = h
        .audit_store
        .all_events()
        .await
        .into_iter()
        .filter(|e| e.compliance_flags.iter().any(|f| f == "EMERGENCY_ROTATION"))
        .count();
    // Denied request, accepted request and the finished job
    assert_eq!(flagged, 3);
}

#[tokio::test]
async fn test_progress_never_exceeds_total() {
    let h = harness(&["org-1"]).await;
    for i in 0..250 {
        h.insert_encrypted("org-1", &format!("v{}", i), "value").await;
    }

    let job_id = h
        .orchestrator
        .schedule_key_rotation("org-1", RotationType::Manual)
        .await
        .unwrap();

    let job = loop {
        let job = h.orchestrator.get_job_status(job_id).await.unwrap();
        let progress = job.progress;
        assert!(progress.processed_records + progress.failed_records <= progress.total_records);
        if job.status.is_terminal() {
            break job;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    };

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress.processed_records, 250);
    assert_eq!(job.new_version, job.old_version + 1);
}

/// Store whose pages can never be read
struct UnreachableStore {
    inner: InMemoryDataStore,
}

#[async_trait]
impl EncryptedDataStore for UnreachableStore {
    async fn count_encrypted(
        &self,
        model_name: &str,
        field_name: &str,
        organization_id: &str,
    ) -> RotationResult<u64> {
        self.inner
            .count_encrypted(model_name, field_name, organization_id)
            .await
    }

    async fn fetch_page(
        &self,
        _model_name: &str,
        _field_name: &str,
        _organization_id: &str,
        _offset: u64,
        _limit: u64,
    ) -> RotationResult<Vec<Record>> {
        Err(RotationError::Store("connection reset".to_string()))
    }

    async fn update_field(
        &self,
        model_name: &str,
        field_name: &str,
        organization_id: &str,
        record_id: &str,
        value: &str,
    ) -> RotationResult<()> {
        self.inner
            .update_field(model_name, field_name, organization_id, record_id, value)
            .await
    }
}

#[tokio::test]
async fn test_batch_fetch_failure_fails_job() {
    let inner = InMemoryDataStore::new();
    inner
        .insert(
            "vendors",
            "org-1",
            Record::new("v1").with_field("tax_id", "enc:v1:00"),
        )
        .await;
    let store: Arc<dyn EncryptedDataStore> = Arc::new(UnreachableStore { inner });
    let h = harness_with_store(&["org-1"], Some(store)).await;

    let job_id = h
        .orchestrator
        .schedule_key_rotation("org-1", RotationType::Manual)
        .await
        .unwrap();
    let job = h.wait_for_terminal(job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error.unwrap();
    assert!(error.contains("after 2 attempts"), "{}", error);
    assert!(error.contains("connection reset"), "{}", error);

    h.wait_for_event(EventType::KeyRotationFailed).await;
    let current = h.keys.current_key("org-1", KeyType::FieldEncryption).await.unwrap();
    assert_eq!(current.version, 1);
    assert_eq!(
        h.keys.staged_version("org-1", KeyType::FieldEncryption).await.unwrap(),
        None
    );
    assert_eq!(h.orchestrator.get_rotation_stats().await.total_failed, 1);
}

#[tokio::test]
async fn test_scheduled_scan_skips_disabled_organizations() {
    let h = harness(&["org-1", "org-2"]).await;
    let manual_only = RotationPolicy {
        auto_rotation_enabled: false,
        ..RotationPolicy::default()
    };
    h.orchestrator
        .set_rotation_policy("org-2", manual_only)
        .await
        .unwrap();

    let scheduled = h.orchestrator.run_scheduled_scan().await;
    assert_eq!(scheduled.len(), 1);

    let job = h.orchestrator.get_job_status(scheduled[0]).await.unwrap();
    assert_eq!(job.organization_id, "org-1");
    assert_eq!(job.rotation_type, RotationType::Scheduled);

    // A second scan while the job runs schedules nothing new
    assert!(h.orchestrator.run_scheduled_scan().await.is_empty());

    let job = h.wait_for_terminal(scheduled[0]).await;
    assert_eq!(job.status, JobStatus::Completed);

    // Rotated just now, so not due for another interval
    assert!(h.orchestrator.run_scheduled_scan().await.is_empty());
}

#[tokio::test]
async fn test_scheduler_start_and_stop() {
    let h = harness(&["org-1"]).await;
    h.orchestrator.start_scheduler();
    assert!(h.orchestrator.is_scheduler_running());

    h.orchestrator.stop_scheduler();
    assert!(!h.orchestrator.is_scheduler_running());
}
