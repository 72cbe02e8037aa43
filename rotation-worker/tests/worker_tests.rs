//! Rotation requests consumed from the message bus
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


use keyward_keys::{AesFieldEncryptor, KeyType, LocalKeyManager};
use keyward_types::{Event, EventType, KeyRotationRequestedPayload, RotationType};
use message_bus_client::{InMemoryBus, MessageBusClient};
use rotation_worker::{
    EncryptedFieldRegistry, InMemoryDataStore, KeyRotationOrchestrator, OrchestratorConfig,
    ReEncryptionPipeline, RotationWorker,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

async fn orchestrator(dir: &TempDir) -> Arc<KeyRotationOrchestrator> {
    let keys = Arc::new(LocalKeyManager::new(dir.path(), Some(&[3u8; 32])).await.unwrap());
    keys.provision_organization("org-1", KeyType::FieldEncryption)
        .await
        .unwrap();
    let encryptor = Arc::new(AesFieldEncryptor::new(keys.clone()));
    let pipeline = ReEncryptionPipeline::new(
        EncryptedFieldRegistry::default(),
        Arc::new(InMemoryDataStore::new()),
        encryptor,
    );
    Arc::new(KeyRotationOrchestrator::new(
        OrchestratorConfig::default(),
        keys,
        pipeline,
    ))
}

fn request(org: &str, rotation_type: RotationType, reason: Option<&str>) -> Event {
    Event::new(
        EventType::KeyRotationRequested,
        "admin-api",
        KeyRotationRequestedPayload {
            organization_id: org.to_string(),
            rotation_type,
            reason: reason.map(str::to_string),
            requested_by: Some("ops@example.com".to_string()),
        },
    )
    .unwrap()
}

#[tokio::test]
async fn test_manual_request_schedules_job() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(&dir).await;
    let worker = RotationWorker::new(Arc::new(InMemoryBus::new()), orchestrator.clone());

    let job_id = assert_ok!(
        worker
            .process_rotation_request(&request("org-1", RotationType::Manual, None))
            .await
    );
    let job = orchestrator.get_job_status(job_id).await.unwrap();
    assert_eq!(job.organization_id, "org-1");
    assert_eq!(job.rotation_type, RotationType::Manual);
}

#[tokio::test]
async fn test_emergency_request_needs_reason() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(&dir).await;
    let worker = RotationWorker::new(Arc::new(InMemoryBus::new()), orchestrator.clone());

    assert_err!(
        worker
            .process_rotation_request(&request("org-1", RotationType::Emergency, Some("  ")))
            .await
    );
    assert!(orchestrator.get_active_jobs().await.is_empty());

    let job_id = assert_ok!(
        worker
            .process_rotation_request(&request(
                "org-1",
                RotationType::Emergency,
                Some("key material exposed")
            ))
            .await
    );
    let job = orchestrator.get_job_status(job_id).await.unwrap();
    assert_eq!(job.reason.as_deref(), Some("key material exposed"));
}

#[tokio::test]
async fn test_unknown_organization_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(&dir).await;
    let worker = RotationWorker::new(Arc::new(InMemoryBus::new()), orchestrator);

    assert_err!(
        worker
            .process_rotation_request(&request("org-unknown", RotationType::Manual, None))
            .await
    );
}

#[tokio::test]
async fn test_run_consumes_published_requests() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(&dir).await;
    let bus = Arc::new(InMemoryBus::new());
    let worker = RotationWorker::new(bus.clone(), orchestrator.clone());

    let handle = tokio::spawn(async move { worker.run().await });
    // Let the worker subscribe before publishing
    tokio::time::sleep(Duration::from_millis(20)).await;

    bus.publish(&request("org-1", RotationType::Manual, None))
        .await
        .unwrap();

    let mut scheduled = false;
    for _ in 0..200 {
        if orchestrator.get_rotation_stats().await.total_scheduled == 1 {
            scheduled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.abort();
    assert!(scheduled);
}
