//! Rotation Worker
//!
//! Runs the key rotation orchestrator, its scheduler and the audit engine,
//! and consumes rotation requests from the message bus.
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


use anyhow::Result;
use keyward_audit::{AuditEngine, AuditEngineConfig, AuditStore, InMemoryAuditStore, PostgresAuditStore};
use keyward_config::{AppConfig, LogFormat};
use keyward_keys::init_key_manager;
use keyward_logging::init_logging_with_format;
use message_bus_client::{MessageBusClient, NatsClient};
use rotation_worker::{
    EncryptedDataStore, EncryptedFieldRegistry, InMemoryDataStore, KeyRotationOrchestrator,
    OrchestratorConfig, PostgresDataStore, ReEncryptionPipeline, RetryConfig, RotationWorker,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "rotation-worker";
const AUDIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    init_logging_with_format(
        SERVICE_NAME,
        config.log_level(),
        config.log_format == LogFormat::Json,
    );

    info!("Starting Rotation Worker");
    info!(
        message_bus_url = config.message_bus_url(),
        key_storage_path = %config.key_storage.path,
        max_concurrent_jobs = config.rotation.max_concurrent_jobs,
        "Configuration loaded"
    );

    let keys = init_key_manager(
        Some(&config.key_storage.path),
        config.key_storage.master_key.as_deref(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to initialize key manager: {}", e))?;

    let registry = EncryptedFieldRegistry::default();
    let (audit_store, data_store) = match config.database_url.as_deref() {
        Some(url) => {
            let audit_store: Arc<dyn AuditStore> = Arc::new(
                PostgresAuditStore::connect(url)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to connect audit store: {}", e))?,
            );
            let data_store: Arc<dyn EncryptedDataStore> = Arc::new(
                PostgresDataStore::connect(url, registry.clone())
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to connect data store: {}", e))?,
            );
            (audit_store, data_store)
        }
        None => {
            warn!("DATABASE_URL not set, audit log and business data are kept in memory");
            let audit_store: Arc<dyn AuditStore> = Arc::new(InMemoryAuditStore::new());
            let data_store: Arc<dyn EncryptedDataStore> = Arc::new(InMemoryDataStore::new());
            (audit_store, data_store)
        }
    };

    // Connect to message bus (optional)
    let message_bus: Option<Arc<dyn MessageBusClient>> = match NatsClient::with_subject_prefix(
        config.message_bus_url(),
        config.message_bus.stream_name.clone(),
        config.message_bus.subject_prefix.clone(),
    )
    .await
    {
        Ok(client) => {
            info!("Connected to message bus");
            let bus: Arc<dyn MessageBusClient> = Arc::new(client);
            Some(bus)
        }
        Err(e) => {
            warn!(error = %e, "Message bus unavailable, rotation requests will not be consumed");
            None
        }
    };

    let audit_config = AuditEngineConfig {
        buffer_capacity: config.audit.buffer_capacity,
        flush_interval: Duration::from_secs(config.audit.flush_interval_secs),
        ..AuditEngineConfig::default()
    };
    let audit = Arc::new(match &message_bus {
        Some(bus) => AuditEngine::with_message_bus(audit_store, audit_config, Arc::clone(bus)),
        None => AuditEngine::new(audit_store, audit_config),
    });
    audit.start_flush_timer();

    let pipeline = ReEncryptionPipeline::new(registry, data_store, keys.encryptor.clone())
        .with_retry_config(RetryConfig::with_attempts(
            config.rotation.fetch_max_attempts,
            config.rotation.fetch_retry_delay_ms,
        ));

    let orchestrator_config = OrchestratorConfig {
        max_concurrent_jobs: config.rotation.max_concurrent_jobs,
        scheduler_interval: Duration::from_secs(config.rotation.scheduler_interval_secs),
        job_retention: Duration::from_secs(config.rotation.job_retention_secs),
        ..OrchestratorConfig::default()
    };
    let mut orchestrator =
        KeyRotationOrchestrator::new(orchestrator_config, keys.key_manager.clone(), pipeline)
            .with_audit(Arc::clone(&audit));
    if let Some(bus) = &message_bus {
        orchestrator = orchestrator.with_message_bus(Arc::clone(bus));
    }
    let orchestrator = Arc::new(orchestrator);
    orchestrator.start_scheduler();

    // Consume rotation requests
    let worker_handle = message_bus.map(|bus| {
        let worker = RotationWorker::new(bus, Arc::clone(&orchestrator));
        tokio::spawn(async move {
            if let Err(e) = worker.run().await {
                error!(error = %e, "Worker error");
            }
        })
    });

    // Audit retention
    let retention_days = config.audit.retention_days;
    let cleanup_audit = Arc::clone(&audit);
    let cleanup_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(AUDIT_CLEANUP_INTERVAL);
        loop {
            ticker.tick().await;
            match cleanup_audit.cleanup_old_logs(retention_days).await {
                Ok(deleted) => info!(
                    deleted = deleted,
                    retention_days = retention_days,
                    "Audit retention applied"
                ),
                Err(e) => error!(error = %e, "Audit retention cleanup failed"),
            }
        }
    });

    // Wait for shutdown signal
    info!("Rotation Worker running. Press Ctrl+C to stop.");
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
        }
        Err(err) => {
            error!(error = %err, "Unable to listen for shutdown signal");
        }
    }

    if let Some(handle) = worker_handle {
        handle.abort();
    }
    cleanup_handle.abort();
    orchestrator.stop_scheduler();

    let active = orchestrator.get_active_jobs().await;
    if !active.is_empty() {
        warn!(
            active_jobs = active.len(),
            "Stopping with rotations in flight, staged key versions resume on the next run"
        );
    }

    match audit.shutdown().await {
        Ok(flushed) => info!(flushed = flushed, "Audit buffer flushed"),
        Err(e) => error!(error = %e, "Final audit flush failed"),
    }

    info!("Rotation Worker stopped");
    Ok(())
}
