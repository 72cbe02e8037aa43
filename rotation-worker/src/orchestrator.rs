//! Key rotation orchestrator
//!
//! Owns the job table and drives each job from scheduling to the committed
//! key version. Execution runs on a spawned task; callers get the job id back
//! immediately and poll [`KeyRotationOrchestrator::get_job_status`].
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


use chrono::Utc;
use keyward_audit::{AuditEngine, AuditEventType, NewAuditEvent};
use keyward_keys::KeyManager;
use keyward_types::{
    Event, EventType, JobStatus, KeyRotationCompletedPayload, KeyRotationFailedPayload, KeyType,
    RotationJob, RotationPolicy, RotationType,
};
use message_bus_client::MessageBusClient;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{RotationError, RotationResult};
use crate::job::{Admission, JobTable, CANCELLED_BY_USER};
use crate::pipeline::{EntryOutcome, ReEncryptionPipeline};
use crate::policy::RotationPolicyStore;

pub const EVENT_SOURCE: &str = "rotation-worker";
pub const EMERGENCY_ROTATION_FLAG: &str = "EMERGENCY_ROTATION";

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent_jobs: usize,
    pub scheduler_interval: Duration,
    /// How long finished jobs stay queryable
    pub job_retention: Duration,
    pub key_type: KeyType,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            scheduler_interval: Duration::from_secs(3600),
            job_retention: Duration::from_secs(300),
            key_type: KeyType::FieldEncryption,
        }
    }
}

/// Snapshot of the job table plus lifetime counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RotationStats {
    pub active_jobs: usize,
    pub pending_jobs: usize,
    pub in_progress_jobs: usize,
    /// Finished jobs still inside the retention window
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub total_scheduled: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub records_processed: u64,
    pub records_failed: u64,
}

#[derive(Default)]
struct Counters {
    scheduled: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    records_processed: AtomicU64,
    records_failed: AtomicU64,
}

pub struct KeyRotationOrchestrator {
    config: OrchestratorConfig,
    key_manager: Arc<dyn KeyManager>,
    pipeline: ReEncryptionPipeline,
    policies: RotationPolicyStore,
    jobs: Arc<JobTable>,
    counters: Counters,
    audit: Option<Arc<AuditEngine>>,
    message_bus: Option<Arc<dyn MessageBusClient>>,
    scheduler: StdMutex<Option<JoinHandle<()>>>,
}

impl KeyRotationOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        key_manager: Arc<dyn KeyManager>,
        pipeline: ReEncryptionPipeline,
    ) -> Self {
        let jobs = Arc::new(JobTable::new(config.max_concurrent_jobs));
        Self {
            config,
            key_manager,
            pipeline,
            policies: RotationPolicyStore::new(),
            jobs,
            counters: Counters::default(),
            audit: None,
            message_bus: None,
            scheduler: StdMutex::new(None),
        }
    }

    /// Audit rotations, cancellations and record failures
    pub fn with_audit(mut self, audit: Arc<AuditEngine>) -> Self {
        self.pipeline.audit = Some(Arc::clone(&audit));
        self.audit = Some(audit);
        self
    }

    /// Publish completed and failed events
    pub fn with_message_bus(mut self, message_bus: Arc<dyn MessageBusClient>) -> Self {
        self.message_bus = Some(message_bus);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Schedule a rotation for the organization, returning its job id.
    ///
    /// An organization with a job still running gets that job's id back.
    /// This includes a cancelled job whose executor has not yet wound down,
    /// so callers should check [`Self::get_job_status`] and retry once the
    /// job no longer holds the organization.
    pub async fn schedule_key_rotation(
        self: &Arc<Self>,
        organization_id: &str,
        rotation_type: RotationType,
    ) -> RotationResult<Uuid> {
        self.schedule(organization_id, rotation_type, None).await
    }

    async fn schedule(
        self: &Arc<Self>,
        organization_id: &str,
        rotation_type: RotationType,
        reason: Option<String>,
    ) -> RotationResult<Uuid> {
        let current = self
            .key_manager
            .current_key(organization_id, self.config.key_type)
            .await?;

        let mut job = RotationJob::new(
            organization_id,
            self.config.key_type,
            current.version,
            rotation_type,
        );
        if let Some(reason) = reason {
            job = job.with_reason(reason);
        }

        match self.jobs.admit(job).await? {
            Admission::Existing(job_id) => {
                info!(
                    organization_id = organization_id,
                    job_id = %job_id,
                    "Rotation already running for organization"
                );
                Ok(job_id)
            }
            Admission::Created(job) => {
                self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
                info!(
                    organization_id = organization_id,
                    job_id = %job.id,
                    rotation_type = job.rotation_type.as_str(),
                    old_version = job.old_version,
                    new_version = job.new_version,
                    "Key rotation scheduled"
                );

                let job_id = job.id;
                let orchestrator = Arc::clone(self);
                tokio::spawn(async move {
                    orchestrator.execute_key_rotation(job).await;
                });
                Ok(job_id)
            }
        }
    }

    /// Run an admitted job to completion and return its final state
    pub async fn execute_key_rotation(&self, job: RotationJob) -> RotationJob {
        let mut staged_here = false;

        let error = match self.run_rotation(&job, &mut staged_here).await {
            Ok(()) => None,
            Err(e) => {
                error!(
                    job_id = %job.id,
                    organization_id = %job.organization_id,
                    error = %e,
                    "Key rotation failed"
                );
                if staged_here {
                    self.discard_unused_version(&job).await;
                }
                Some(e.to_string())
            }
        };

        let finished = self.jobs.finish(job.id, error).await.unwrap_or(job);
        self.record_outcome(&finished).await;
        self.schedule_eviction(finished.id);
        finished
    }

    async fn run_rotation(&self, job: &RotationJob, staged_here: &mut bool) -> RotationResult<()> {
        let organization_id = job.organization_id.as_str();
        let key_type = job.key_type;

        let plan = self.pipeline.create_re_encryption_plan(organization_id).await?;
        let total_records = plan.iter().map(|entry| entry.total_records).sum();

        let pre_staged = self
            .key_manager
            .staged_version(organization_id, key_type)
            .await?;
        let new_key = self
            .key_manager
            .rotate_organization_key(organization_id, key_type)
            .await?;
        *staged_here = pre_staged.is_none();

        if new_key.version != job.new_version {
            return Err(RotationError::JobExecutionFailure {
                job_id: job.id,
                reason: format!(
                    "staged key version {} does not match expected version {}",
                    new_key.version, job.new_version
                ),
            });
        }

        self.jobs.start(job.id, total_records).await?;
        info!(
            job_id = %job.id,
            organization_id = organization_id,
            total_records = total_records,
            entries = plan.len(),
            "Key rotation started"
        );

        for entry in &plan {
            let outcome = self
                .pipeline
                .re_encrypt_model_data(&self.jobs, job, entry, &new_key)
                .await?;
            if outcome == EntryOutcome::Stopped {
                return Err(RotationError::JobExecutionFailure {
                    job_id: job.id,
                    reason: CANCELLED_BY_USER.to_string(),
                });
            }
        }

        if !self.jobs.begin_finalizing(job.id).await {
            return Err(RotationError::JobExecutionFailure {
                job_id: job.id,
                reason: CANCELLED_BY_USER.to_string(),
            });
        }

        self.key_manager
            .commit_key_version(organization_id, key_type, job.new_version)
            .await?;

        let policy = self.policies.get_rotation_policy(organization_id).await;
        match self
            .key_manager
            .prune_key_versions(
                organization_id,
                key_type,
                policy.max_key_versions,
                policy.backup_old_keys,
            )
            .await
        {
            Ok(pruned) if !pruned.is_empty() => {
                info!(
                    organization_id = organization_id,
                    pruned = ?pruned,
                    archived = policy.backup_old_keys,
                    "Old key versions pruned"
                );
            }
            Ok(_) => {}
            // The new version is already committed; pruning is retried by the next rotation
            Err(e) => warn!(
                organization_id = organization_id,
                error = %e,
                "Failed to prune old key versions"
            ),
        }

        Ok(())
    }

    /// Drop the staged version when no record was written under it
    async fn discard_unused_version(&self, job: &RotationJob) {
        let processed = self
            .jobs
            .get(job.id)
            .await
            .map(|current| current.progress.processed_records)
            .unwrap_or(0);
        if processed > 0 {
            info!(
                job_id = %job.id,
                version = job.new_version,
                processed_records = processed,
                "Keeping staged key version for the next attempt"
            );
            return;
        }

        if let Err(e) = self
            .key_manager
            .discard_key_version(&job.organization_id, job.key_type, job.new_version)
            .await
        {
            warn!(
                job_id = %job.id,
                version = job.new_version,
                error = %e,
                "Failed to discard staged key version"
            );
        }
    }

    async fn record_outcome(&self, job: &RotationJob) {
        self.counters
            .records_processed
            .fetch_add(job.progress.processed_records, Ordering::Relaxed);
        self.counters
            .records_failed
            .fetch_add(job.progress.failed_records, Ordering::Relaxed);

        let mut audit_event = NewAuditEvent::new(
            &job.organization_id,
            AuditEventType::KeyRotation,
            "rotate_organization_key",
        );
        if let Some(elapsed) = job.elapsed() {
            audit_event = audit_event.with_duration_ms(elapsed.num_milliseconds().max(0) as u64);
        }

        let completed_at = job.completed_at.unwrap_or_else(Utc::now);
        let bus_event = match job.status {
            JobStatus::Completed => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                info!(
                    job_id = %job.id,
                    organization_id = %job.organization_id,
                    new_version = job.new_version,
                    processed_records = job.progress.processed_records,
                    failed_records = job.progress.failed_records,
                    "Key rotation completed"
                );
                Event::new(
                    EventType::KeyRotationCompleted,
                    EVENT_SOURCE,
                    KeyRotationCompletedPayload {
                        job_id: job.id,
                        organization_id: job.organization_id.clone(),
                        old_version: job.old_version,
                        new_version: job.new_version,
                        progress: job.progress,
                        completed_at,
                    },
                )
            }
            _ => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                audit_event = audit_event.failed();
                Event::new(
                    EventType::KeyRotationFailed,
                    EVENT_SOURCE,
                    KeyRotationFailedPayload {
                        job_id: job.id,
                        organization_id: job.organization_id.clone(),
                        old_version: job.old_version,
                        new_version: job.new_version,
                        error: job.error.clone().unwrap_or_default(),
                        failed_at: completed_at,
                    },
                )
            }
        };
        if job.rotation_type == RotationType::Emergency {
            audit_event = audit_event.with_flag(EMERGENCY_ROTATION_FLAG);
        }

        self.audit(audit_event).await;

        match bus_event {
            Ok(event) => self.publish(&event).await,
            Err(e) => warn!(job_id = %job.id, error = %e, "Failed to build rotation event"),
        }
    }

    fn schedule_eviction(&self, job_id: Uuid) {
        let jobs = Arc::clone(&self.jobs);
        let retention = self.config.job_retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if jobs.evict(job_id).await.is_some() {
                info!(job_id = %job_id, "Finished rotation job evicted");
            }
        });
    }

    async fn audit(&self, event: NewAuditEvent) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_event(event).await {
                warn!(error = %e, "Failed to record audit event");
            }
        }
    }

    async fn publish(&self, event: &Event) {
        let Some(message_bus) = &self.message_bus else {
            return;
        };
        if let Err(e) = message_bus.publish(event).await {
            warn!(
                event_type = event.event_type.as_str(),
                event_id = %event.event_id,
                error = %e,
                "Failed to publish rotation event"
            );
        }
    }

    /// Rotate outside the regular schedule, if the organization's policy allows it
    pub async fn emergency_key_rotation(
        self: &Arc<Self>,
        organization_id: &str,
        reason: &str,
    ) -> RotationResult<Uuid> {
        warn!(
            organization_id = organization_id,
            reason = reason,
            "Emergency key rotation requested"
        );

        let policy = self.policies.get_rotation_policy(organization_id).await;
        if !policy.emergency_rotation_enabled {
            self.audit(
                NewAuditEvent::new(
                    organization_id,
                    AuditEventType::KeyRotation,
                    "emergency_key_rotation",
                )
                .failed()
                .with_flag(EMERGENCY_ROTATION_FLAG),
            )
            .await;
            return Err(RotationError::EmergencyRotationDisabled(
                organization_id.to_string(),
            ));
        }

        let job_id = self
            .schedule(
                organization_id,
                RotationType::Emergency,
                Some(reason.to_string()),
            )
            .await?;

        self.audit(
            NewAuditEvent::new(
                organization_id,
                AuditEventType::KeyRotation,
                "emergency_key_rotation",
            )
            .with_record(job_id.to_string())
            .with_flag(EMERGENCY_ROTATION_FLAG),
        )
        .await;

        Ok(job_id)
    }

    pub async fn get_job_status(&self, job_id: Uuid) -> Option<RotationJob> {
        self.jobs.get(job_id).await
    }

    pub async fn get_active_jobs(&self) -> Vec<RotationJob> {
        self.jobs.active_jobs().await
    }

    /// Mark a pending or in-progress job as cancelled.
    ///
    /// The running batch finishes; the pipeline stops before the next one.
    pub async fn cancel_job(&self, job_id: Uuid) -> bool {
        if !self.jobs.cancel(job_id).await {
            return false;
        }

        info!(job_id = %job_id, "Rotation job cancelled");
        if let Some(job) = self.jobs.get(job_id).await {
            self.audit(
                NewAuditEvent::new(
                    &job.organization_id,
                    AuditEventType::KeyRotation,
                    "cancel_rotation_job",
                )
                .with_record(job_id.to_string()),
            )
            .await;
        }
        true
    }

    pub async fn get_rotation_policy(&self, organization_id: &str) -> RotationPolicy {
        self.policies.get_rotation_policy(organization_id).await
    }

    pub async fn set_rotation_policy(
        &self,
        organization_id: &str,
        policy: RotationPolicy,
    ) -> RotationResult<()> {
        self.policies
            .set_rotation_policy(organization_id, policy)
            .await?;
        self.audit(NewAuditEvent::new(
            organization_id,
            AuditEventType::PolicyChange,
            "set_rotation_policy",
        ))
        .await;
        Ok(())
    }

    pub async fn get_rotation_stats(&self) -> RotationStats {
        let mut stats = RotationStats {
            total_scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            total_completed: self.counters.completed.load(Ordering::Relaxed),
            total_failed: self.counters.failed.load(Ordering::Relaxed),
            records_processed: self.counters.records_processed.load(Ordering::Relaxed),
            records_failed: self.counters.records_failed.load(Ordering::Relaxed),
            ..RotationStats::default()
        };

        for job in self.jobs.all_jobs().await {
            match job.status {
                JobStatus::Pending => stats.pending_jobs += 1,
                JobStatus::InProgress => stats.in_progress_jobs += 1,
                JobStatus::Completed => stats.completed_jobs += 1,
                JobStatus::Failed => stats.failed_jobs += 1,
            }
        }
        stats.active_jobs = stats.pending_jobs + stats.in_progress_jobs;
        stats
    }

    /// Schedule every organization whose key is due, returning the new job ids
    pub async fn run_scheduled_scan(self: &Arc<Self>) -> Vec<Uuid> {
        let organizations = match self.key_manager.list_organizations().await {
            Ok(organizations) => organizations,
            Err(e) => {
                error!(error = %e, "Rotation scan could not list organizations");
                return Vec::new();
            }
        };

        let now = Utc::now();
        let mut scheduled = Vec::new();

        for organization_id in organizations {
            let policy = self.policies.get_rotation_policy(&organization_id).await;
            if !policy.auto_rotation_enabled {
                continue;
            }
            if self.jobs.job_for_organization(&organization_id).await.is_some() {
                continue;
            }

            let last_rotated_at = match self
                .key_manager
                .last_rotated_at(&organization_id, self.config.key_type)
                .await
            {
                Ok(last) => last,
                Err(e) => {
                    warn!(
                        organization_id = %organization_id,
                        error = %e,
                        "Could not read last rotation time"
                    );
                    continue;
                }
            };
            if !policy.is_rotation_due(last_rotated_at, now) {
                continue;
            }

            match self
                .schedule_key_rotation(&organization_id, RotationType::Scheduled)
                .await
            {
                Ok(job_id) => scheduled.push(job_id),
                Err(RotationError::ConcurrencyLimitExceeded { limit }) => {
                    info!(
                        limit = limit,
                        "Concurrent rotation limit reached, remaining organizations wait for the next scan"
                    );
                    break;
                }
                Err(e) => warn!(
                    organization_id = %organization_id,
                    error = %e,
                    "Failed to schedule rotation"
                ),
            }
        }

        if !scheduled.is_empty() {
            info!(count = scheduled.len(), "Scheduled key rotations");
        }
        scheduled
    }

    /// Scan for due rotations on a fixed interval until stopped or dropped
    pub fn start_scheduler(self: &Arc<Self>) {
        let orchestrator: Weak<Self> = Arc::downgrade(self);
        let period = self.config.scheduler_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(orchestrator) = orchestrator.upgrade() else {
                    break;
                };
                orchestrator.run_scheduled_scan().await;
            }
        });

        if let Ok(mut scheduler) = self.scheduler.lock() {
            if let Some(previous) = scheduler.replace(handle) {
                previous.abort();
            }
        }

        info!(
            interval_secs = period.as_secs(),
            "Rotation scheduler started"
        );
    }

    pub fn stop_scheduler(&self) {
        if let Ok(mut scheduler) = self.scheduler.lock() {
            if let Some(handle) = scheduler.take() {
                handle.abort();
                info!("Rotation scheduler stopped");
            }
        }
    }

    pub fn is_scheduler_running(&self) -> bool {
        self.scheduler
            .lock()
            .map(|scheduler| scheduler.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for KeyRotationOrchestrator {
    fn drop(&mut self) {
        self.stop_scheduler();
    }
}
