//! Rotation job table
//!
//! Jobs are indexed by id and active jobs additionally by organization. Both
//! maps live under one lock so "is this organization busy", the concurrency
//! ceiling and the insert are decided together.
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
use keyward_types::{JobStatus, RotationJob};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{RotationError, RotationResult};

pub const CANCELLED_BY_USER: &str = "Cancelled by user";

/// Outcome of trying to register a job
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Created(RotationJob),
    /// The organization already has a job; its id is returned instead
    Existing(Uuid),
}

#[derive(Default)]
struct Jobs {
    by_id: HashMap<Uuid, RotationJob>,
    /// Organizations with an executor still running, and its job
    by_organization: HashMap<String, Uuid>,
    /// Jobs past the point where cancelling is possible
    finalizing: HashSet<Uuid>,
}

pub struct JobTable {
    max_concurrent_jobs: usize,
    inner: RwLock<Jobs>,
}

impl JobTable {
    pub fn new(max_concurrent_jobs: usize) -> Self {
        Self {
            max_concurrent_jobs: max_concurrent_jobs.max(1),
            inner: RwLock::new(Jobs::default()),
        }
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs
    }

    /// Register a pending job unless the organization is busy or the ceiling is reached
    pub async fn admit(&self, job: RotationJob) -> RotationResult<Admission> {
        let mut jobs = self.inner.write().await;

        if let Some(existing) = jobs.by_organization.get(&job.organization_id) {
            return Ok(Admission::Existing(*existing));
        }

        if jobs.by_organization.len() >= self.max_concurrent_jobs {
            return Err(RotationError::ConcurrencyLimitExceeded {
                limit: self.max_concurrent_jobs,
            });
        }

        jobs.by_organization
            .insert(job.organization_id.clone(), job.id);
        jobs.by_id.insert(job.id, job.clone());
        Ok(Admission::Created(job))
    }

    pub async fn get(&self, job_id: Uuid) -> Option<RotationJob> {
        self.inner.read().await.by_id.get(&job_id).cloned()
    }

    /// Job currently holding the organization's slot
    pub async fn job_for_organization(&self, organization_id: &str) -> Option<Uuid> {
        self.inner
            .read()
            .await
            .by_organization
            .get(organization_id)
            .copied()
    }

    /// Pending and in-progress jobs, oldest first
    pub async fn active_jobs(&self) -> Vec<RotationJob> {
        let mut active: Vec<RotationJob> = self
            .inner
            .read()
            .await
            .by_id
            .values()
            .filter(|job| job.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|job| job.created_at);
        active
    }

    /// Every retained job, oldest first
    pub async fn all_jobs(&self) -> Vec<RotationJob> {
        let mut all: Vec<RotationJob> = self.inner.read().await.by_id.values().cloned().collect();
        all.sort_by_key(|job| job.created_at);
        all
    }

    /// Move a pending job to in-progress with its record total
    pub async fn start(&self, job_id: Uuid, total_records: u64) -> RotationResult<RotationJob> {
        let mut jobs = self.inner.write().await;
        let job = jobs
            .by_id
            .get_mut(&job_id)
            .ok_or(RotationError::JobNotFound(job_id))?;

        if job.status != JobStatus::Pending {
            return Err(RotationError::JobExecutionFailure {
                job_id,
                reason: job
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("job is {}", job.status)),
            });
        }

        job.status = JobStatus::InProgress;
        job.started_at = Some(Utc::now());
        job.progress.total_records = total_records;
        Ok(job.clone())
    }

    pub async fn is_in_progress(&self, job_id: Uuid) -> bool {
        self.inner
            .read()
            .await
            .by_id
            .get(&job_id)
            .is_some_and(|job| job.status == JobStatus::InProgress)
    }

    /// Count one migrated record; false when the job is gone or already full
    pub async fn record_processed(&self, job_id: Uuid) -> bool {
        let mut jobs = self.inner.write().await;
        jobs.by_id
            .get_mut(&job_id)
            .is_some_and(|job| job.progress.record_processed())
    }

    pub async fn record_failed(&self, job_id: Uuid) -> bool {
        let mut jobs = self.inner.write().await;
        jobs.by_id
            .get_mut(&job_id)
            .is_some_and(|job| job.progress.record_failed())
    }

    /// Close the cancellation window; false if the job is no longer in progress
    pub async fn begin_finalizing(&self, job_id: Uuid) -> bool {
        let mut jobs = self.inner.write().await;
        let in_progress = jobs
            .by_id
            .get(&job_id)
            .is_some_and(|job| job.status == JobStatus::InProgress);
        if in_progress {
            jobs.finalizing.insert(job_id);
        }
        in_progress
    }

    /// Mark a pending or in-progress job failed; terminal or finalizing jobs are left alone
    pub async fn cancel(&self, job_id: Uuid) -> bool {
        let mut jobs = self.inner.write().await;
        if jobs.finalizing.contains(&job_id) {
            return false;
        }
        match jobs.by_id.get_mut(&job_id) {
            Some(job) if job.is_active() => {
                job.status = JobStatus::Failed;
                job.error = Some(CANCELLED_BY_USER.to_string());
                job.completed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Record the executor's outcome and free the organization's slot.
    ///
    /// A job already failed by cancellation keeps its status and error.
    pub async fn finish(&self, job_id: Uuid, error: Option<String>) -> Option<RotationJob> {
        let mut jobs = self.inner.write().await;
        jobs.finalizing.remove(&job_id);

        let job = jobs.by_id.get_mut(&job_id)?;
        if job.is_active() {
            match error {
                None => job.status = JobStatus::Completed,
                Some(error) => {
                    job.status = JobStatus::Failed;
                    job.error = Some(error);
                }
            }
            job.completed_at = Some(Utc::now());
        }
        let job = job.clone();

        if jobs.by_organization.get(&job.organization_id) == Some(&job_id) {
            jobs.by_organization.remove(&job.organization_id);
        }
        Some(job)
    }

    /// Drop a finished job from the table
    pub async fn evict(&self, job_id: Uuid) -> Option<RotationJob> {
        let mut jobs = self.inner.write().await;
        let finished = jobs
            .by_id
            .get(&job_id)
            .is_some_and(|job| job.status.is_terminal())
            && !jobs.by_organization.values().any(|id| *id == job_id);
        if finished {
            jobs.by_id.remove(&job_id)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_types::{KeyType, RotationType};

    fn job(org: &str) -> RotationJob {
        RotationJob::new(org, KeyType::FieldEncryption, 1, RotationType::Manual)
    }

    async fn admitted(table: &JobTable, org: &str) -> RotationJob {
        match table.admit(job(org)).await.unwrap() {
            Admission::Created(job) => job,
            Admission::Existing(id) => panic!("org already had job {}", id),
        }
    }

    #[tokio::test]
    async fn test_one_job_per_organization() {
        let table = JobTable::new(3);
        let first = admitted(&table, "org-1").await;

        let second = table.admit(job("org-1")).await.unwrap();
        assert_eq!(second, Admission::Existing(first.id));
        assert_eq!(table.active_jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn test_ceiling() {
        let table = JobTable::new(3);
        for org in ["org-1", "org-2", "org-3"] {
            admitted(&table, org).await;
        }

        let result = table.admit(job("org-4")).await;
        assert!(matches!(
            result,
            Err(RotationError::ConcurrencyLimitExceeded { limit: 3 })
        ));
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let table = JobTable::new(3);
        let job = admitted(&table, "org-1").await;

        let running = table.start(job.id, 2).await.unwrap();
        assert_eq!(running.status, JobStatus::InProgress);
        assert!(running.started_at.is_some());

        assert!(table.record_processed(job.id).await);
        assert!(table.record_failed(job.id).await);
        assert!(!table.record_processed(job.id).await);

        assert!(table.begin_finalizing(job.id).await);
        assert!(!table.cancel(job.id).await);

        let done = table.finish(job.id, None).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress.processed_records, 1);
        assert_eq!(done.progress.failed_records, 1);
        assert_eq!(table.job_for_organization("org-1").await, None);

        assert!(table.evict(job.id).await.is_some());
        assert!(table.get(job.id).await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_keeps_slot_until_executor_finishes() {
        let table = JobTable::new(3);
        let job = admitted(&table, "org-1").await;

        assert!(table.cancel(job.id).await);
        assert!(!table.cancel(job.id).await);
        assert_eq!(table.job_for_organization("org-1").await, Some(job.id));
        assert!(table.evict(job.id).await.is_none());
        tokio_test::assert_err!(table.start(job.id, 10).await);

        let finished = table
            .finish(job.id, Some("superseded".to_string()))
            .await
            .unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
        assert_eq!(finished.error.as_deref(), Some(CANCELLED_BY_USER));
        assert_eq!(table.job_for_organization("org-1").await, None);
    }

    #[tokio::test]
    async fn test_admit_returns_cancelled_job_until_it_finishes() {
        let table = JobTable::new(3);
        let cancelled = admitted(&table, "org-1").await;
        assert!(table.cancel(cancelled.id).await);

        let again = table.admit(job("org-1")).await.unwrap();
        assert_eq!(again, Admission::Existing(cancelled.id));
        let status = table.get(cancelled.id).await.unwrap();
        assert_eq!(status.status, JobStatus::Failed);
        assert_eq!(status.error.as_deref(), Some(CANCELLED_BY_USER));

        table.finish(cancelled.id, None).await;
        let fresh = admitted(&table, "org-1").await;
        assert_ne!(fresh.id, cancelled.id);
    }

    #[tokio::test]
    async fn test_failed_job_frees_ceiling() {
        let table = JobTable::new(1);
        let job = admitted(&table, "org-1").await;
        table.finish(job.id, Some("boom".to_string())).await;

        admitted(&table, "org-2").await;
    }
}
