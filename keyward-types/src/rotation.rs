//! Key rotation job and policy types
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


use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{KeywardError, Result};

/// Key type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// Data key used for field-level encryption
    FieldEncryption,
    /// Key used to derive blind-index search tokens
    SearchIndex,
}

impl KeyType {
    /// Get default rotation period in days for this key type
    pub fn default_rotation_period_days(&self) -> u32 {
        match self {
            KeyType::FieldEncryption => 90,
            KeyType::SearchIndex => 365,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::FieldEncryption => "field_encryption",
            KeyType::SearchIndex => "search_index",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What triggered a rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationType {
    Manual,
    Scheduled,
    Emergency,
}

impl RotationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationType::Manual => "manual",
            RotationType::Scheduled => "scheduled",
            RotationType::Emergency => "emergency",
        }
    }
}

/// Lifecycle state of a rotation job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    /// Pending and in-progress jobs count against the concurrency ceiling
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record counters for a rotation job.
///
/// `processed_records + failed_records` never exceeds `total_records`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub total_records: u64,
    pub processed_records: u64,
    pub failed_records: u64,
}

impl JobProgress {
    pub fn remaining(&self) -> u64 {
        self.total_records
            .saturating_sub(self.processed_records + self.failed_records)
    }

    /// Count one processed record; returns false once the total is reached
    pub fn record_processed(&mut self) -> bool {
        if self.remaining() == 0 {
            return false;
        }
        self.processed_records += 1;
        true
    }

    /// Count one failed record; returns false once the total is reached
    pub fn record_failed(&mut self) -> bool {
        if self.remaining() == 0 {
            return false;
        }
        self.failed_records += 1;
        true
    }
}

/// A key rotation job for one organization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationJob {
    pub id: Uuid,
    pub organization_id: String,
    pub key_type: KeyType,
    pub rotation_type: RotationType,
    pub old_version: u32,
    pub new_version: u32,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Operator supplied reason (emergency rotations)
    pub reason: Option<String>,
}

impl RotationJob {
    /// Create a pending job targeting `old_version + 1`
    pub fn new(
        organization_id: impl Into<String>,
        key_type: KeyType,
        old_version: u32,
        rotation_type: RotationType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id: organization_id.into(),
            key_type,
            rotation_type,
            old_version,
            new_version: old_version + 1,
            status: JobStatus::Pending,
            progress: JobProgress::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Wall-clock duration of the job once it has started
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some(end - started)
    }
}

/// Per-organization rotation behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPolicy {
    /// `None` for the platform default policy
    pub organization_id: Option<String>,
    pub rotation_interval_days: u32,
    pub auto_rotation_enabled: bool,
    /// Archive pruned key versions instead of destroying them
    pub backup_old_keys: bool,
    pub max_key_versions: u32,
    pub emergency_rotation_enabled: bool,
}

/// Policy applied to organizations without their own
pub const DEFAULT_ROTATION_POLICY: RotationPolicy = RotationPolicy {
    organization_id: None,
    rotation_interval_days: 90,
    auto_rotation_enabled: true,
    backup_old_keys: true,
    max_key_versions: 5,
    emergency_rotation_enabled: true,
};

impl Default for RotationPolicy {
    fn default() -> Self {
        DEFAULT_ROTATION_POLICY
    }
}

impl RotationPolicy {
    /// Default policy re-targeted at one organization
    pub fn for_organization(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: Some(organization_id.into()),
            ..DEFAULT_ROTATION_POLICY
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.rotation_interval_days == 0 {
            return Err(KeywardError::InvalidPolicy(
                "rotation_interval_days must be at least 1".to_string(),
            ));
        }
        // The previous version must survive pruning so failed records stay readable
        if self.max_key_versions < 2 {
            return Err(KeywardError::InvalidPolicy(
                "max_key_versions must be at least 2".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a key last rotated at `last_rotated_at` is due at `now`
    pub fn is_rotation_due(
        &self,
        last_rotated_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        match last_rotated_at {
            None => true,
            Some(last) => {
                now - last >= chrono::Duration::days(i64::from(self.rotation_interval_days))
            }
        }
    }
}
