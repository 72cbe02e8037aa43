//! Event payload schemas
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
use uuid::Uuid;

use crate::rotation::{JobProgress, RotationType};

// ============================================================================
// Key Rotation Event Payloads
// ============================================================================

/// Payload for `key.rotation.requested` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRotationRequestedPayload {
    pub organization_id: String,
    pub rotation_type: RotationType,
    /// Required for emergency rotations
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub requested_by: Option<String>,
}

/// Payload for `key.rotation.completed` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRotationCompletedPayload {
    pub job_id: Uuid,
    pub organization_id: String,
    pub old_version: u32,
    pub new_version: u32,
    pub progress: JobProgress,
    pub completed_at: DateTime<Utc>,
}

/// Payload for `key.rotation.failed` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRotationFailedPayload {
    pub job_id: Uuid,
    pub organization_id: String,
    pub old_version: u32,
    pub new_version: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

// ============================================================================
// Audit Event Payloads
// ============================================================================

/// Payload for `audit.anomaly_detected` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyDetectedPayload {
    pub organization_id: String,
    /// Detector name, e.g. `rapid_failures`
    pub anomaly_type: String,
    pub event_count: u32,
    pub window_secs: u64,
    pub detected_at: DateTime<Utc>,
}
