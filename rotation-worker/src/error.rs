//! Error types for key rotation
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


use keyward_keys::KeyError;
use keyward_types::KeywardError;
use thiserror::Error;
use uuid::Uuid;

/// Rotation orchestration errors
#[derive(Error, Debug)]
pub enum RotationError {
    /// Scheduling rejected; retry once a running job finishes
    #[error("Concurrent rotation limit reached ({limit} active jobs)")]
    ConcurrencyLimitExceeded { limit: usize },

    #[error("Emergency rotation is disabled for organization {0}")]
    EmergencyRotationDisabled(String),

    #[error("Failed to fetch {model}.{field} batch at offset {offset} after {attempts} attempts: {reason}")]
    BatchFetchFailure {
        model: String,
        field: String,
        offset: u64,
        attempts: u32,
        reason: String,
    },

    #[error("Failed to re-encrypt {field} of record {record_id}: {reason}")]
    RecordReEncryptionFailure {
        record_id: String,
        field: String,
        reason: String,
    },

    #[error("Rotation job {job_id} failed: {reason}")]
    JobExecutionFailure { job_id: Uuid, reason: String },

    #[error("Rotation job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Invalid rotation policy: {0}")]
    InvalidPolicy(#[from] KeywardError),

    #[error("Key management error: {0}")]
    Key(#[from] KeyError),

    #[error("Data store error: {0}")]
    Store(String),
}

impl From<tokio_postgres::Error> for RotationError {
    fn from(e: tokio_postgres::Error) -> Self {
        RotationError::Store(e.to_string())
    }
}

/// Result type for rotation operations
pub type RotationResult<T> = Result<T, RotationError>;
