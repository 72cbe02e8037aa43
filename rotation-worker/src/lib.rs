//! Key rotation worker
//!
//! Schedules and executes per-organization key rotations and re-encrypts
//! stored field values under the new key version.
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


pub mod data_store;
pub mod database;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod pipeline;
pub mod policy;
pub mod registry;
pub mod retry;
pub mod worker;

pub use data_store::{EncryptedDataStore, InMemoryDataStore, Record};
pub use database::PostgresDataStore;
pub use error::{RotationError, RotationResult};
pub use job::{Admission, JobTable, CANCELLED_BY_USER};
pub use orchestrator::{KeyRotationOrchestrator, OrchestratorConfig, RotationStats};
pub use pipeline::{
    batch_size_for, estimate_duration, EntryOutcome, ReEncryptionPipeline, ReEncryptionPlanEntry,
};
pub use policy::RotationPolicyStore;
pub use registry::{EncryptedField, EncryptedFieldRegistry, ENCRYPTED_FIELDS};
pub use retry::{retry_with_backoff, RetryConfig};
pub use worker::RotationWorker;
