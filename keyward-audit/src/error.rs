//! Error types for the audit engine
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


use thiserror::Error;

/// Audit engine errors
#[derive(Error, Debug)]
pub enum AuditError {
    /// A flush could not persist its batch; the events stay buffered
    #[error("Failed to persist {pending} audit events: {reason}")]
    Persistence { pending: usize, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Unknown value for {field}: {value}")]
    UnknownVariant { field: &'static str, value: String },

    #[error("Audit store error: {0}")]
    Store(String),
}

/// Result type for audit operations
pub type AuditResult<T> = Result<T, AuditError>;
