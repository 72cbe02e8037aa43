//! Audit engine for Keyward
//!
//! Tamper-evident audit events with risk scoring, buffered persistence,
//! anomaly alerts, summaries and compliance reports.
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


pub mod anomaly;
pub mod buffer;
pub mod compliance;
pub mod engine;
pub mod error;
pub mod event;
pub mod integrity;
pub mod postgres;
pub mod risk;
pub mod store;
pub mod summary;

pub use anomaly::{AnomalyAlert, AnomalyDetector, AnomalyKind, AnomalyRule};
pub use compliance::{
    CheckContext, CheckStatus, ComplianceCheck, ComplianceFinding, ComplianceRegistry,
    ComplianceReport, ComplianceSummary, Severity,
};
pub use engine::{AuditEngine, AuditEngineConfig};
pub use error::{AuditError, AuditResult};
pub use event::{AuditEvent, AuditEventType, EventStatus, NewAuditEvent, RiskLevel, MAX_STORED_METRIC};
pub use integrity::{calculate_integrity_hash, IntegrityReport, IntegrityViolation};
pub use postgres::PostgresAuditStore;
pub use risk::{calculate_risk_level, is_internal_ip};
pub use store::{AuditQuery, AuditStore, InMemoryAuditStore};
pub use summary::{AuditSummary, UserActivity};
