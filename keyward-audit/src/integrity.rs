//! Tamper-evidence hashing for audit events
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
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::event::{AuditEvent, AuditEventType, EventStatus, RiskLevel};

/// Every field of an event except the hash itself, in a fixed order
#[derive(Serialize)]
struct HashedFields<'a> {
    id: &'a Uuid,
    organization_id: &'a str,
    event_type: AuditEventType,
    operation: &'a str,
    status: EventStatus,
    timestamp: &'a DateTime<Utc>,
    risk_level: RiskLevel,
    compliance_flags: &'a [String],
    user_id: Option<&'a str>,
    ip_address: Option<&'a str>,
    model_name: Option<&'a str>,
    field_name: Option<&'a str>,
    record_id: Option<&'a str>,
    duration_ms: Option<u64>,
    data_size: Option<u64>,
}

impl<'a> From<&'a AuditEvent> for HashedFields<'a> {
    fn from(event: &'a AuditEvent) -> Self {
        Self {
            id: &event.id,
            organization_id: &event.organization_id,
            event_type: event.event_type,
            operation: &event.operation,
            status: event.status,
            timestamp: &event.timestamp,
            risk_level: event.risk_level,
            compliance_flags: &event.compliance_flags,
            user_id: event.user_id.as_deref(),
            ip_address: event.ip_address.as_deref(),
            model_name: event.model_name.as_deref(),
            field_name: event.field_name.as_deref(),
            record_id: event.record_id.as_deref(),
            duration_ms: event.duration_ms,
            data_size: event.data_size,
        }
    }
}

/// Hex SHA-256 over the canonical serialization of the event
pub fn calculate_integrity_hash(event: &AuditEvent) -> String {
    let mut hasher = Sha256::new();
    // Serializing borrowed strings and scalars cannot fail
    if let Ok(canonical) = serde_json::to_vec(&HashedFields::from(event)) {
        hasher.update(&canonical);
    }
    hex::encode(hasher.finalize())
}

/// One event whose stored hash no longer matches its content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityViolation {
    pub event_id: Uuid,
    pub expected_hash: String,
    pub stored_hash: String,
}

/// Result of checking a set of stored events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub organization_id: String,
    pub total_events: usize,
    pub valid_events: usize,
    pub invalid_events: usize,
    pub violations: Vec<IntegrityViolation>,
}

impl IntegrityReport {
    pub fn is_intact(&self) -> bool {
        self.invalid_events == 0
    }
}

/// Recompute the hash and compare against the stored one
pub fn verify_event(event: &AuditEvent) -> Option<IntegrityViolation> {
    let expected_hash = calculate_integrity_hash(event);
    if expected_hash == event.integrity_hash {
        None
    } else {
        Some(IntegrityViolation {
            event_id: event.id,
            expected_hash,
            stored_hash: event.integrity_hash.clone(),
        })
    }
}

pub fn verify_events(organization_id: &str, events: &[AuditEvent]) -> IntegrityReport {
    let violations: Vec<IntegrityViolation> = events.iter().filter_map(verify_event).collect();

    IntegrityReport {
        organization_id: organization_id.to_string(),
        total_events: events.len(),
        valid_events: events.len() - violations.len(),
        invalid_events: violations.len(),
        violations,
    }
}
