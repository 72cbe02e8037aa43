//! Audit event model
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


use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AuditError;
use crate::integrity::calculate_integrity_hash;
use crate::risk::calculate_risk_level;

/// Largest duration or size that fits a signed 64-bit column
pub const MAX_STORED_METRIC: u64 = i64::MAX as u64;

/// Kind of cryptographic operation being audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    DataEncryption,
    DataDecryption,
    DataAccess,
    KeyAccess,
    KeyGeneration,
    KeyRotation,
    KeyExport,
    KeyDeletion,
    PolicyChange,
}

impl AuditEventType {
    pub const ALL: [AuditEventType; 9] = [
        AuditEventType::DataEncryption,
        AuditEventType::DataDecryption,
        AuditEventType::DataAccess,
        AuditEventType::KeyAccess,
        AuditEventType::KeyGeneration,
        AuditEventType::KeyRotation,
        AuditEventType::KeyExport,
        AuditEventType::KeyDeletion,
        AuditEventType::PolicyChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::DataEncryption => "DATA_ENCRYPTION",
            AuditEventType::DataDecryption => "DATA_DECRYPTION",
            AuditEventType::DataAccess => "DATA_ACCESS",
            AuditEventType::KeyAccess => "KEY_ACCESS",
            AuditEventType::KeyGeneration => "KEY_GENERATION",
            AuditEventType::KeyRotation => "KEY_ROTATION",
            AuditEventType::KeyExport => "KEY_EXPORT",
            AuditEventType::KeyDeletion => "KEY_DELETION",
            AuditEventType::PolicyChange => "POLICY_CHANGE",
        }
    }

    /// Operations on key material rather than on protected data
    pub fn is_key_operation(&self) -> bool {
        matches!(
            self,
            AuditEventType::KeyAccess
                | AuditEventType::KeyGeneration
                | AuditEventType::KeyRotation
                | AuditEventType::KeyExport
                | AuditEventType::KeyDeletion
        )
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditEventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AuditError::UnknownVariant {
                field: "event_type",
                value: s.to_string(),
            })
    }
}

/// Outcome of the audited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Failure,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Success => "success",
            EventStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(EventStatus::Success),
            "failure" => Ok(EventStatus::Failure),
            other => Err(AuditError::UnknownVariant {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// Sensitivity classification, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(AuditError::UnknownVariant {
                field: "risk_level",
                value: other.to_string(),
            }),
        }
    }
}

/// Caller-supplied part of an audit event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAuditEvent {
    pub organization_id: String,
    pub event_type: AuditEventType,
    pub operation: String,
    pub status: EventStatus,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub model_name: Option<String>,
    pub field_name: Option<String>,
    pub record_id: Option<String>,
    pub duration_ms: Option<u64>,
    pub data_size: Option<u64>,
    pub compliance_flags: Vec<String>,
}

impl NewAuditEvent {
    pub fn new(
        organization_id: impl Into<String>,
        event_type: AuditEventType,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            event_type,
            operation: operation.into(),
            status: EventStatus::Success,
            user_id: None,
            ip_address: None,
            model_name: None,
            field_name: None,
            record_id: None,
            duration_ms: None,
            data_size: None,
            compliance_flags: Vec::new(),
        }
    }

    pub fn failed(mut self) -> Self {
        self.status = EventStatus::Failure;
        self
    }

    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn with_field(mut self, model_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self.field_name = Some(field_name.into());
        self
    }

    pub fn with_record(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_data_size(mut self, data_size: u64) -> Self {
        self.data_size = Some(data_size);
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.compliance_flags.push(flag.into());
        self
    }
}

/// A recorded audit event.
///
/// `risk_level` and `integrity_hash` are fixed by [`AuditEvent::record`];
/// nothing in this crate recomputes them on an existing event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub organization_id: String,
    pub event_type: AuditEventType,
    pub operation: String,
    pub status: EventStatus,
    pub timestamp: DateTime<Utc>,
    pub risk_level: RiskLevel,
    pub compliance_flags: Vec<String>,
    pub integrity_hash: String,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub model_name: Option<String>,
    pub field_name: Option<String>,
    pub record_id: Option<String>,
    pub duration_ms: Option<u64>,
    pub data_size: Option<u64>,
}

impl AuditEvent {
    /// Assign id and timestamp, score risk, derive compliance flags and seal with the hash
    pub fn record(new_event: NewAuditEvent) -> Self {
        // Microsecond precision round-trips through Postgres timestamptz unchanged
        Self::record_at(new_event, Uuid::new_v4(), Utc::now().trunc_subsecs(6))
    }

    /// Deterministic variant of [`AuditEvent::record`]
    pub fn record_at(mut new_event: NewAuditEvent, id: Uuid, timestamp: DateTime<Utc>) -> Self {
        // Capped before hashing so the stored row re-hashes to the same value
        new_event.duration_ms = new_event.duration_ms.map(|v| v.min(MAX_STORED_METRIC));
        new_event.data_size = new_event.data_size.map(|v| v.min(MAX_STORED_METRIC));

        let risk_level = calculate_risk_level(&new_event);
        let compliance_flags = derive_compliance_flags(&new_event, risk_level);

        let mut event = Self {
            id,
            organization_id: new_event.organization_id,
            event_type: new_event.event_type,
            operation: new_event.operation,
            status: new_event.status,
            timestamp,
            risk_level,
            compliance_flags,
            integrity_hash: String::new(),
            user_id: new_event.user_id,
            ip_address: new_event.ip_address,
            model_name: new_event.model_name,
            field_name: new_event.field_name,
            record_id: new_event.record_id,
            duration_ms: new_event.duration_ms,
            data_size: new_event.data_size,
        };
        event.integrity_hash = calculate_integrity_hash(&event);
        event
    }

    pub fn is_failure(&self) -> bool {
        self.status == EventStatus::Failure
    }
}

/// Caller flags plus the ones implied by the event, sorted and de-duplicated
fn derive_compliance_flags(event: &NewAuditEvent, risk_level: RiskLevel) -> Vec<String> {
    let mut flags = event.compliance_flags.clone();

    if event.field_name.is_some() {
        flags.push("FIELD_LEVEL_ENCRYPTION".to_string());
    }
    if event.event_type.is_key_operation() {
        flags.push("KEY_MANAGEMENT".to_string());
    }
    if matches!(
        event.event_type,
        AuditEventType::DataDecryption | AuditEventType::DataAccess
    ) {
        flags.push("PROTECTED_DATA_ACCESS".to_string());
    }
    if event.status == EventStatus::Failure && risk_level >= RiskLevel::High {
        flags.push("SECURITY_INCIDENT".to_string());
    }

    flags.sort();
    flags.dedup();
    flags
}
