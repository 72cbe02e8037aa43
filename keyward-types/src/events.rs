//! Event type definitions for the message bus
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

use crate::error::{KeywardError, Result};
use crate::schemas::*;

/// Event type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    // Key rotation events
    #[serde(rename = "key.rotation.requested")]
    KeyRotationRequested,
    #[serde(rename = "key.rotation.completed")]
    KeyRotationCompleted,
    #[serde(rename = "key.rotation.failed")]
    KeyRotationFailed,

    // Audit events
    #[serde(rename = "audit.anomaly_detected")]
    AuditAnomalyDetected,
}

impl EventType {
    /// Dotted subject name used on the bus
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::KeyRotationRequested => "key.rotation.requested",
            EventType::KeyRotationCompleted => "key.rotation.completed",
            EventType::KeyRotationFailed => "key.rotation.failed",
            EventType::AuditAnomalyDetected => "audit.anomaly_detected",
        }
    }
}

/// Base event structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type identifier
    pub event_type: EventType,

    /// Unique event identifier
    pub event_id: Uuid,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Source service that published the event
    pub source: String,

    /// Event payload (type depends on event_type)
    pub payload: serde_json::Value,
}

impl Event {
    /// Create a new event
    pub fn new(
        event_type: EventType,
        source: impl Into<String>,
        payload: impl Serialize,
    ) -> Result<Self> {
        let payload_value = serde_json::to_value(payload)?;

        Ok(Self {
            event_type,
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload: payload_value,
        })
    }

    /// Deserialize the payload into a specific type
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| KeywardError::InvalidPayload(e.to_string()))
    }

    /// Validate the event structure
    pub fn validate(&self) -> Result<()> {
        match self.event_type {
            EventType::KeyRotationRequested => {
                let _: KeyRotationRequestedPayload = self.payload_as()?;
            }
            EventType::KeyRotationCompleted => {
                let _: KeyRotationCompletedPayload = self.payload_as()?;
            }
            EventType::KeyRotationFailed => {
                let _: KeyRotationFailedPayload = self.payload_as()?;
            }
            EventType::AuditAnomalyDetected => {
                let _: AnomalyDetectedPayload = self.payload_as()?;
            }
        }
        Ok(())
    }
}
