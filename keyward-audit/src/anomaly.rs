//! Sliding-window anomaly detection over audit events
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


use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::event::{AuditEvent, AuditEventType, EventStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    RapidFailures,
    ExcessiveKeyAccess,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::RapidFailures => "rapid_failures",
            AnomalyKind::ExcessiveKeyAccess => "excessive_key_access",
        }
    }

    fn matches(&self, event: &AuditEvent) -> bool {
        match self {
            AnomalyKind::RapidFailures => event.status == EventStatus::Failure,
            AnomalyKind::ExcessiveKeyAccess => event.event_type == AuditEventType::KeyAccess,
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raise `kind` once `threshold` matching events land inside `window_secs`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnomalyRule {
    pub kind: AnomalyKind,
    pub threshold: usize,
    pub window_secs: i64,
}

pub const RAPID_FAILURES_RULE: AnomalyRule = AnomalyRule {
    kind: AnomalyKind::RapidFailures,
    threshold: 10,
    window_secs: 60,
};

pub const EXCESSIVE_KEY_ACCESS_RULE: AnomalyRule = AnomalyRule {
    kind: AnomalyKind::ExcessiveKeyAccess,
    threshold: 20,
    window_secs: 300,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyAlert {
    pub id: Uuid,
    pub organization_id: String,
    pub kind: AnomalyKind,
    pub event_count: u32,
    pub window_secs: i64,
    pub first_event_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}

/// Per-organization sliding windows, one per rule
pub struct AnomalyDetector {
    rules: Vec<AnomalyRule>,
    windows: Mutex<HashMap<(String, AnomalyKind), VecDeque<DateTime<Utc>>>>,
}

impl AnomalyDetector {
    pub fn new(rules: Vec<AnomalyRule>) -> Self {
        Self {
            rules,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Feed one event; returns the alerts it tipped over their threshold.
    ///
    /// A window is cleared once it alerts, so the same burst is reported once.
    pub async fn observe(&self, event: &AuditEvent) -> Vec<AnomalyAlert> {
        let mut alerts = Vec::new();
        let mut windows = self.windows.lock().await;

        for rule in self.rules.iter().filter(|rule| rule.kind.matches(event)) {
            let window = windows
                .entry((event.organization_id.clone(), rule.kind))
                .or_default();

            // Events can reach the detector slightly out of order
            let position = window.partition_point(|ts| *ts <= event.timestamp);
            window.insert(position, event.timestamp);

            let Some(latest) = window.back().copied() else {
                continue;
            };
            let horizon = latest - Duration::seconds(rule.window_secs);
            while window.front().is_some_and(|ts| *ts <= horizon) {
                window.pop_front();
            }

            if window.len() >= rule.threshold {
                let first_event_at = window.front().copied().unwrap_or(latest);
                alerts.push(AnomalyAlert {
                    id: Uuid::new_v4(),
                    organization_id: event.organization_id.clone(),
                    kind: rule.kind,
                    event_count: u32::try_from(window.len()).unwrap_or(u32::MAX),
                    window_secs: rule.window_secs,
                    first_event_at,
                    last_event_at: latest,
                    detected_at: Utc::now(),
                });
                window.clear();
            }
        }

        alerts
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(vec![RAPID_FAILURES_RULE, EXCESSIVE_KEY_ACCESS_RULE])
    }
}
