//! Aggregate statistics over a period of audit events
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
use std::collections::{BTreeMap, HashMap};

use crate::event::{AuditEvent, AuditEventType, EventStatus, RiskLevel};

pub const TOP_USERS_LIMIT: usize = 10;
pub const RECENT_FAILURES_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserActivity {
    pub user_id: String,
    pub event_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditSummary {
    pub organization_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_events: usize,
    pub events_by_type: BTreeMap<AuditEventType, usize>,
    pub events_by_risk_level: BTreeMap<RiskLevel, usize>,
    pub success_count: usize,
    pub failure_count: usize,
    pub average_duration_ms: f64,
    pub peak_duration_ms: u64,
    pub top_users: Vec<UserActivity>,
    pub recent_failures: Vec<AuditEvent>,
}

/// Summarize `events`, which must already be limited to the organization and period
pub fn summarize(
    organization_id: &str,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    events: &[AuditEvent],
) -> AuditSummary {
    let mut events_by_type = BTreeMap::new();
    let mut events_by_risk_level = BTreeMap::new();
    let mut success_count = 0;
    let mut failure_count = 0;
    let mut duration_total: u64 = 0;
    let mut duration_samples: u64 = 0;
    let mut peak_duration_ms: u64 = 0;

    // Counts plus first-seen position so ties keep a stable order
    let mut users: HashMap<&str, (usize, usize)> = HashMap::new();

    for (position, event) in events.iter().enumerate() {
        *events_by_type.entry(event.event_type).or_insert(0) += 1;
        *events_by_risk_level.entry(event.risk_level).or_insert(0) += 1;

        match event.status {
            EventStatus::Success => success_count += 1,
            EventStatus::Failure => failure_count += 1,
        }

        if let Some(duration) = event.duration_ms {
            duration_total = duration_total.saturating_add(duration);
            duration_samples += 1;
            peak_duration_ms = peak_duration_ms.max(duration);
        }

        if let Some(user_id) = event.user_id.as_deref() {
            users.entry(user_id).or_insert((0, position)).0 += 1;
        }
    }

    let mut ranked: Vec<(&str, usize, usize)> = users
        .into_iter()
        .map(|(user, (count, first_seen))| (user, count, first_seen))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    let top_users = ranked
        .into_iter()
        .take(TOP_USERS_LIMIT)
        .map(|(user_id, event_count, _)| UserActivity {
            user_id: user_id.to_string(),
            event_count,
        })
        .collect();

    let mut failures: Vec<&AuditEvent> = events.iter().filter(|e| e.is_failure()).collect();
    failures.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let recent_failures = failures
        .into_iter()
        .take(RECENT_FAILURES_LIMIT)
        .cloned()
        .collect();

    let average_duration_ms = if duration_samples == 0 {
        0.0
    } else {
        duration_total as f64 / duration_samples as f64
    };

    AuditSummary {
        organization_id: organization_id.to_string(),
        period_start,
        period_end,
        total_events: events.len(),
        events_by_type,
        events_by_risk_level,
        success_count,
        failure_count,
        average_duration_ms,
        peak_duration_ms,
        top_users,
        recent_failures,
    }
}
