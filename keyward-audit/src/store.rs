//! Audit persistence seam
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


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{AuditError, AuditResult};
use crate::event::AuditEvent;

/// Events of one organization within `[start, end]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditQuery {
    pub organization_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AuditQuery {
    pub fn new(
        organization_id: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AuditResult<Self> {
        if end < start {
            return Err(AuditError::InvalidQuery(format!(
                "period end {} is before start {}",
                end, start
            )));
        }
        Ok(Self {
            organization_id: organization_id.into(),
            start,
            end,
        })
    }

    pub fn matches(&self, event: &AuditEvent) -> bool {
        event.organization_id == self.organization_id
            && event.timestamp >= self.start
            && event.timestamp <= self.end
    }
}

/// Durable, append-only audit log
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist a batch atomically: either every event is stored or none is
    async fn append_events(&self, events: &[AuditEvent]) -> AuditResult<()>;

    /// Matching events ordered by timestamp
    async fn query_events(&self, query: &AuditQuery) -> AuditResult<Vec<AuditEvent>>;

    /// Remove events older than `cutoff`, returning how many were removed
    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> AuditResult<u64>;
}

/// Process-local store for tests and single-node runs
#[derive(Default)]
pub struct InMemoryAuditStore {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    /// Every stored event in insertion order
    pub async fn all_events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    /// Overwrite a stored event in place, bypassing the append-only contract.
    ///
    /// Returns false when no event has that id.
    pub async fn replace_event(&self, event: AuditEvent) -> bool {
        let mut events = self.events.write().await;
        match events.iter_mut().find(|stored| stored.id == event.id) {
            Some(stored) => {
                *stored = event;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append_events(&self, events: &[AuditEvent]) -> AuditResult<()> {
        self.events.write().await.extend_from_slice(events);
        Ok(())
    }

    async fn query_events(&self, query: &AuditQuery) -> AuditResult<Vec<AuditEvent>> {
        let mut matching: Vec<AuditEvent> = self
            .events
            .read()
            .await
            .iter()
            .filter(|event| query.matches(event))
            .cloned()
            .collect();
        matching.sort_by_key(|event| event.timestamp);
        Ok(matching)
    }

    async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> AuditResult<u64> {
        let mut events = self.events.write().await;
        let before = events.len();
        events.retain(|event| event.timestamp >= cutoff);
        Ok((before - events.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AuditEventType, NewAuditEvent};
    use chrono::Duration;
    use uuid::Uuid;

    fn event_at(org: &str, timestamp: DateTime<Utc>) -> AuditEvent {
        AuditEvent::record_at(
            NewAuditEvent::new(org, AuditEventType::DataEncryption, "encrypt"),
            Uuid::new_v4(),
            timestamp,
        )
    }

    #[tokio::test]
    async fn test_query_filters_by_org_and_period() {
        let store = InMemoryAuditStore::new();
        let now = Utc::now();
        store
            .append_events(&[
                event_at("org-1", now - Duration::days(2)),
                event_at("org-1", now - Duration::hours(1)),
                event_at("org-2", now - Duration::hours(1)),
            ])
            .await
            .unwrap();

        let query = AuditQuery::new("org-1", now - Duration::days(1), now).unwrap();
        let events = store.query_events(&query).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].organization_id, "org-1");
    }

    #[tokio::test]
    async fn test_delete_events_before() {
        let store = InMemoryAuditStore::new();
        let now = Utc::now();
        store
            .append_events(&[
                event_at("org-1", now - Duration::days(400)),
                event_at("org-1", now),
            ])
            .await
            .unwrap();

        let removed = store.delete_events_before(now - Duration::days(365)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn test_inverted_period_rejected() {
        let now = Utc::now();
        let result = AuditQuery::new("org-1", now, now - Duration::hours(1));
        tokio_test::assert_err!(result);
    }
}
