//! In-process message bus for tests and single-node runs
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
use keyward_types::Event;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{debug, warn};

use crate::error::{MessageBusError, Result};
use crate::traits::{EventStream, MessageBusClient};

/// Broadcast-backed bus that also remembers everything published
pub struct InMemoryBus {
    sender: broadcast::Sender<Event>,
    published: Mutex<Vec<Event>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            sender,
            published: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of every published event, oldest first
    pub fn published(&self) -> Vec<Event> {
        self.published
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBusClient for InMemoryBus {
    async fn publish(&self, event: &Event) -> Result<()> {
        self.published
            .lock()
            .map_err(|_| MessageBusError::Publish("published log poisoned".to_string()))?
            .push(event.clone());

        // No subscribers is not an error for a bus
        let receivers = self.sender.send(event.clone()).unwrap_or(0);
        debug!(
            event_type = event.event_type.as_str(),
            event_id = %event.event_id,
            receivers = receivers,
            "Event published in memory"
        );
        Ok(())
    }

    fn subscribe(&self, event_type: &str) -> EventStream<'_> {
        let wanted = event_type.to_string();
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(move |item| {
            match item {
                Ok(event) if event.event_type.as_str() == wanted => Some(Ok(event)),
                Ok(_) => None,
                Err(e) => {
                    warn!(error = %e, "In-memory subscriber lagged");
                    Some(Err(MessageBusError::Subscribe(e.to_string())))
                }
            }
        });
        Box::pin(stream)
    }

    async fn is_connected(&self) -> bool {
        true
    }

    fn client_type(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_types::{EventType, KeyRotationRequestedPayload, RotationType};

    fn request(org: &str) -> Event {
        Event::new(
            EventType::KeyRotationRequested,
            "test",
            KeyRotationRequestedPayload {
                organization_id: org.to_string(),
                rotation_type: RotationType::Manual,
                reason: None,
                requested_by: None,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_subscriber_receives_matching_events() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe("key.rotation.requested");

        bus.publish(&request("org-1")).await.unwrap();

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received.event_type, EventType::KeyRotationRequested);
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = InMemoryBus::new();
        tokio_test::assert_ok!(bus.publish(&request("org-1")).await);
        assert_eq!(bus.client_type(), "memory");
    }
}
