//! NATS JetStream implementation of the message bus client
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


use async_nats::jetstream::{self, Context};
use async_trait::async_trait;
use keyward_types::Event;
use std::sync::Arc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{error, info};

use crate::error::{MessageBusError, Result};
use crate::traits::{EventStream, MessageBusClient};

/// Default subject prefix for Keyward events
pub const DEFAULT_SUBJECT_PREFIX: &str = "keyward";

/// Map a dotted event type onto a bus subject
pub fn subject_for_event_type(subject_prefix: &str, event_type: &str) -> Result<String> {
    if event_type.is_empty() || event_type.contains(char::is_whitespace) {
        return Err(MessageBusError::InvalidSubject(event_type.to_string()));
    }
    Ok(format!("{}.{}", subject_prefix, event_type.replace('.', "_")))
}

/// NATS JetStream message bus client
pub struct NatsClient {
    client: Arc<async_nats::Client>,
    jetstream: Arc<Context>,
    stream_name: String,
    subject_prefix: String,
}

impl NatsClient {
    /// Create a new NATS client publishing under the default subject prefix
    pub async fn new(url: &str, stream_name: Option<String>) -> Result<Self> {
        Self::with_subject_prefix(url, stream_name, None).await
    }

    pub async fn with_subject_prefix(
        url: &str,
        stream_name: Option<String>,
        subject_prefix: Option<String>,
    ) -> Result<Self> {
        info!(url = url, "Connecting to NATS server");

        let client = async_nats::connect(url)
            .await
            .map_err(|e| MessageBusError::Connection(e.to_string()))?;

        let client_arc = Arc::new(client.clone());
        let jetstream = jetstream::new(client);

        let stream_name = stream_name.unwrap_or_else(|| "keyward-events".to_string());
        let subject_prefix =
            subject_prefix.unwrap_or_else(|| DEFAULT_SUBJECT_PREFIX.to_string());

        // Ensure the stream exists
        if let Err(e) = Self::ensure_stream(&jetstream, &stream_name, &subject_prefix).await {
            error!(stream = stream_name, error = %e, "Could not ensure stream, publishing may fail");
        }

        info!(
            stream = stream_name,
            "NATS client initialized"
        );

        Ok(Self {
            client: client_arc,
            jetstream: Arc::new(jetstream),
            stream_name,
            subject_prefix,
        })
    }

    /// Name of the JetStream stream events are stored in
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Ensure the JetStream stream exists
    async fn ensure_stream(
        jetstream: &Context,
        stream_name: &str,
        subject_prefix: &str,
    ) -> Result<()> {
        jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: stream_name.to_string(),
                subjects: vec![format!("{}.>", subject_prefix)],
                max_age: std::time::Duration::from_secs(86400 * 7), // 7 days retention
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| MessageBusError::Connection(format!("Failed to create stream: {}", e)))?;

        info!(
            stream = stream_name,
            "Stream ensured"
        );

        Ok(())
    }
}

#[async_trait]
impl MessageBusClient for NatsClient {
    async fn publish(&self, event: &Event) -> Result<()> {
        let subject = subject_for_event_type(&self.subject_prefix, event.event_type.as_str())?;

        let payload = serde_json::to_vec(event).map_err(MessageBusError::Serialization)?;

        self.jetstream
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| MessageBusError::Publish(e.to_string()))?;

        info!(
            event_type = event.event_type.as_str(),
            event_id = %event.event_id,
            subject = subject,
            "Event published"
        );

        Ok(())
    }

    fn subscribe(&self, event_type: &str) -> EventStream<'_> {
        let (tx, rx) = tokio::sync::mpsc::channel::<std::result::Result<Event, MessageBusError>>(100);

        let subject = match subject_for_event_type(&self.subject_prefix, event_type) {
            Ok(subject) => subject,
            Err(e) => {
                let _ = tx.try_send(Err(e));
                return Box::pin(ReceiverStream::new(rx));
            }
        };

        info!(
            subject = subject,
            event_type = event_type,
            "Subscribing to events"
        );

        let client = Arc::clone(&self.client);

        // Spawn a task to handle the subscription
        tokio::spawn(async move {
            match client.subscribe(subject.clone()).await {
                Ok(mut consumer) => {
                    info!(
                        subject = subject,
                        "Subscription created, waiting for messages"
                    );

                    while let Some(nats_msg) = consumer.next().await {
                        match serde_json::from_slice::<Event>(&nats_msg.payload) {
                            Ok(event) => {
                                if tx.send(Ok(event)).await.is_err() {
                                    error!("Receiver dropped, stopping subscription");
                                    break;
                                }
                            }
                            Err(e) => {
                                error!(error = %e, "Failed to deserialize event");
                                let _ = tx.send(Err(MessageBusError::Serialization(e))).await;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to create subscription");
                    let _ = tx.send(Err(MessageBusError::Subscribe(e.to_string()))).await;
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    async fn is_connected(&self) -> bool {
        matches!(
            self.client.connection_state(),
            async_nats::connection::State::Connected
        )
    }

    fn client_type(&self) -> &str {
        "nats"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_for_event_type() {
        assert_eq!(
            subject_for_event_type("keyward", "key.rotation.requested").unwrap(),
            "keyward.key_rotation_requested"
        );
        assert!(subject_for_event_type("keyward", "").is_err());
        assert!(subject_for_event_type("keyward", "bad subject").is_err());
    }
}
