//! Rotation Worker - Event Processing
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


use crate::orchestrator::KeyRotationOrchestrator;
use keyward_types::{Event, EventType, KeyRotationRequestedPayload, RotationType};
use message_bus_client::MessageBusClient;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Consumes `key.rotation.requested` events and hands them to the orchestrator
pub struct RotationWorker {
    message_bus: Arc<dyn MessageBusClient>,
    orchestrator: Arc<KeyRotationOrchestrator>,
}

impl RotationWorker {
    pub fn new(
        message_bus: Arc<dyn MessageBusClient>,
        orchestrator: Arc<KeyRotationOrchestrator>,
    ) -> Self {
        Self {
            message_bus,
            orchestrator,
        }
    }

    /// Run the worker - consume events until the stream ends
    pub async fn run(&self) -> anyhow::Result<()> {
        let subject = EventType::KeyRotationRequested.as_str();
        info!(subject = subject, "Subscribing to rotation requests");

        let mut event_stream = self.message_bus.subscribe(subject);

        info!("Waiting for rotation requests...");

        while let Some(event_result) = event_stream.next().await {
            match event_result {
                Ok(event) => {
                    info!(
                        event_id = %event.event_id,
                        source = %event.source,
                        "Received rotation request"
                    );

                    if let Err(e) = self.process_rotation_request(&event).await {
                        error!(
                            event_id = %event.event_id,
                            error = %e,
                            "Failed to process rotation request"
                        );
                    }
                }
                Err(e) => {
                    // A bad delivery must not stop the worker
                    error!(error = %e, "Error receiving event from message bus");
                }
            }
        }

        warn!("Event stream ended");
        Ok(())
    }

    /// Process a single rotation request, returning the job it maps to
    pub async fn process_rotation_request(&self, event: &Event) -> anyhow::Result<Uuid> {
        if event.event_type != EventType::KeyRotationRequested {
            anyhow::bail!("unexpected event type {}", event.event_type.as_str());
        }

        let payload: KeyRotationRequestedPayload = event.payload_as()?;

        let job_id = match payload.rotation_type {
            RotationType::Emergency => {
                let reason = payload
                    .reason
                    .as_deref()
                    .filter(|reason| !reason.trim().is_empty())
                    .ok_or_else(|| anyhow::anyhow!("emergency rotation requires a reason"))?;
                self.orchestrator
                    .emergency_key_rotation(&payload.organization_id, reason)
                    .await?
            }
            rotation_type => {
                self.orchestrator
                    .schedule_key_rotation(&payload.organization_id, rotation_type)
                    .await?
            }
        };

        info!(
            event_id = %event.event_id,
            organization_id = %payload.organization_id,
            requested_by = payload.requested_by.as_deref().unwrap_or("unknown"),
            job_id = %job_id,
            "Rotation request accepted"
        );

        Ok(job_id)
    }
}
