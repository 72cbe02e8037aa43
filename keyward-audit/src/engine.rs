//! Audit engine
//!
//! Accepts events from the rest of the system, buffers them, flushes them to
//! the durable store and runs anomaly detection off the caller's path.
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


use chrono::{DateTime, Duration as ChronoDuration, Utc};
use keyward_types::{AnomalyDetectedPayload, Event, EventType};
use message_bus_client::MessageBusClient;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::anomaly::{AnomalyAlert, AnomalyDetector};
use crate::buffer::{AuditBuffer, BufferSignal, FlushTrigger};
use crate::compliance::{CheckContext, ComplianceRegistry, ComplianceReport};
use crate::error::{AuditError, AuditResult};
use crate::event::{AuditEvent, NewAuditEvent};
use crate::integrity::{verify_events, IntegrityReport};
use crate::store::{AuditQuery, AuditStore};
use crate::summary::{summarize, AuditSummary};

const EVENT_SOURCE: &str = "keyward-audit";

#[derive(Debug, Clone)]
pub struct AuditEngineConfig {
    pub buffer_capacity: usize,
    pub flush_interval: Duration,
    /// How many anomaly alerts are kept for inspection
    pub alert_history: usize,
}

impl Default for AuditEngineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 100,
            flush_interval: Duration::from_secs(5),
            alert_history: 100,
        }
    }
}

/// Alert sink shared with the detached detection tasks
struct AlertSink {
    history: RwLock<VecDeque<AnomalyAlert>>,
    capacity: usize,
    message_bus: Option<Arc<dyn MessageBusClient>>,
}

impl AlertSink {
    async fn raise(&self, alert: AnomalyAlert) {
        warn!(
            organization_id = alert.organization_id,
            anomaly = alert.kind.as_str(),
            event_count = alert.event_count,
            window_secs = alert.window_secs,
            "Audit anomaly detected"
        );

        if let Some(bus) = &self.message_bus {
            let payload = AnomalyDetectedPayload {
                organization_id: alert.organization_id.clone(),
                anomaly_type: alert.kind.as_str().to_string(),
                event_count: alert.event_count,
                window_secs: u64::try_from(alert.window_secs).unwrap_or(0),
                detected_at: alert.detected_at,
            };
            match Event::new(EventType::AuditAnomalyDetected, EVENT_SOURCE, payload) {
                Ok(event) => {
                    if let Err(e) = bus.publish(&event).await {
                        error!(error = %e, "Failed to publish anomaly alert");
                    }
                }
                Err(e) => error!(error = %e, "Failed to build anomaly alert event"),
            }
        }

        let mut history = self.history.write().await;
        if history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(alert);
    }
}

pub struct AuditEngine {
    config: AuditEngineConfig,
    store: Arc<dyn AuditStore>,
    buffer: Mutex<AuditBuffer>,
    /// Serializes flushes so batches reach the store in order
    flush_lock: Mutex<()>,
    detector: Arc<AnomalyDetector>,
    alerts: Arc<AlertSink>,
    compliance: ComplianceRegistry,
    timer: StdMutex<Option<JoinHandle<()>>>,
}

impl AuditEngine {
    pub fn new(store: Arc<dyn AuditStore>, config: AuditEngineConfig) -> Self {
        Self::with_parts(store, config, None, ComplianceRegistry::default())
    }

    /// Engine that publishes anomaly alerts on the bus
    pub fn with_message_bus(
        store: Arc<dyn AuditStore>,
        config: AuditEngineConfig,
        message_bus: Arc<dyn MessageBusClient>,
    ) -> Self {
        Self::with_parts(store, config, Some(message_bus), ComplianceRegistry::default())
    }

    pub fn with_parts(
        store: Arc<dyn AuditStore>,
        config: AuditEngineConfig,
        message_bus: Option<Arc<dyn MessageBusClient>>,
        compliance: ComplianceRegistry,
    ) -> Self {
        let alerts = Arc::new(AlertSink {
            history: RwLock::new(VecDeque::new()),
            capacity: config.alert_history.max(1),
            message_bus,
        });

        Self {
            buffer: Mutex::new(AuditBuffer::new(config.buffer_capacity)),
            config,
            store,
            flush_lock: Mutex::new(()),
            detector: Arc::new(AnomalyDetector::default()),
            alerts,
            compliance,
            timer: StdMutex::new(None),
        }
    }

    pub fn config(&self) -> &AuditEngineConfig {
        &self.config
    }

    /// Record an event.
    ///
    /// Only a critical event waits for persistence; its flush failure is
    /// returned while the event stays buffered for the next attempt.
    pub async fn log_event(&self, new_event: NewAuditEvent) -> AuditResult<AuditEvent> {
        let event = AuditEvent::record(new_event);

        let trigger = self.buffer.lock().await.push(event.clone());

        debug!(
            event_id = %event.id,
            organization_id = event.organization_id,
            event_type = event.event_type.as_str(),
            risk_level = event.risk_level.as_str(),
            "Audit event buffered"
        );

        self.spawn_anomaly_detection(event.clone());

        match trigger {
            Some(FlushTrigger::Critical) => {
                self.flush_audit_buffer().await?;
            }
            Some(trigger) => self.flush_logged(trigger).await,
            None => {}
        }

        Ok(event)
    }

    fn spawn_anomaly_detection(&self, event: AuditEvent) {
        let detector = Arc::clone(&self.detector);
        let alerts = Arc::clone(&self.alerts);
        tokio::spawn(async move {
            for alert in detector.observe(&event).await {
                alerts.raise(alert).await;
            }
        });
    }

    /// Persist everything buffered, returning how many events were written.
    ///
    /// On failure the batch is put back ahead of newer events.
    pub async fn flush_audit_buffer(&self) -> AuditResult<usize> {
        let _flush_guard = self.flush_lock.lock().await;

        let batch = self.buffer.lock().await.drain();
        if batch.is_empty() {
            return Ok(0);
        }

        let count = batch.len();
        match self.store.append_events(&batch).await {
            Ok(()) => {
                debug!(count = count, "Audit buffer flushed");
                Ok(count)
            }
            Err(e) => {
                self.buffer.lock().await.restore(batch);
                error!(count = count, error = %e, "Audit flush failed, events kept in buffer");
                Err(AuditError::Persistence {
                    pending: count,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn flush_logged(&self, trigger: FlushTrigger) {
        if let Err(e) = self.flush_audit_buffer().await {
            warn!(trigger = trigger.as_str(), error = %e, "Background audit flush failed");
        }
    }

    async fn on_timer_tick(&self) {
        let trigger = self.buffer.lock().await.signal(BufferSignal::TimerTick);
        if let Some(trigger) = trigger {
            self.flush_logged(trigger).await;
        }
    }

    /// Flush on a fixed interval until shutdown or the engine is dropped
    pub fn start_flush_timer(self: &Arc<Self>) {
        let engine: Weak<Self> = Arc::downgrade(self);
        let period = self.config.flush_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.on_timer_tick().await;
            }
        });

        if let Ok(mut timer) = self.timer.lock() {
            if let Some(previous) = timer.replace(handle) {
                previous.abort();
            }
        }

        info!(
            interval_ms = period.as_millis() as u64,
            "Audit flush timer started"
        );
    }

    /// Stop the timer and flush whatever is still buffered.
    ///
    /// A timer flush already writing its batch is allowed to finish first.
    pub async fn shutdown(&self) -> AuditResult<usize> {
        let handle = self.timer.lock().ok().and_then(|mut timer| timer.take());

        if let Some(handle) = handle {
            // Holding the flush lock means no drained batch is in flight
            let _flush_guard = self.flush_lock.lock().await;
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Audit flush timer ended abnormally");
                }
            }
        }

        let pending = self.buffer.lock().await.signal(BufferSignal::Shutdown);
        let flushed = match pending {
            Some(_) => self.flush_audit_buffer().await?,
            None => 0,
        };

        info!(flushed = flushed, "Audit engine shut down");
        Ok(flushed)
    }

    pub async fn buffered_events(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Most recent alerts, oldest first
    pub async fn recent_alerts(&self) -> Vec<AnomalyAlert> {
        self.alerts.history.read().await.iter().cloned().collect()
    }

    /// Stored events plus the not yet flushed ones, ordered by time
    async fn events_in_period(&self, query: &AuditQuery) -> AuditResult<Vec<AuditEvent>> {
        let mut events = self.store.query_events(query).await?;
        {
            let buffer = self.buffer.lock().await;
            events.extend(buffer.events().iter().filter(|e| query.matches(e)).cloned());
        }
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    pub async fn generate_audit_summary(
        &self,
        organization_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AuditResult<AuditSummary> {
        let query = AuditQuery::new(organization_id, start, end)?;
        let events = self.events_in_period(&query).await?;
        Ok(summarize(organization_id, start, end, &events))
    }

    pub async fn generate_compliance_report(
        &self,
        organization_id: &str,
        report_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AuditResult<ComplianceReport> {
        let query = AuditQuery::new(organization_id, start, end)?;
        let events = self.events_in_period(&query).await?;

        let report = self.compliance.generate(
            report_type,
            &CheckContext {
                organization_id,
                period_start: start,
                period_end: end,
                events: &events,
            },
        );

        info!(
            organization_id = organization_id,
            report_type = report.report_type,
            score = report.summary.compliance_score,
            "Compliance report generated"
        );

        Ok(report)
    }

    /// Re-hash every persisted event of the organization in the period
    pub async fn verify_integrity(
        &self,
        organization_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> AuditResult<IntegrityReport> {
        let query = AuditQuery::new(organization_id, start, end)?;
        let events = self.store.query_events(&query).await?;
        let report = verify_events(organization_id, &events);

        if report.is_intact() {
            info!(
                organization_id = organization_id,
                total_events = report.total_events,
                "Audit integrity verified"
            );
        } else {
            error!(
                organization_id = organization_id,
                invalid_events = report.invalid_events,
                "Audit integrity violations found"
            );
        }

        Ok(report)
    }

    /// Delete persisted events older than the retention period
    pub async fn cleanup_old_logs(&self, retention_days: u32) -> AuditResult<u64> {
        let Some(cutoff) =
            Utc::now().checked_sub_signed(ChronoDuration::days(i64::from(retention_days)))
        else {
            // Cutoff predates the earliest representable time, nothing can be older
            info!(retention_days = retention_days, "Retention covers all audit events");
            return Ok(0);
        };
        let removed = self.store.delete_events_before(cutoff).await?;

        info!(
            retention_days = retention_days,
            removed = removed,
            "Old audit events removed"
        );

        Ok(removed)
    }
}
