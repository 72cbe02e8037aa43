//! In-memory audit buffer and its flush decisions
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


use crate::event::{AuditEvent, RiskLevel};

/// Something that happened to the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSignal {
    Inserted(RiskLevel),
    TimerTick,
    Shutdown,
}

/// Why the buffer should be flushed now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// A critical event was buffered; its caller waits for the flush
    Critical,
    Capacity,
    Timer,
    Shutdown,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Critical => "critical",
            FlushTrigger::Capacity => "capacity",
            FlushTrigger::Timer => "timer",
            FlushTrigger::Shutdown => "shutdown",
        }
    }
}

/// Flush decision for a buffer holding `len` of `capacity` events
pub fn next_flush(signal: BufferSignal, len: usize, capacity: usize) -> Option<FlushTrigger> {
    if len == 0 {
        return None;
    }
    match signal {
        BufferSignal::Inserted(RiskLevel::Critical) => Some(FlushTrigger::Critical),
        BufferSignal::Inserted(_) if len >= capacity => Some(FlushTrigger::Capacity),
        BufferSignal::Inserted(_) => None,
        BufferSignal::TimerTick => Some(FlushTrigger::Timer),
        BufferSignal::Shutdown => Some(FlushTrigger::Shutdown),
    }
}

/// Events accepted but not yet persisted, oldest first
#[derive(Debug)]
pub struct AuditBuffer {
    events: Vec<AuditEvent>,
    capacity: usize,
}

impl AuditBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append an event and report whether it requires a flush
    pub fn push(&mut self, event: AuditEvent) -> Option<FlushTrigger> {
        let risk = event.risk_level;
        self.events.push(event);
        self.signal(BufferSignal::Inserted(risk))
    }

    pub fn signal(&self, signal: BufferSignal) -> Option<FlushTrigger> {
        next_flush(signal, self.events.len(), self.capacity)
    }

    /// Take every buffered event, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<AuditEvent> {
        std::mem::take(&mut self.events)
    }

    /// Put back a batch that failed to persist, ahead of anything newer
    pub fn restore(&mut self, mut batch: Vec<AuditEvent>) {
        batch.append(&mut self.events);
        self.events = batch;
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AuditEventType, NewAuditEvent};

    fn low() -> AuditEvent {
        AuditEvent::record(NewAuditEvent::new("org-1", AuditEventType::DataEncryption, "encrypt"))
    }

    fn critical() -> AuditEvent {
        AuditEvent::record(
            NewAuditEvent::new("org-1", AuditEventType::KeyDeletion, "delete_key")
                .failed()
                .with_ip("8.8.8.8"),
        )
    }

    #[test]
    fn test_next_flush_decisions() {
        assert_eq!(next_flush(BufferSignal::Inserted(RiskLevel::Low), 1, 100), None);
        assert_eq!(
            next_flush(BufferSignal::Inserted(RiskLevel::High), 100, 100),
            Some(FlushTrigger::Capacity)
        );
        assert_eq!(
            next_flush(BufferSignal::Inserted(RiskLevel::Critical), 1, 100),
            Some(FlushTrigger::Critical)
        );
        assert_eq!(next_flush(BufferSignal::TimerTick, 0, 100), None);
        assert_eq!(next_flush(BufferSignal::TimerTick, 3, 100), Some(FlushTrigger::Timer));
        assert_eq!(next_flush(BufferSignal::Shutdown, 3, 100), Some(FlushTrigger::Shutdown));
    }

    #[test]
    fn test_push_reports_capacity() {
        let mut buffer = AuditBuffer::new(2);
        assert_eq!(buffer.push(low()), None);
        assert_eq!(buffer.push(low()), Some(FlushTrigger::Capacity));
    }

    #[test]
    fn test_push_critical_flushes_immediately() {
        let mut buffer = AuditBuffer::new(100);
        assert_eq!(buffer.push(critical()), Some(FlushTrigger::Critical));
    }

    #[test]
    fn test_restore_keeps_order() {
        let mut buffer = AuditBuffer::new(10);
        let first = low();
        let second = low();
        buffer.push(first.clone());

        let batch = buffer.drain();
        assert!(buffer.is_empty());

        buffer.push(second.clone());
        buffer.restore(batch);

        let ids: Vec<_> = buffer.events().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }
}
