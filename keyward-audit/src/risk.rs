//! Risk scoring for audit events
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


use std::net::IpAddr;

use crate::event::{AuditEventType, EventStatus, NewAuditEvent, RiskLevel};

/// Payloads above this size add to the score
pub const LARGE_PAYLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Operations slower than this add to the score
pub const SLOW_OPERATION_MS: u64 = 5_000;

/// Additive risk score; every factor can only raise it
pub fn risk_score(event: &NewAuditEvent) -> u32 {
    let mut score = 0;

    score += match event.event_type {
        AuditEventType::KeyDeletion | AuditEventType::KeyExport => 3,
        AuditEventType::KeyAccess | AuditEventType::KeyRotation => 1,
        _ => 0,
    };

    if event.status == EventStatus::Failure {
        score += 2;
    }

    if let Some(ip) = event.ip_address.as_deref() {
        if !is_internal_ip(ip) {
            score += 2;
        }
    }

    if event.data_size.is_some_and(|size| size > LARGE_PAYLOAD_BYTES) {
        score += 1;
    }

    if event.duration_ms.is_some_and(|ms| ms > SLOW_OPERATION_MS) {
        score += 1;
    }

    score
}

/// Map an event onto low / medium / high / critical
pub fn calculate_risk_level(event: &NewAuditEvent) -> RiskLevel {
    match risk_score(event) {
        0..=1 => RiskLevel::Low,
        2..=3 => RiskLevel::Medium,
        4..=5 => RiskLevel::High,
        _ => RiskLevel::Critical,
    }
}

/// Private, loopback, link-local or unique-local addresses.
///
/// Unparseable input is treated as external.
pub fn is_internal_ip(ip: &str) -> bool {
    match ip.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        Ok(IpAddr::V6(v6)) => {
            let first = v6.segments()[0];
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: AuditEventType) -> NewAuditEvent {
        NewAuditEvent::new("org-1", event_type, "op")
    }

    #[test]
    fn test_plain_data_operation_is_low() {
        assert_eq!(
            calculate_risk_level(&event(AuditEventType::DataEncryption)),
            RiskLevel::Low
        );
        assert_eq!(
            calculate_risk_level(&event(AuditEventType::KeyAccess).with_ip("10.0.0.4")),
            RiskLevel::Low
        );
    }

    #[test]
    fn test_failure_escalates() {
        let success = event(AuditEventType::KeyRotation);
        let failure = event(AuditEventType::KeyRotation).failed();
        assert!(calculate_risk_level(&failure) > calculate_risk_level(&success));
        assert_eq!(calculate_risk_level(&failure), RiskLevel::Medium);
    }

    #[test]
    fn test_external_key_export_is_high() {
        let export = event(AuditEventType::KeyExport).with_ip("203.0.113.9");
        assert_eq!(risk_score(&export), 5);
        assert_eq!(calculate_risk_level(&export), RiskLevel::High);
    }

    #[test]
    fn test_everything_at_once_is_critical() {
        let worst = event(AuditEventType::KeyDeletion)
            .failed()
            .with_ip("8.8.8.8")
            .with_data_size(LARGE_PAYLOAD_BYTES + 1)
            .with_duration_ms(SLOW_OPERATION_MS + 1);
        assert_eq!(risk_score(&worst), 9);
        assert_eq!(calculate_risk_level(&worst), RiskLevel::Critical);
    }

    #[test]
    fn test_size_and_duration_thresholds_are_exclusive() {
        let at_limit = event(AuditEventType::DataEncryption)
            .with_data_size(LARGE_PAYLOAD_BYTES)
            .with_duration_ms(SLOW_OPERATION_MS);
        assert_eq!(risk_score(&at_limit), 0);
    }

    #[test]
    fn test_internal_ip_classification() {
        assert!(is_internal_ip("10.1.2.3"));
        assert!(is_internal_ip("172.16.0.1"));
        assert!(is_internal_ip("192.168.1.10"));
        assert!(is_internal_ip("127.0.0.1"));
        assert!(is_internal_ip("::1"));
        assert!(is_internal_ip("fd12:3456::1"));
        assert!(!is_internal_ip("8.8.8.8"));
        assert!(!is_internal_ip("2001:4860::8888"));
        assert!(!is_internal_ip("not-an-ip"));
    }
}
