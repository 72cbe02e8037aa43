//! Compliance reporting
//!
//! Each report type maps to a list of check functions. Adding a regime means
//! registering its checks; the report generator itself does not change.
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
use std::collections::HashMap;

use crate::event::{AuditEvent, AuditEventType, EventStatus, RiskLevel};
use crate::integrity::verify_event;
use crate::risk::is_internal_ip;

const MAX_EVIDENCE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceFinding {
    pub check_id: String,
    pub title: String,
    pub status: CheckStatus,
    pub severity: Severity,
    pub description: String,
    /// Ids of the events behind a failed or warning check
    pub evidence: Vec<String>,
}

impl ComplianceFinding {
    fn new(check_id: &str, title: &str, status: CheckStatus, severity: Severity) -> Self {
        Self {
            check_id: check_id.to_string(),
            title: title.to_string(),
            status,
            severity,
            description: String::new(),
            evidence: Vec::new(),
        }
    }

    fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn with_evidence<'a>(mut self, events: impl Iterator<Item = &'a AuditEvent>) -> Self {
        self.evidence = events.take(MAX_EVIDENCE).map(|e| e.id.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplianceSummary {
    pub total_checks: usize,
    pub passed_checks: usize,
    pub failed_checks: usize,
    pub warning_checks: usize,
    /// Percentage of passing checks, 0 when no checks ran
    pub compliance_score: f64,
}

impl ComplianceSummary {
    pub fn from_findings(findings: &[ComplianceFinding]) -> Self {
        let count = |status: CheckStatus| findings.iter().filter(|f| f.status == status).count();
        let passed_checks = count(CheckStatus::Pass);
        let compliance_score = if findings.is_empty() {
            0.0
        } else {
            passed_checks as f64 / findings.len() as f64 * 100.0
        };

        Self {
            total_checks: findings.len(),
            passed_checks,
            failed_checks: count(CheckStatus::Fail),
            warning_checks: count(CheckStatus::Warning),
            compliance_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub organization_id: String,
    pub report_type: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub findings: Vec<ComplianceFinding>,
    pub summary: ComplianceSummary,
}

/// What a check gets to look at
pub struct CheckContext<'a> {
    pub organization_id: &'a str,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub events: &'a [AuditEvent],
}

pub type ComplianceCheck = fn(&CheckContext<'_>) -> ComplianceFinding;

/// Report type to check list
#[derive(Clone)]
pub struct ComplianceRegistry {
    checks: HashMap<String, Vec<ComplianceCheck>>,
}

impl ComplianceRegistry {
    /// Registry without any report types
    pub fn empty() -> Self {
        Self {
            checks: HashMap::new(),
        }
    }

    /// Append a check to a report type, creating the type if needed
    pub fn register(&mut self, report_type: &str, check: ComplianceCheck) {
        self.checks
            .entry(Self::normalize(report_type))
            .or_default()
            .push(check);
    }

    pub fn checks_for(&self, report_type: &str) -> &[ComplianceCheck] {
        self.checks
            .get(&Self::normalize(report_type))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn report_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.checks.keys().cloned().collect();
        types.sort();
        types
    }

    /// Run every check of `report_type`; unknown types give an empty report
    pub fn generate(&self, report_type: &str, context: &CheckContext<'_>) -> ComplianceReport {
        let findings: Vec<ComplianceFinding> = self
            .checks_for(report_type)
            .iter()
            .map(|check| check(context))
            .collect();

        ComplianceReport {
            organization_id: context.organization_id.to_string(),
            report_type: Self::normalize(report_type),
            period_start: context.period_start,
            period_end: context.period_end,
            generated_at: Utc::now(),
            summary: ComplianceSummary::from_findings(&findings),
            findings,
        }
    }

    fn normalize(report_type: &str) -> String {
        report_type.trim().to_ascii_uppercase()
    }
}

impl Default for ComplianceRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();

        for check in [
            check_audit_integrity,
            check_key_rotation_performed,
            check_failure_rate,
            check_critical_events,
            check_user_attribution,
        ] {
            registry.register("SOC2", check);
        }

        for check in [
            check_audit_integrity,
            check_data_access_logged,
            check_user_attribution,
            check_key_export_controls,
        ] {
            registry.register("GDPR", check);
        }

        for check in [
            check_audit_integrity,
            check_key_rotation_performed,
            check_data_access_logged,
            check_user_attribution,
            check_critical_events,
        ] {
            registry.register("HIPAA", check);
        }

        for check in [
            check_audit_integrity,
            check_key_rotation_performed,
            check_key_export_controls,
            check_key_deletion_attributed,
            check_failure_rate,
        ] {
            registry.register("PCI_DSS", check);
        }

        registry
    }
}

/// Stored hashes must match event content
pub fn check_audit_integrity(ctx: &CheckContext<'_>) -> ComplianceFinding {
    let tampered: Vec<&AuditEvent> = ctx
        .events
        .iter()
        .filter(|e| verify_event(e).is_some())
        .collect();

    if tampered.is_empty() {
        ComplianceFinding::new("audit_integrity", "Audit log integrity", CheckStatus::Pass, Severity::Critical)
            .describe(format!("All {} audit events verified", ctx.events.len()))
    } else {
        ComplianceFinding::new("audit_integrity", "Audit log integrity", CheckStatus::Fail, Severity::Critical)
            .describe(format!("{} audit events failed integrity verification", tampered.len()))
            .with_evidence(tampered.into_iter())
    }
}

/// At least one successful key rotation in the period
pub fn check_key_rotation_performed(ctx: &CheckContext<'_>) -> ComplianceFinding {
    let rotated = ctx.events.iter().any(|e| {
        e.event_type == AuditEventType::KeyRotation && e.status == EventStatus::Success
    });

    if rotated {
        ComplianceFinding::new("key_rotation", "Encryption key rotation", CheckStatus::Pass, Severity::Medium)
            .describe("Keys were rotated during the period")
    } else {
        ComplianceFinding::new("key_rotation", "Encryption key rotation", CheckStatus::Warning, Severity::Medium)
            .describe("No successful key rotation recorded during the period")
    }
}

/// Failure ratio below 5% passes, below 15% warns
pub fn check_failure_rate(ctx: &CheckContext<'_>) -> ComplianceFinding {
    let failures: Vec<&AuditEvent> = ctx.events.iter().filter(|e| e.is_failure()).collect();
    let title = "Cryptographic operation failure rate";

    if ctx.events.is_empty() {
        return ComplianceFinding::new("failure_rate", title, CheckStatus::Pass, Severity::High)
            .describe("No cryptographic activity during the period");
    }

    let rate = failures.len() as f64 / ctx.events.len() as f64 * 100.0;
    let status = if rate < 5.0 {
        CheckStatus::Pass
    } else if rate < 15.0 {
        CheckStatus::Warning
    } else {
        CheckStatus::Fail
    };

    ComplianceFinding::new("failure_rate", title, status, Severity::High)
        .describe(format!("{:.1}% of operations failed", rate))
        .with_evidence(failures.into_iter().filter(|_| status != CheckStatus::Pass))
}

/// Critical-risk events need review
pub fn check_critical_events(ctx: &CheckContext<'_>) -> ComplianceFinding {
    let critical: Vec<&AuditEvent> = ctx
        .events
        .iter()
        .filter(|e| e.risk_level == RiskLevel::Critical)
        .collect();

    if critical.is_empty() {
        ComplianceFinding::new("critical_events", "Critical security events", CheckStatus::Pass, Severity::High)
            .describe("No critical-risk events recorded")
    } else {
        ComplianceFinding::new("critical_events", "Critical security events", CheckStatus::Warning, Severity::High)
            .describe(format!("{} critical-risk events require review", critical.len()))
            .with_evidence(critical.into_iter())
    }
}

/// Access to protected data must name the acting user
pub fn check_user_attribution(ctx: &CheckContext<'_>) -> ComplianceFinding {
    let anonymous: Vec<&AuditEvent> = ctx
        .events
        .iter()
        .filter(|e| {
            matches!(
                e.event_type,
                AuditEventType::DataDecryption | AuditEventType::DataAccess
            ) && e.user_id.is_none()
        })
        .collect();

    if anonymous.is_empty() {
        ComplianceFinding::new("user_attribution", "Data access attribution", CheckStatus::Pass, Severity::Medium)
            .describe("Every data access is attributed to a user")
    } else {
        ComplianceFinding::new("user_attribution", "Data access attribution", CheckStatus::Warning, Severity::Medium)
            .describe(format!("{} data accesses have no user attached", anonymous.len()))
            .with_evidence(anonymous.into_iter())
    }
}

/// Decryption events must name the model and field touched
pub fn check_data_access_logged(ctx: &CheckContext<'_>) -> ComplianceFinding {
    let unscoped: Vec<&AuditEvent> = ctx
        .events
        .iter()
        .filter(|e| {
            e.event_type == AuditEventType::DataDecryption
                && (e.model_name.is_none() || e.field_name.is_none())
        })
        .collect();

    if unscoped.is_empty() {
        ComplianceFinding::new("data_access_logging", "Field-level access logging", CheckStatus::Pass, Severity::Medium)
            .describe("Every decryption records the model and field")
    } else {
        ComplianceFinding::new("data_access_logging", "Field-level access logging", CheckStatus::Warning, Severity::Medium)
            .describe(format!("{} decryptions lack model or field details", unscoped.len()))
            .with_evidence(unscoped.into_iter())
    }
}

/// Key export must originate from an internal network
pub fn check_key_export_controls(ctx: &CheckContext<'_>) -> ComplianceFinding {
    let external: Vec<&AuditEvent> = ctx
        .events
        .iter()
        .filter(|e| {
            e.event_type == AuditEventType::KeyExport
                && e.ip_address.as_deref().is_some_and(|ip| !is_internal_ip(ip))
        })
        .collect();

    if external.is_empty() {
        ComplianceFinding::new("key_export_controls", "Key export controls", CheckStatus::Pass, Severity::Critical)
            .describe("No key export from outside the internal network")
    } else {
        ComplianceFinding::new("key_export_controls", "Key export controls", CheckStatus::Fail, Severity::Critical)
            .describe(format!("{} key exports originated externally", external.len()))
            .with_evidence(external.into_iter())
    }
}

/// Key deletion must name the acting user
pub fn check_key_deletion_attributed(ctx: &CheckContext<'_>) -> ComplianceFinding {
    let unattributed: Vec<&AuditEvent> = ctx
        .events
        .iter()
        .filter(|e| e.event_type == AuditEventType::KeyDeletion && e.user_id.is_none())
        .collect();

    if unattributed.is_empty() {
        ComplianceFinding::new("key_deletion_attribution", "Key deletion attribution", CheckStatus::Pass, Severity::High)
            .describe("Every key deletion is attributed")
    } else {
        ComplianceFinding::new("key_deletion_attribution", "Key deletion attribution", CheckStatus::Fail, Severity::High)
            .describe(format!("{} key deletions have no user attached", unattributed.len()))
            .with_evidence(unattributed.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NewAuditEvent;

    fn context(events: &[AuditEvent]) -> CheckContext<'_> {
        let now = Utc::now();
        CheckContext {
            organization_id: "org-1",
            period_start: now - chrono::Duration::days(30),
            period_end: now,
            events,
        }
    }

    fn pass_check(_: &CheckContext<'_>) -> ComplianceFinding {
        ComplianceFinding::new("always_pass", "Always pass", CheckStatus::Pass, Severity::Low)
    }

    fn fail_check(_: &CheckContext<'_>) -> ComplianceFinding {
        ComplianceFinding::new("always_fail", "Always fail", CheckStatus::Fail, Severity::Low)
    }

    fn warn_check(_: &CheckContext<'_>) -> ComplianceFinding {
        ComplianceFinding::new("always_warn", "Always warn", CheckStatus::Warning, Severity::Low)
    }

    #[test]
    fn test_summary_score() {
        let mut registry = ComplianceRegistry::empty();
        registry.register("CUSTOM", pass_check);
        registry.register("CUSTOM", pass_check);
        registry.register("CUSTOM", fail_check);
        registry.register("CUSTOM", warn_check);

        let report = registry.generate("custom", &context(&[]));
        assert_eq!(report.report_type, "CUSTOM");
        assert_eq!(report.summary.total_checks, 4);
        assert_eq!(report.summary.passed_checks, 2);
        assert_eq!(report.summary.failed_checks, 1);
        assert_eq!(report.summary.warning_checks, 1);
        assert_eq!(report.summary.compliance_score, 50.0);
    }

    #[test]
    fn test_unknown_report_type_is_empty() {
        let report = ComplianceRegistry::default().generate("ISO27001", &context(&[]));
        assert!(report.findings.is_empty());
        assert_eq!(report.summary.total_checks, 0);
        assert_eq!(report.summary.compliance_score, 0.0);
    }

    #[test]
    fn test_default_registry_types() {
        assert_eq!(
            ComplianceRegistry::default().report_types(),
            vec!["GDPR", "HIPAA", "PCI_DSS", "SOC2"]
        );
    }

    #[test]
    fn test_clean_activity_passes_soc2() {
        let events = vec![
            AuditEvent::record(
                NewAuditEvent::new("org-1", AuditEventType::KeyRotation, "rotate").with_user("admin"),
            ),
            AuditEvent::record(
                NewAuditEvent::new("org-1", AuditEventType::DataDecryption, "decrypt")
                    .with_user("alice")
                    .with_field("vendors", "tax_id"),
            ),
        ];

        let report = ComplianceRegistry::default().generate("SOC2", &context(&events));
        assert_eq!(report.summary.total_checks, 5);
        assert_eq!(report.summary.compliance_score, 100.0);
    }

    #[test]
    fn test_tampered_event_fails_integrity() {
        let mut event = AuditEvent::record(NewAuditEvent::new(
            "org-1",
            AuditEventType::KeyAccess,
            "get_key",
        ));
        event.operation = "export_key".to_string();

        let finding = check_audit_integrity(&context(std::slice::from_ref(&event)));
        assert_eq!(finding.status, CheckStatus::Fail);
        assert_eq!(finding.evidence, vec![event.id.to_string()]);
    }

    #[test]
    fn test_external_export_fails() {
        let events = vec![AuditEvent::record(
            NewAuditEvent::new("org-1", AuditEventType::KeyExport, "export_key").with_ip("198.51.100.7"),
        )];
        let finding = check_key_export_controls(&context(&events));
        assert_eq!(finding.status, CheckStatus::Fail);
    }

    #[test]
    fn test_failure_rate_bands() {
        let mut events: Vec<AuditEvent> = (0..9)
            .map(|_| AuditEvent::record(NewAuditEvent::new("org-1", AuditEventType::DataEncryption, "encrypt")))
            .collect();
        events.push(AuditEvent::record(
            NewAuditEvent::new("org-1", AuditEventType::DataEncryption, "encrypt").failed(),
        ));

        let finding = check_failure_rate(&context(&events));
        assert_eq!(finding.status, CheckStatus::Warning);
        assert_eq!(finding.evidence.len(), 1);
    }
}
