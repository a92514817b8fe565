//! Crisis event schema.
//!
//! Crisis events are the structured alerts fanned out to observers when the
//! ledger detects tampering or a caller's abuse score crosses a threshold.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Emergency state carried by a crisis event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrisisStatus {
    /// Elevated threat, traffic is monitored
    Critical,
    /// Maximum threat, the affected surface is locked down
    Lockdown,
}

impl CrisisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrisisStatus::Critical => "CRITICAL",
            CrisisStatus::Lockdown => "LOCKDOWN",
        }
    }
}

/// Structured alert published on the crisis channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrisisEvent {
    pub status: CrisisStatus,
    /// Severity on a 0..=100 scale
    pub threat_level: f64,
    /// Human-readable cause
    pub cause: String,
    /// Component or caller that triggered the event
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl CrisisEvent {
    pub fn new(
        status: CrisisStatus,
        threat_level: f64,
        cause: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            status,
            threat_level,
            cause: cause.into(),
            source: source.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Stable reason codes used as crisis causes and reputation reasons.
pub mod reason_codes {
    pub const CHAIN_INTEGRITY_BREACH: &str = "CHAIN_INTEGRITY_BREACH";
    pub const UNAUTHORIZED_ACCESS_ATTEMPT: &str = "UNAUTHORIZED_ACCESS_ATTEMPT";
    pub const HIGH_RISK_DETECTED: &str = "HIGH_RISK_DETECTED";
    pub const LOCKDOWN_THRESHOLD_REACHED: &str = "LOCKDOWN_THRESHOLD_REACHED";
    pub const PERSISTENCE_FAILURE: &str = "LEDGER_PERSISTENCE_FAILURE";
    pub const ADMISSION_DENIED: &str = "ADMISSION_DENIED";
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let event = CrisisEvent::new(
            CrisisStatus::Lockdown,
            100.0,
            "CHAIN_INTEGRITY_BREACH from commit-pipeline",
            "commit-pipeline",
        );
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["status"], "LOCKDOWN");
        assert_eq!(json["threatLevel"], 100.0);
        assert_eq!(json["source"], "commit-pipeline");
        assert!(json["timestamp"].is_string());

        let back: CrisisEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
