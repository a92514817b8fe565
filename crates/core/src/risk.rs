//! Risk classification for ledger actions.
//!
//! Classification is informational: it tags entries for audit and never
//! gates access.

use crate::entry::RiskLevel;

/// Verbs that mark an action as destructive or root-scoped
pub const CRITICAL_KEYWORDS: &[&str] = &["delete", "purge", "withdraw", "root"];

/// Verbs that mark an action as mutating
pub const HIGH_KEYWORDS: &[&str] = &["update", "transfer"];

/// Assigns a severity level to an action name
///
/// Implementations must be total and deterministic.
pub trait RiskClassifier: Send + Sync {
    fn classify(&self, action: &str) -> RiskLevel;
}

/// Substring matching over the lowercased action name
#[derive(Debug, Clone, Default)]
pub struct KeywordRiskClassifier;

impl KeywordRiskClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl RiskClassifier for KeywordRiskClassifier {
    fn classify(&self, action: &str) -> RiskLevel {
        let action = action.to_lowercase();
        if CRITICAL_KEYWORDS.iter().any(|word| action.contains(word)) {
            return RiskLevel::Critical;
        }
        if HIGH_KEYWORDS.iter().any(|word| action.contains(word)) {
            return RiskLevel::High;
        }
        RiskLevel::Low
    }
}
