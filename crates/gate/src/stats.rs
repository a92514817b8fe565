//! Ledger health summary for dashboards.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrityStatus {
    Secure,
    Compromised,
}

impl IntegrityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityStatus::Secure => "SECURE",
            IntegrityStatus::Compromised => "COMPROMISED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub ledger_height: u64,
    pub integrity_status: IntegrityStatus,
    /// Digest of the tip, or the genesis sentinel
    pub last_hash: String,
}
