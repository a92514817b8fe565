//! Chain walking for continuity checks and full audits.
//!
//! [`ChainWalker`] consumes entries in commit order and stops at the first
//! broken invariant: a gap in `seq_no` or a `previous_hash` that does not
//! match the predecessor. A full audit also recomputes each digest and checks
//! that the columns mirrored from the payload still agree with it.

use crate::entry::{
    LedgerEntry, VerificationLevel, ACTION_KEY, GENESIS_HASH, QUANTUM_SIG_KEY, TAGS_KEY,
};
use crate::hash_link;
use crate::risk::{KeywordRiskClassifier, RiskClassifier};
use crate::telemetry::Telemetry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Why the chain was judged broken
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakReason {
    /// Sequence numbers are not contiguous
    SequenceGap { expected: u64, actual: u64 },
    /// `previous_hash` does not match the predecessor's digest
    LinkMismatch { expected: String, actual: String },
    /// Stored digest does not match the recomputed digest
    DigestMismatch { stored: String, recomputed: String },
    /// A column disagrees with the digested content it is derived from
    FieldMismatch {
        field: String,
        stored: String,
        expected: String,
    },
    /// Digest inputs could not be read back
    Unverifiable(String),
}

impl BreakReason {
    pub fn description(&self) -> String {
        match self {
            BreakReason::SequenceGap { expected, actual } => {
                format!("sequence gap: expected {}, found {}", expected, actual)
            }
            BreakReason::LinkMismatch { expected, actual } => {
                format!("previous hash mismatch: expected {}, found {}", expected, actual)
            }
            BreakReason::DigestMismatch { stored, .. } => {
                format!("content no longer matches digest {}", stored)
            }
            BreakReason::FieldMismatch {
                field,
                stored,
                expected,
            } => format!("{} is {} but the content implies {}", field, stored, expected),
            BreakReason::Unverifiable(reason) => format!("unverifiable entry: {}", reason),
        }
    }
}

/// Outcome of walking the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AuditStatus {
    Intact,
    Broken { seq_no: u64, reason: BreakReason },
}

impl AuditStatus {
    pub fn is_intact(&self) -> bool {
        matches!(self, AuditStatus::Intact)
    }
}

/// Summary of a chain walk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Entries accepted before the walk stopped
    pub entries_checked: u64,
    pub status: AuditStatus,
    /// Digest of the last accepted entry
    pub last_hash: String,
}

fn mismatch(field: &str, stored: impl ToString, expected: impl ToString) -> BreakReason {
    BreakReason::FieldMismatch {
        field: field.to_string(),
        stored: stored.to_string(),
        expected: expected.to_string(),
    }
}

fn ensure<T: PartialEq + std::fmt::Debug>(
    field: &str,
    stored: T,
    expected: T,
) -> Result<(), BreakReason> {
    if stored == expected {
        Ok(())
    } else {
        Err(mismatch(field, format!("{:?}", stored), format!("{:?}", expected)))
    }
}

/// Check the columns that mirror digested content.
///
/// `action_type`, `context_tags`, `quantum_signature` and the telemetry
/// columns are re-derived from the payload, `risk_level` from the action,
/// and the creator fingerprint from the stored key and identifier.
pub fn check_columns(
    entry: &LedgerEntry,
    classifier: &dyn RiskClassifier,
) -> Result<(), BreakReason> {
    let action = match entry.payload.get(ACTION_KEY) {
        Some(Value::String(action)) => action.trim().to_uppercase(),
        _ => String::new(),
    };
    if entry.action_type != action {
        return Err(mismatch("action_type", &entry.action_type, action));
    }

    let risk = classifier.classify(&entry.action_type);
    if entry.risk_level != risk {
        return Err(mismatch("risk_level", entry.risk_level, risk));
    }

    let fingerprint = hash_link::fingerprint(&entry.creator.pubkey, &entry.creator.did);
    if entry.creator.fingerprint != fingerprint {
        return Err(mismatch("creator_fingerprint", &entry.creator.fingerprint, fingerprint));
    }

    let tags: Vec<String> = match entry.payload.get(TAGS_KEY) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|tag| tag.as_str().unwrap_or_default().trim().to_string())
            .collect(),
        _ => Vec::new(),
    };
    ensure("context_tags", &entry.context_tags, &tags)?;

    let quantum_signature = entry
        .payload
        .get(QUANTUM_SIG_KEY)
        .and_then(Value::as_str)
        .map(|sig| sig.trim().to_string());
    ensure(
        "quantum_signature",
        &entry.quantum_signature,
        &quantum_signature,
    )?;

    ensure(
        "verified_by_root",
        entry.verified_by_root,
        entry.verification_level == VerificationLevel::Root,
    )?;

    let telemetry = Telemetry::from_payload(&entry.payload);
    ensure("telemetry", entry.telemetry(), telemetry)
}

/// Incremental chain checker
#[derive(Clone)]
pub struct ChainWalker {
    verify_digests: bool,
    classifier: Arc<dyn RiskClassifier>,
    expected_seq_no: u64,
    prev_hash: String,
    checked: u64,
    broken: Option<(u64, BreakReason)>,
}

impl ChainWalker {
    /// Create a walker starting at the genesis position
    ///
    /// With `verify_digests` every entry's digest is recomputed and its
    /// mirrored columns are checked as well.
    pub fn new(verify_digests: bool) -> Self {
        Self {
            verify_digests,
            classifier: Arc::new(KeywordRiskClassifier::new()),
            expected_seq_no: 1,
            prev_hash: GENESIS_HASH.to_string(),
            checked: 0,
            broken: None,
        }
    }

    /// Classifier the stored risk levels were assigned with
    pub fn with_classifier(mut self, classifier: Arc<dyn RiskClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Feed the next entry in commit order.
    ///
    /// Returns the break reason once the chain is broken; later calls keep
    /// returning it without inspecting further entries.
    pub fn push(&mut self, seq_no: u64, entry: &LedgerEntry) -> Result<(), BreakReason> {
        if let Some((_, reason)) = &self.broken {
            return Err(reason.clone());
        }

        if let Err(reason) = self.check(seq_no, entry) {
            self.broken = Some((seq_no, reason.clone()));
            return Err(reason);
        }

        self.prev_hash = entry.integrity_hash.clone();
        self.expected_seq_no = seq_no + 1;
        self.checked += 1;
        Ok(())
    }

    fn check(&self, seq_no: u64, entry: &LedgerEntry) -> Result<(), BreakReason> {
        if seq_no != self.expected_seq_no {
            return Err(BreakReason::SequenceGap {
                expected: self.expected_seq_no,
                actual: seq_no,
            });
        }

        if entry.previous_hash != self.prev_hash {
            return Err(BreakReason::LinkMismatch {
                expected: self.prev_hash.clone(),
                actual: entry.previous_hash.clone(),
            });
        }

        if self.verify_digests {
            let recomputed = entry
                .recompute_digest()
                .map_err(|e| BreakReason::Unverifiable(e.to_string()))?;
            if recomputed != entry.integrity_hash {
                return Err(BreakReason::DigestMismatch {
                    stored: entry.integrity_hash.clone(),
                    recomputed,
                });
            }
            check_columns(entry, self.classifier.as_ref())?;
        }

        Ok(())
    }

    /// Whether a break has been observed
    pub fn is_broken(&self) -> bool {
        self.broken.is_some()
    }

    /// Number of entries accepted so far
    pub fn checked(&self) -> u64 {
        self.checked
    }

    /// Sequence number of the last accepted entry, if any
    pub fn last_good_seq_no(&self) -> Option<u64> {
        (self.checked > 0).then(|| self.expected_seq_no - 1)
    }

    pub fn finish(self) -> AuditReport {
        let status = match self.broken {
            Some((seq_no, reason)) => AuditStatus::Broken { seq_no, reason },
            None => AuditStatus::Intact,
        };
        AuditReport {
            entries_checked: self.checked,
            status,
            last_hash: self.prev_hash,
        }
    }
}
