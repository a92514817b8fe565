//! Ledger entry data model.
//!
//! A [`LedgerEntry`] is immutable once persisted. Each entry links to its
//! predecessor through `previous_hash`, and the first entry links to the
//! [`GENESIS_HASH`] sentinel.

use crate::canonical;
use crate::hash_link::{self, HashLinkError};
use crate::telemetry::Telemetry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Previous-hash sentinel carried by the first entry of a ledger.
pub const GENESIS_HASH: &str = "GENESIS";

/// Prefix of the non-repudiation token handed back to committers.
const CERTIFICATE_PREFIX: &str = "LEDGER-CERT-";

/// Prefix of the human-auditable canonical identifier.
const CANONICAL_PREFIX: &str = "LDG";

/// Number of trailing hex characters of the entry id used in canonical ids.
const CANONICAL_SUFFIX_LEN: usize = 12;

/// Payload keys that mirror entry columns
pub const ACTION_KEY: &str = "action";
pub const TAGS_KEY: &str = "tags";
pub const QUANTUM_SIG_KEY: &str = "quantum_sig";

/// Error returned when a stored level label is not recognised
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} label: {label}")]
pub struct ParseLevelError {
    pub kind: &'static str,
    pub label: String,
}

/// Severity tag assigned to an action by the risk classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(ParseLevelError {
                kind: "risk level",
                label: other.to_string(),
            }),
        }
    }
}

/// How strongly the creator of an entry was verified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationLevel {
    /// Standard signature
    Basic,
    /// Quorum of federated nodes
    Federated,
    /// Post-quantum signature supplied alongside the action
    Quantum,
    /// Direct action of the root authority
    Root,
}

impl VerificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationLevel::Basic => "basic",
            VerificationLevel::Federated => "federated",
            VerificationLevel::Quantum => "quantum",
            VerificationLevel::Root => "root",
        }
    }
}

impl fmt::Display for VerificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(VerificationLevel::Basic),
            "federated" => Ok(VerificationLevel::Federated),
            "quantum" => Ok(VerificationLevel::Quantum),
            "root" => Ok(VerificationLevel::Root),
            other => Err(ParseLevelError {
                kind: "verification level",
                label: other.to_string(),
            }),
        }
    }
}

/// Identity of the caller that anchored an entry
///
/// Signatures are opaque: they arrive pre-verified from the identity
/// collaborator and are stored as supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorIdentity {
    /// Decentralized identifier
    pub did: String,
    /// Public key reference (PEM, JWK or multibase)
    pub pubkey: String,
    /// Signature blob
    pub signature: String,
    /// Short deterministic digest of (pubkey, did)
    pub fingerprint: String,
}

impl CreatorIdentity {
    /// Build an identity, deriving the fingerprint from the key and identifier.
    pub fn new(did: impl Into<String>, pubkey: impl Into<String>, signature: impl Into<String>) -> Self {
        let did = did.into();
        let pubkey = pubkey.into();
        let fingerprint = hash_link::fingerprint(&pubkey, &did);
        Self {
            did,
            pubkey,
            signature: signature.into(),
            fingerprint,
        }
    }
}

/// An anchored action in the append-only ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Globally unique identifier, never reused
    pub id: Uuid,
    /// Date-prefixed identifier for human audit
    pub canonical_id: String,
    /// Uppercase-normalized action label
    pub action_type: String,
    /// Creator identity
    pub creator: CreatorIdentity,
    /// Hex digest produced by the hash linker
    pub integrity_hash: String,
    /// Digest of the preceding entry, or [`GENESIS_HASH`]
    pub previous_hash: String,
    pub risk_level: RiskLevel,
    pub verification_level: VerificationLevel,
    /// Sanitized payload
    pub payload: Map<String, Value>,
    pub context_tags: Vec<String>,
    /// Commit timestamp (microsecond precision)
    pub created_at: DateTime<Utc>,
    /// Hex of the per-commit salt mixed into the digest
    pub salt: String,
    pub quantum_signature: Option<String>,
    pub device_id: Option<String>,
    pub session_id: Option<String>,
    /// Network origin of the caller
    pub network_origin: Option<String>,
    pub verified_by_root: bool,
    /// Free-form caller telemetry, `{}` when none was sent
    pub telemetry_data: Map<String, Value>,
    /// ECG signal strength in `[0, 1]`
    pub ecg_intensity: f64,
    /// ECG signal entropy in `[0, 1]`
    pub ecg_entropy: f64,
    pub ecg_pattern: String,
}

impl LedgerEntry {
    /// Whether this entry opens the chain
    pub fn is_genesis(&self) -> bool {
        self.previous_hash == GENESIS_HASH
    }

    /// Recompute the digest from the stored fields.
    pub fn recompute_digest(&self) -> Result<String, HashLinkError> {
        let salt = hash_link::decode_salt(&self.salt)?;
        let payload = canonical::canonical_map(&self.payload)
            .map_err(|e| HashLinkError::Encoding(e.to_string()))?;
        hash_link::compute_digest(
            &self.id,
            &self.previous_hash,
            &payload,
            self.created_at.timestamp_micros(),
            &salt,
        )
    }

    /// Telemetry columns as stored
    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            data: self.telemetry_data.clone(),
            ecg_intensity: self.ecg_intensity,
            ecg_entropy: self.ecg_entropy,
            ecg_pattern: self.ecg_pattern.clone(),
        }
    }

    /// True when the stored digest no longer matches the stored content.
    pub fn is_tampered(&self) -> bool {
        match self.recompute_digest() {
            Ok(digest) => digest != self.integrity_hash,
            Err(_) => true,
        }
    }
}

/// Write the normalised column values back into the payload so the digest
/// covers them. Empty tags and a missing quantum signature leave no key.
pub fn bind_columns(
    payload: &mut Map<String, Value>,
    action: &str,
    tags: &[String],
    quantum_signature: Option<&str>,
) {
    payload.insert(ACTION_KEY.to_string(), Value::from(action));
    if tags.is_empty() {
        payload.remove(TAGS_KEY);
    } else {
        payload.insert(TAGS_KEY.to_string(), Value::from(tags.to_vec()));
    }
    match quantum_signature {
        Some(sig) => payload.insert(QUANTUM_SIG_KEY.to_string(), Value::from(sig)),
        None => payload.remove(QUANTUM_SIG_KEY),
    };
}

/// Derive the canonical identifier from the creation date and the id suffix.
pub fn canonical_id_for(id: &Uuid, created_at: &DateTime<Utc>) -> String {
    let simple = id.simple().to_string();
    let suffix = &simple[simple.len() - CANONICAL_SUFFIX_LEN..];
    format!(
        "{}-{}-{}",
        CANONICAL_PREFIX,
        created_at.format("%Y%m%d"),
        suffix
    )
}

/// Truncated non-repudiation token derived from an entry id.
pub fn certificate_token(id: &Uuid) -> String {
    let simple = id.simple().to_string();
    format!("{}{}", CERTIFICATE_PREFIX, &simple[..8])
}

/// The current tip of the chain, read from the durable store
///
/// Appends are conditional on the head they were computed against, so a
/// `ChainHead` is passed explicitly from the read to the write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    /// Number of committed entries
    pub height: u64,
    /// Digest of the tip entry, or [`GENESIS_HASH`] when empty
    pub hash: String,
    /// Commit timestamp of the tip entry
    pub created_at: Option<DateTime<Utc>>,
}

impl ChainHead {
    /// Head of an empty ledger
    pub fn genesis() -> Self {
        Self {
            height: 0,
            hash: GENESIS_HASH.to_string(),
            created_at: None,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }
}
