//! Hash linking for ledger entries.
//!
//! Every entry digest binds the entry id, the predecessor's digest, the
//! canonical payload bytes, the commit timestamp and a per-commit salt. The
//! digest is a 512-bit BLAKE3 XOF output under a dedicated derive-key context,
//! so it cannot be confused with any other BLAKE3 use in the system.
//!
//! # Security Invariants
//!
//! - **Deterministic**: identical inputs always produce the identical digest
//! - **Framed**: variable-length inputs are length-prefixed, so field
//!   boundaries cannot be shifted to forge a collision
//! - **Salted**: two entries with the same payload and predecessor still
//!   produce distinct digests

use blake3::Hasher;
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use uuid::Uuid;

/// Digest width in bytes (512 bits)
pub const DIGEST_LEN: usize = 64;

/// Salt width in bytes
pub const SALT_LEN: usize = 32;

/// Fingerprint width in bytes
const FINGERPRINT_LEN: usize = 16;

const DIGEST_CONTEXT: &str = "sovledger 2026-01-01 ledger entry digest v1";
const SALT_CONTEXT: &str = "sovledger 2026-01-01 commit salt v1";
const FINGERPRINT_CONTEXT: &str = "sovledger 2026-01-01 creator fingerprint v1";

/// Errors raised for inputs the hash linker refuses to digest
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HashLinkError {
    #[error("previous hash cannot be empty")]
    EmptyPreviousHash,

    #[error("timestamp must be set")]
    UnsetTimestamp,

    #[error("invalid salt: {0}")]
    InvalidSalt(String),

    #[error("payload could not be encoded: {0}")]
    Encoding(String),
}

/// Compute the tamper-evident digest for one entry.
///
/// # Arguments
/// * `entry_id` - Freshly generated entry identifier
/// * `previous_hash` - Digest of the chain tip, or the genesis sentinel
/// * `canonical_payload` - Canonically encoded, sanitized payload
/// * `timestamp_us` - Commit timestamp in microseconds since the Unix epoch
/// * `salt` - Per-commit salt from [`derive_salt`]
///
/// # Returns
/// Lowercase hex of the 64-byte digest
pub fn compute_digest(
    entry_id: &Uuid,
    previous_hash: &str,
    canonical_payload: &[u8],
    timestamp_us: i64,
    salt: &[u8; SALT_LEN],
) -> Result<String, HashLinkError> {
    if previous_hash.is_empty() {
        return Err(HashLinkError::EmptyPreviousHash);
    }
    if timestamp_us <= 0 {
        return Err(HashLinkError::UnsetTimestamp);
    }

    let mut hasher = Hasher::new_derive_key(DIGEST_CONTEXT);
    update_framed(&mut hasher, entry_id.as_bytes());
    update_framed(&mut hasher, previous_hash.as_bytes());
    update_framed(&mut hasher, canonical_payload);
    hasher.update(&timestamp_us.to_le_bytes());
    hasher.update(salt);

    let mut digest = [0u8; DIGEST_LEN];
    hasher.finalize_xof().fill(&mut digest);
    Ok(hex::encode(digest))
}

/// Combine caller-independent randomness with the caller's correlation token.
pub fn derive_salt(random: &[u8; SALT_LEN], correlation_token: &str) -> [u8; SALT_LEN] {
    let mut hasher = Hasher::new_derive_key(SALT_CONTEXT);
    update_framed(&mut hasher, random);
    update_framed(&mut hasher, correlation_token.as_bytes());
    *hasher.finalize().as_bytes()
}

/// Draw fresh OS randomness and derive a commit salt from it.
pub fn fresh_salt(correlation_token: &str) -> [u8; SALT_LEN] {
    let mut random = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut random);
    derive_salt(&random, correlation_token)
}

/// Decode a stored hex salt.
pub fn decode_salt(encoded: &str) -> Result<[u8; SALT_LEN], HashLinkError> {
    let bytes = hex::decode(encoded).map_err(|e| HashLinkError::InvalidSalt(e.to_string()))?;
    bytes.as_slice().try_into().map_err(|_| {
        HashLinkError::InvalidSalt(format!(
            "expected {} bytes, got {}",
            SALT_LEN,
            bytes.len()
        ))
    })
}

/// Short deterministic digest of a creator's key and identifier.
pub fn fingerprint(pubkey: &str, did: &str) -> String {
    let mut hasher = Hasher::new_derive_key(FINGERPRINT_CONTEXT);
    update_framed(&mut hasher, pubkey.as_bytes());
    update_framed(&mut hasher, did.as_bytes());
    hex::encode(&hasher.finalize().as_bytes()[..FINGERPRINT_LEN])
}

fn update_framed(hasher: &mut Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
