//! Core functionality for the sovereign ledger.
//!
//! This crate provides the ledger data model, the durable store contract and
//! its SQLite implementation, the hash-chain digest, and the stateless payload
//! helpers shared by the sentinel and gate crates.

pub mod audit;
pub mod canonical;
pub mod config;
pub mod entry;
pub mod error;
pub mod event;
pub mod hash_link;
pub mod ledger;
pub mod logging;
pub mod risk;
pub mod sanitize;
pub mod telemetry;

pub use audit::{AuditReport, AuditStatus, BreakReason, ChainWalker};
pub use config::Config;
pub use entry::{
    canonical_id_for, certificate_token, ChainHead, CreatorIdentity, LedgerEntry, ParseLevelError,
    RiskLevel, VerificationLevel, GENESIS_HASH,
};
pub use error::{CoreError, Result};
pub use event::{CrisisEvent, CrisisStatus};
pub use hash_link::{HashLinkError, DIGEST_LEN, SALT_LEN};
pub use ledger::{LedgerHealth, LedgerStore, SqliteLedgerStore, StoreError};
pub use risk::{KeywordRiskClassifier, RiskClassifier};
pub use sanitize::Sanitizer;
pub use telemetry::Telemetry;
