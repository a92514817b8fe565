//! Commit path of the sovereign ledger.
//!
//! [`SovereignGate`] admits callers through the reputation tracker and hands
//! them to the [`CommitPipeline`], which verifies the chain tip, links the
//! new entry to it and appends it atomically.

mod blocking;

pub mod context;
pub mod gate;
pub mod pipeline;
pub mod stats;
pub mod verifier;

pub use context::{AssuranceLevel, CallerContext, CallerProfile, ValidationError};
pub use gate::{GateError, SovereignGate, SENSORY_BURST_ACTION};
pub use pipeline::{CommitError, CommitPipeline, CommitReceipt, ErrorKind};
pub use stats::{IntegrityStatus, LedgerStats};
pub use verifier::{ChainAuditor, ChainVerifier, TipInspection, TipStatus};
