//! Root-authority capability check.

use crate::crisis::CrisisBroadcaster;
use sovledger_core::event::reason_codes;
use thiserror::Error;
use tracing::error;

/// Raised when a non-root caller attempts a privileged action
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{did} is not authorized for {action}")]
pub struct IdentityDenied {
    pub did: String,
    pub action: String,
}

/// Compares callers against the single configured root identifier
#[derive(Debug, Clone)]
pub struct IdentityGate {
    root: blake3::Hash,
    broadcaster: CrisisBroadcaster,
}

impl IdentityGate {
    pub fn new(root_did: &str, broadcaster: CrisisBroadcaster) -> Self {
        Self {
            root: blake3::hash(root_did.as_bytes()),
            broadcaster,
        }
    }

    /// Constant-time comparison through the identifiers' digests
    pub fn is_root_authority(&self, did: &str) -> bool {
        blake3::hash(did.as_bytes()) == self.root
    }

    /// Require root for `action`; a refusal triggers an emergency lockdown.
    pub fn authorize_root(&self, did: &str, action: &str) -> Result<(), IdentityDenied> {
        if self.is_root_authority(did) {
            return Ok(());
        }

        error!(did = %did, action = %action, "Unauthorized privileged action");
        self.broadcaster
            .emergency_lockdown(reason_codes::UNAUTHORIZED_ACCESS_ATTEMPT, did);
        Err(IdentityDenied {
            did: did.to_string(),
            action: action.to_string(),
        })
    }
}
