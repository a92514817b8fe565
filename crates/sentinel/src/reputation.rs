//! Reputation-based admission control.
//!
//! Each caller key carries an abuse score in the shared counter store.
//! Failures add a fixed penalty, successes subtract a smaller credit, and
//! every update resets the inactivity window so a dormant caller cools off
//! on its own. Crossing the crisis threshold raises a crisis event; at the
//! lockdown threshold the caller is denied until the score decays.

use crate::counter::{CounterError, CounterStore};
use crate::crisis::CrisisBroadcaster;
use sovledger_core::config::ReputationConfig;
use sovledger_core::event::{reason_codes, CrisisStatus};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Admission decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Deny,
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allow)
    }
}

#[derive(Debug, Error)]
pub enum ReputationError {
    #[error("Counter store error: {0}")]
    Store(#[from] CounterError),

    #[error("Counter store did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

/// Result of recording one outcome
#[derive(Debug, Clone, PartialEq)]
pub struct ReputationUpdate {
    pub previous: f64,
    pub score: f64,
    /// Thresholds crossed upward by this update
    pub crossings: Vec<CrisisStatus>,
}

/// Per-caller abuse scoring over a shared counter store
pub struct ReputationTracker {
    store: Arc<dyn CounterStore>,
    broadcaster: CrisisBroadcaster,
    config: ReputationConfig,
}

impl ReputationTracker {
    pub fn new(
        store: Arc<dyn CounterStore>,
        broadcaster: CrisisBroadcaster,
        config: ReputationConfig,
    ) -> Self {
        Self {
            store,
            broadcaster,
            config,
        }
    }

    fn key(&self, caller: &str) -> String {
        format!("{}{}", self.config.key_prefix, caller)
    }

    /// Current score; an unknown or expired caller scores zero
    pub async fn score(&self, caller: &str) -> Result<f64, ReputationError> {
        let timeout = self.config.op_timeout();
        let value = tokio::time::timeout(timeout, self.store.get(&self.key(caller)))
            .await
            .map_err(|_| ReputationError::Timeout(timeout))??;
        Ok(value.unwrap_or(0.0))
    }

    /// Decide whether the caller may proceed.
    ///
    /// Fails closed: if the score cannot be read the caller is denied.
    pub async fn admit(&self, caller: &str) -> Admission {
        match self.score(caller).await {
            Ok(score) if score >= self.config.lockdown_threshold => {
                warn!(origin = %caller, score, "Admission denied");
                Admission::Deny
            }
            Ok(_) => Admission::Allow,
            Err(e) => {
                error!(origin = %caller, error = %e, "Reputation store failure, denying");
                Admission::Deny
            }
        }
    }

    /// Record a success or failure for the caller.
    ///
    /// A failure that lifts the score across the crisis or lockdown threshold
    /// publishes exactly one crisis event per threshold crossed.
    pub async fn record_outcome(
        &self,
        caller: &str,
        success: bool,
        reason: Option<&str>,
    ) -> Result<ReputationUpdate, ReputationError> {
        let delta = if success {
            -self.config.success_credit
        } else {
            self.config.failure_penalty
        };

        let timeout = self.config.op_timeout();
        let score = tokio::time::timeout(
            timeout,
            self.store
                .increment_with_expiry(&self.key(caller), delta, self.config.ttl()),
        )
        .await
        .map_err(|_| ReputationError::Timeout(timeout))??;
        let previous = score - delta;

        debug!(origin = %caller, success, score, "Reputation updated");

        let mut crossings = Vec::new();
        if !success {
            if previous < self.config.crisis_threshold && score >= self.config.crisis_threshold {
                let cause = reason.unwrap_or(reason_codes::HIGH_RISK_DETECTED);
                self.broadcaster.publish(cause, score, caller);
                crossings.push(CrisisStatus::Critical);
            }
            if previous < self.config.lockdown_threshold && score >= self.config.lockdown_threshold
            {
                self.broadcaster
                    .publish(reason_codes::LOCKDOWN_THRESHOLD_REACHED, score, caller);
                crossings.push(CrisisStatus::Lockdown);
            }
        }

        Ok(ReputationUpdate {
            previous,
            score,
            crossings,
        })
    }
}
