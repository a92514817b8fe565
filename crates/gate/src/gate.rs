//! Sovereign gate - admission control in front of the commit pipeline.

use crate::context::{CallerContext, CallerProfile};
use crate::pipeline::{CommitError, CommitPipeline, CommitReceipt};
use crate::stats::LedgerStats;
use serde_json::{json, Value};
use sovledger_core::audit::AuditReport;
use sovledger_core::config::Config;
use sovledger_core::event::{reason_codes, CrisisEvent};
use sovledger_core::ledger::{LedgerStore, StoreError};
use sovledger_sentinel::{
    Admission, CounterStore, CrisisBroadcaster, IdentityGate, ReputationTracker,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, warn};

/// Action recorded for raw sensory bursts
pub const SENSORY_BURST_ACTION: &str = "SENSORY_BURST";

#[derive(Debug, Error)]
pub enum GateError {
    /// The caller's reputation is at or above the lockdown threshold
    #[error("Access denied for {origin}")]
    Denied { origin: String },

    #[error(transparent)]
    Commit(#[from] CommitError),
}

/// Entry point for callers: admit, then commit
pub struct SovereignGate {
    pipeline: Arc<CommitPipeline>,
    reputation: Arc<ReputationTracker>,
    broadcaster: CrisisBroadcaster,
}

impl SovereignGate {
    pub fn new(
        pipeline: Arc<CommitPipeline>,
        reputation: Arc<ReputationTracker>,
        broadcaster: CrisisBroadcaster,
    ) -> Self {
        Self {
            pipeline,
            reputation,
            broadcaster,
        }
    }

    /// Wire the sentinel and pipeline from configuration.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn LedgerStore>,
        counters: Arc<dyn CounterStore>,
    ) -> Self {
        let broadcaster = CrisisBroadcaster::new(&config.crisis);
        let reputation = Arc::new(ReputationTracker::new(
            counters,
            broadcaster.clone(),
            config.reputation.clone(),
        ));
        let identity = IdentityGate::new(&config.identity.root_did, broadcaster.clone());
        let pipeline = Arc::new(CommitPipeline::new(
            store,
            reputation.clone(),
            identity,
            broadcaster.clone(),
            config.pipeline.clone(),
        ));
        Self::new(pipeline, reputation, broadcaster)
    }

    /// Admission check; a denial counts as a failed attempt.
    pub async fn admit(&self, origin: &str) -> Admission {
        let admission = self.reputation.admit(origin).await;
        if admission == Admission::Deny {
            if let Err(e) = self
                .reputation
                .record_outcome(origin, false, Some(reason_codes::ADMISSION_DENIED))
                .await
            {
                error!(origin = %origin, error = %e, "Failed to record denied admission");
            }
        }
        admission
    }

    pub async fn dispatch(
        &self,
        raw: Value,
        ctx: &CallerContext,
        profile: &CallerProfile,
    ) -> Result<CommitReceipt, GateError> {
        let origin = profile.origin_key();
        if !self.admit(origin).await.is_allowed() {
            warn!(origin = %origin, did = %ctx.did, "Dispatch intercepted by admission control");
            return Err(GateError::Denied {
                origin: origin.to_string(),
            });
        }
        Ok(self.pipeline.commit(raw, ctx, profile).await?)
    }

    /// Anchor a raw sensory burst. Only the root authority may do this.
    pub async fn ingest_burst(
        &self,
        ctx: &CallerContext,
        profile: &CallerProfile,
        bytes: &[u8],
    ) -> Result<CommitReceipt, GateError> {
        let payload = json!({
            "action": SENSORY_BURST_ACTION,
            "binary_burst": true,
            "raw_hex": hex::encode(bytes),
        });
        self.dispatch(payload, ctx, profile).await
    }

    pub async fn stats(&self) -> Result<LedgerStats, StoreError> {
        self.pipeline.stats().await
    }

    pub async fn audit(&self) -> Result<AuditReport, StoreError> {
        self.pipeline.audit().await
    }

    pub async fn acknowledge_breach(&self) -> Result<(), CommitError> {
        self.pipeline.acknowledge_breach().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CrisisEvent> {
        self.broadcaster.subscribe()
    }

    pub fn broadcaster(&self) -> &CrisisBroadcaster {
        &self.broadcaster
    }

    pub fn pipeline(&self) -> &Arc<CommitPipeline> {
        &self.pipeline
    }

    pub fn reputation(&self) -> &Arc<ReputationTracker> {
        &self.reputation
    }
}
