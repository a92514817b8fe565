//! Commit pipeline - anchors validated actions into the hash chain.
//!
//! Each commit runs, in order: validation, the root check for privileged
//! actions, sanitization, binding of the mirrored columns back into the
//! payload, risk classification, tip verification, digest
//! computation and a conditional append against the verified head. An
//! append that loses the race for the tip is recomputed against the new
//! tip, so two commits can never extend the same parent.
//!
//! Failures are returned as [`CommitError`] and mirrored into the crisis
//! channel and the caller's reputation before the caller sees them:
//! - The first integrity failure latches a halt and broadcasts a lockdown;
//!   commits rejected while halted are neither broadcast nor charged
//! - Persistence failures broadcast a critical event
//! - Identity failures were already broadcast by the identity gate

use crate::blocking;
use crate::context::{self, CallerContext, CallerProfile, ValidationError, DEFAULT_DEVICE_ID};
use crate::stats::{IntegrityStatus, LedgerStats};
use crate::verifier::{ChainAuditor, ChainVerifier, TipStatus};
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sovledger_core::audit::AuditReport;
use sovledger_core::canonical;
use sovledger_core::config::PipelineConfig;
use sovledger_core::entry::{
    bind_columns, canonical_id_for, certificate_token, ChainHead, CreatorIdentity, LedgerEntry,
    RiskLevel, VerificationLevel,
};
use sovledger_core::event::reason_codes;
use sovledger_core::hash_link;
use sovledger_core::ledger::{LedgerStore, StoreError};
use sovledger_core::risk::{KeywordRiskClassifier, RiskClassifier};
use sovledger_core::sanitize::Sanitizer;
use sovledger_core::telemetry::Telemetry;
use sovledger_sentinel::{CrisisBroadcaster, IdentityDenied, IdentityGate, ReputationTracker};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Source name on crisis events raised by the pipeline
const SOURCE: &str = "commit-pipeline";

const HALTED_REASON: &str = "appends halted until the breach is acknowledged";

/// Public failure kinds of a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    Identity,
    Integrity,
    Persistence,
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Identity check failed: {0}")]
    Identity(#[from] IdentityDenied),

    #[error("Chain integrity breach: {0}")]
    Integrity(String),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

impl CommitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommitError::Validation(_) => ErrorKind::Validation,
            CommitError::Identity(_) => ErrorKind::Identity,
            CommitError::Integrity(_) => ErrorKind::Integrity,
            CommitError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Stable code used as reputation reason and crisis cause
    pub fn reason_code(&self) -> &'static str {
        match self {
            CommitError::Validation(_) => reason_codes::VALIDATION_FAILED,
            CommitError::Identity(_) => reason_codes::UNAUTHORIZED_ACCESS_ATTEMPT,
            CommitError::Integrity(_) => reason_codes::CHAIN_INTEGRITY_BREACH,
            CommitError::Persistence(_) => reason_codes::PERSISTENCE_FAILURE,
        }
    }
}

/// Non-repudiation acknowledgment for a committed entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReceipt {
    pub entry_id: Uuid,
    pub seq_no: u64,
    pub canonical_id: String,
    pub certificate_token: String,
    pub risk_level: RiskLevel,
    pub verification_level: VerificationLevel,
    pub integrity_hash: String,
    pub previous_hash: String,
    pub created_at: DateTime<Utc>,
    pub trace_id: String,
}

impl CommitReceipt {
    fn new(seq_no: u64, entry: &LedgerEntry, trace_id: String) -> Self {
        Self {
            entry_id: entry.id,
            seq_no,
            canonical_id: entry.canonical_id.clone(),
            certificate_token: certificate_token(&entry.id),
            risk_level: entry.risk_level,
            verification_level: entry.verification_level,
            integrity_hash: entry.integrity_hash.clone(),
            previous_hash: entry.previous_hash.clone(),
            created_at: entry.created_at,
            trace_id,
        }
    }
}

/// Commit timestamp: now at microsecond precision, never before the tip
fn commit_time(head: &ChainHead) -> DateTime<Utc> {
    let now = Utc::now();
    let now = now
        .with_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .unwrap_or(now);
    match head.created_at {
        Some(tip) if tip > now => tip,
        _ => now,
    }
}

pub struct CommitPipeline {
    store: Arc<dyn LedgerStore>,
    verifier: ChainVerifier,
    auditor: ChainAuditor,
    sanitizer: Sanitizer,
    classifier: Arc<dyn RiskClassifier>,
    identity: IdentityGate,
    reputation: Arc<ReputationTracker>,
    broadcaster: CrisisBroadcaster,
    config: PipelineConfig,
    halted: AtomicBool,
}

impl CommitPipeline {
    /// Build a pipeline over `store`.
    ///
    /// A store whose startup continuity check failed starts halted.
    pub fn new(
        store: Arc<dyn LedgerStore>,
        reputation: Arc<ReputationTracker>,
        identity: IdentityGate,
        broadcaster: CrisisBroadcaster,
        config: PipelineConfig,
    ) -> Self {
        let timeout = config.store_timeout();
        let health = store.health();
        if !health.is_ok() {
            warn!(health = ?health, "Ledger opened corrupted, appends halted");
        }

        Self {
            verifier: ChainVerifier::new(store.clone(), timeout),
            auditor: ChainAuditor::new(store.clone(), timeout),
            store,
            sanitizer: Sanitizer::default(),
            classifier: Arc::new(KeywordRiskClassifier::new()),
            identity,
            reputation,
            broadcaster,
            config,
            halted: AtomicBool::new(!health.is_ok()),
        }
    }

    /// Replace the risk classifier; audits re-derive levels with it too.
    pub fn with_classifier(mut self, classifier: Arc<dyn RiskClassifier>) -> Self {
        self.auditor = self.auditor.with_classifier(classifier.clone());
        self.classifier = classifier;
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    pub fn verifier(&self) -> &ChainVerifier {
        &self.verifier
    }

    /// Whether appends are halted after an integrity breach
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Anchor one action in the ledger.
    ///
    /// The outcome is recorded against the caller's origin whether or not
    /// the commit succeeds.
    pub async fn commit(
        &self,
        raw: Value,
        ctx: &CallerContext,
        profile: &CallerProfile,
    ) -> Result<CommitReceipt, CommitError> {
        // The breach was already broadcast and charged when the latch flipped
        if self.is_halted() {
            warn!(origin = %profile.origin_key(), "Commit rejected, appends halted");
            return Err(CommitError::Integrity(HALTED_REASON.to_string()));
        }

        let outcome = match self.run(raw, ctx, profile).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => Err(self.escalate(e, profile)),
        };

        let (success, reason) = match &outcome {
            Ok(_) => (true, None),
            Err(e) => (false, Some(e.reason_code())),
        };
        if let Err(e) = self
            .reputation
            .record_outcome(profile.origin_key(), success, reason)
            .await
        {
            error!(origin = %profile.origin_key(), error = %e, "Failed to record commit outcome");
        }

        outcome
    }

    async fn run(
        &self,
        raw: Value,
        ctx: &CallerContext,
        profile: &CallerProfile,
    ) -> Result<CommitReceipt, CommitError> {
        let commit = context::validate(raw, ctx, &self.config)?;
        let did = ctx.did.trim();

        if self
            .config
            .privileged_actions
            .iter()
            .any(|action| *action == commit.action)
        {
            self.identity.authorize_root(did, &commit.action)?;
        }

        let mut payload = self.sanitizer.sanitize(commit.payload);
        bind_columns(
            &mut payload,
            &commit.action,
            &commit.tags,
            commit.quantum_signature.as_deref(),
        );
        let telemetry = Telemetry::from_payload(&payload);
        let canonical_payload =
            canonical::canonical_map(&payload).map_err(|e| ValidationError::Invalid {
                field: "payload",
                reason: e.to_string(),
            })?;
        let risk_level = self.classifier.classify(&commit.action);

        let verification_level = if self.identity.is_root_authority(did)
            && ctx.assurance_level == context::AssuranceLevel::High
        {
            VerificationLevel::Root
        } else if commit.quantum_signature.is_some() {
            VerificationLevel::Quantum
        } else {
            VerificationLevel::Basic
        };

        let trace_id = profile
            .trace_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let creator = CreatorIdentity::new(did, ctx.pubkey.trim(), ctx.signature.trim());

        for attempt in 1..=self.config.max_append_attempts {
            let tip = self.verifier.inspect_tip().await?;
            if let TipStatus::Broken {
                seq_no,
                expected,
                actual,
            } = &tip.status
            {
                return Err(CommitError::Integrity(format!(
                    "entry {} links to {} instead of {}",
                    seq_no, actual, expected
                )));
            }

            let head = tip.head;
            let id = Uuid::new_v4();
            let created_at = commit_time(&head);
            let salt = hash_link::fresh_salt(&trace_id);
            let integrity_hash = hash_link::compute_digest(
                &id,
                &head.hash,
                &canonical_payload,
                created_at.timestamp_micros(),
                &salt,
            )
            .map_err(|e| CommitError::Integrity(e.to_string()))?;

            let entry = LedgerEntry {
                id,
                canonical_id: canonical_id_for(&id, &created_at),
                action_type: commit.action.clone(),
                creator: creator.clone(),
                integrity_hash,
                previous_hash: head.hash.clone(),
                risk_level,
                verification_level,
                payload: payload.clone(),
                context_tags: commit.tags.clone(),
                created_at,
                salt: hex::encode(salt),
                quantum_signature: commit.quantum_signature.clone(),
                device_id: Some(
                    ctx.device_id
                        .clone()
                        .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string()),
                ),
                session_id: ctx.session_id.clone(),
                network_origin: profile.origin.clone(),
                verified_by_root: verification_level == VerificationLevel::Root,
                telemetry_data: telemetry.data.clone(),
                ecg_intensity: telemetry.ecg_intensity,
                ecg_entropy: telemetry.ecg_entropy,
                ecg_pattern: telemetry.ecg_pattern.clone(),
            };

            let deadline = Instant::now() + self.config.store_timeout();
            let pending = entry.clone();
            let appended = blocking::write(&self.store, move |store| {
                store.append(&head, &pending, deadline)
            })
            .await;

            match appended {
                Ok(seq_no) => {
                    info!(
                        entry_id = %entry.id,
                        seq_no,
                        action = %entry.action_type,
                        risk = ?risk_level,
                        origin = %profile.origin_key(),
                        trace_id = %trace_id,
                        "Entry committed"
                    );
                    return Ok(CommitReceipt::new(seq_no, &entry, trace_id));
                }
                Err(StoreError::HeadMoved { .. }) => {
                    debug!(attempt, trace_id = %trace_id, "Chain head moved, retrying append");
                }
                Err(StoreError::Corrupt(reason)) => return Err(CommitError::Integrity(reason)),
                Err(e) => return Err(CommitError::Persistence(e)),
            }
        }

        Err(CommitError::Persistence(StoreError::Contention {
            attempts: self.config.max_append_attempts,
        }))
    }

    fn escalate(&self, err: CommitError, profile: &CallerProfile) -> CommitError {
        match &err {
            CommitError::Integrity(reason) => {
                if self.halted.swap(true, Ordering::SeqCst) {
                    warn!(origin = %profile.origin_key(), reason = %reason, "Integrity failure while halted");
                } else {
                    error!(
                        origin = %profile.origin_key(),
                        reason = %reason,
                        "Chain integrity breach, halting appends"
                    );
                    self.broadcaster
                        .emergency_lockdown(reason_codes::CHAIN_INTEGRITY_BREACH, SOURCE);
                }
            }
            CommitError::Persistence(e) => {
                error!(origin = %profile.origin_key(), error = %e, "Ledger persistence failure");
                self.broadcaster.publish(
                    reason_codes::PERSISTENCE_FAILURE,
                    self.config.persistence_failure_severity,
                    SOURCE,
                );
            }
            CommitError::Validation(e) => {
                debug!(origin = %profile.origin_key(), error = %e, "Commit rejected");
            }
            CommitError::Identity(_) => {}
        }
        err
    }

    /// Clear the integrity halt once the tip verifies again.
    pub async fn acknowledge_breach(&self) -> Result<(), CommitError> {
        let tip = self.verifier.inspect_tip().await?;
        if !tip.is_intact() {
            return Err(CommitError::Integrity(
                "chain tip still fails verification".to_string(),
            ));
        }

        if self.halted.swap(false, Ordering::SeqCst) {
            info!(height = tip.head.height, "Integrity breach acknowledged, appends resumed");
        }
        Ok(())
    }

    pub async fn stats(&self) -> Result<LedgerStats, StoreError> {
        let tip = self.verifier.inspect_tip().await?;
        let integrity_status = if tip.is_intact() && !self.is_halted() {
            IntegrityStatus::Secure
        } else {
            IntegrityStatus::Compromised
        };

        Ok(LedgerStats {
            ledger_height: tip.head.height,
            integrity_status,
            last_hash: tip.head.hash,
        })
    }

    /// Walk and re-hash the whole chain; a break halts appends.
    pub async fn audit(&self) -> Result<AuditReport, StoreError> {
        let report = self.auditor.audit().await?;
        if !report.status.is_intact() && !self.halted.swap(true, Ordering::SeqCst) {
            self.broadcaster
                .emergency_lockdown(reason_codes::CHAIN_INTEGRITY_BREACH, SOURCE);
        }
        Ok(report)
    }
}
