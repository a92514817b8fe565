//! Crisis escalation from reputation, identity and persistence failures

use crate::test_utils::*;
use serde_json::json;
use sovledger_core::entry::GENESIS_HASH;
use sovledger_core::event::{reason_codes, CrisisStatus};
use sovledger_core::ledger::SqliteLedgerStore;
use sovledger_gate::{ErrorKind, GateError, IntegrityStatus};
use std::sync::Arc;

#[tokio::test]
async fn test_repeated_failures_escalate_then_lock_out() {
    init_tracing();
    let gate = gate_over(Arc::new(SqliteLedgerStore::open_in_memory().unwrap()));
    let mut events = gate.subscribe();
    let attacker = origin("10.66.0.1");

    // 6 x 12.5 reaches the crisis threshold, 8 x 12.5 passes lockdown
    for _ in 0..8 {
        let err = gate
            .dispatch(json!({"action": ""}), &creator("did:example:eve"), &attacker)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Commit(ref e) if e.kind() == ErrorKind::Validation));
    }

    let escalations = drain(&mut events);
    assert_eq!(escalations.len(), 2);
    assert_eq!(escalations[0].status, CrisisStatus::Critical);
    assert_eq!(escalations[0].cause, reason_codes::VALIDATION_FAILED);
    assert_eq!(escalations[0].threat_level, 75.0);
    assert_eq!(escalations[0].source, "10.66.0.1");
    assert_eq!(escalations[1].status, CrisisStatus::Lockdown);
    assert_eq!(escalations[1].cause, reason_codes::LOCKDOWN_THRESHOLD_REACHED);
    assert_eq!(escalations[1].threat_level, 100.0);

    // A well-formed request is now refused before it reaches the pipeline
    let err = gate
        .dispatch(json!({"action": "VIEW"}), &creator("did:example:eve"), &attacker)
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Denied { ref origin } if origin == "10.66.0.1"));
    assert!(drain(&mut events).is_empty());

    // Other origins are unaffected
    gate.dispatch(json!({"action": "VIEW"}), &creator("did:example:bob"), &origin("10.0.0.5"))
        .await
        .unwrap();
    assert_eq!(gate.stats().await.unwrap().ledger_height, 1);
}

#[tokio::test]
async fn test_failures_without_origin_share_the_unknown_key() {
    let gate = gate_over(Arc::new(SqliteLedgerStore::open_in_memory().unwrap()));
    let anonymous = sovledger_gate::CallerProfile::default();

    gate.dispatch(json!([1, 2]), &creator("did:example:eve"), &anonymous)
        .await
        .unwrap_err();
    assert_eq!(gate.reputation().score("unknown").await.unwrap(), 12.5);
}

#[tokio::test]
async fn test_non_root_burst_triggers_lockdown() {
    let ledger = TempLedger::new();
    let gate = gate_over(ledger.open());
    let mut events = gate.subscribe();

    let err = gate
        .ingest_burst(&creator("did:example:mallory"), &origin("10.3.0.9"), &[0u8; 32])
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Commit(ref e) if e.kind() == ErrorKind::Identity));

    let event = drain(&mut events).remove(0);
    assert_eq!(event.status, CrisisStatus::Lockdown);
    assert_eq!(event.cause, reason_codes::UNAUTHORIZED_ACCESS_ATTEMPT);
    assert_eq!(gate.stats().await.unwrap().ledger_height, 0);

    // Root with high assurance may anchor the same burst
    let receipt = gate
        .ingest_burst(&root_creator(), &origin("10.3.0.1"), &[0u8; 32])
        .await
        .unwrap();
    assert_eq!(receipt.seq_no, 1);
}

#[tokio::test]
async fn test_persistence_failure_leaves_chain_untouched() {
    let sqlite = Arc::new(SqliteLedgerStore::open_in_memory().unwrap());
    let healthy = gate_over(sqlite.clone());
    let anchor = healthy
        .dispatch(json!({"action": "OPEN_ACCOUNT"}), &creator("did:example:alice"), &origin("10.4.0.1"))
        .await
        .unwrap();

    let gate = gate_over(Arc::new(FailingAppends(sqlite)));
    let mut events = gate.subscribe();
    let err = gate
        .dispatch(json!({"action": "CLOSE_ACCOUNT"}), &creator("did:example:alice"), &origin("10.4.0.1"))
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Commit(ref e) if e.kind() == ErrorKind::Persistence));

    let stats = gate.stats().await.unwrap();
    assert_eq!(stats.ledger_height, 1);
    assert_eq!(stats.last_hash, anchor.integrity_hash);
    assert_eq!(stats.integrity_status, IntegrityStatus::Secure);
    assert_ne!(stats.last_hash, GENESIS_HASH);

    let event = drain(&mut events).remove(0);
    assert_eq!(event.status, CrisisStatus::Critical);
    assert_eq!(event.cause, reason_codes::PERSISTENCE_FAILURE);
    assert_eq!(event.threat_level, 80.0);
}
