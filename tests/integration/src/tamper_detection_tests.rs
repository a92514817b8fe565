//! Tamper detection after raw storage mutation

use crate::test_utils::*;
use serde_json::json;
use sovledger_core::audit::{AuditStatus, BreakReason};
use sovledger_core::entry::{LedgerEntry, RiskLevel, VerificationLevel};
use sovledger_core::event::{reason_codes, CrisisStatus};
use sovledger_core::ledger::{LedgerHealth, LedgerStore, SqliteLedgerStore};
use sovledger_gate::{ErrorKind, GateError, IntegrityStatus};

fn unlock_updates(store: &SqliteLedgerStore) {
    store
        .__test_execute_raw_sql("DROP TRIGGER IF EXISTS ledger_entries_no_update", &[])
        .unwrap();
}

/// Put back the columns a raw rewrite may have touched
fn restore(store: &SqliteLedgerStore, entry: &LedgerEntry) {
    let tags = serde_json::to_string(&entry.context_tags).unwrap();
    store
        .__test_execute_raw_sql(
            "UPDATE ledger_entries SET action_type = ?1, risk_level = ?2, context_tags = ?3,
             creator_did = ?4, ecg_pattern = ?5 WHERE seq_no = 1",
            &[
                &entry.action_type as &dyn rusqlite::ToSql,
                &entry.risk_level.as_str(),
                &tags,
                &entry.creator.did,
                &entry.ecg_pattern,
            ],
        )
        .unwrap();
}

#[tokio::test]
async fn test_profile_update_is_sanitized_and_linked() {
    let ledger = TempLedger::new();
    let store = ledger.open();
    let gate = gate_over(store.clone());

    let receipt = gate
        .dispatch(
            json!({
                "action": "update_profile",
                "token": "bearer-abc",
                "profile": {"bio": "hello", "password": "hunter2"},
                "keys": [{"label": "main", "private_key": "k1"}],
                "tags": ["profile", "self-service"],
            }),
            &creator("did:example:alice"),
            &origin("10.5.0.1"),
        )
        .await
        .unwrap();

    assert_eq!(receipt.risk_level, RiskLevel::High);
    assert_eq!(receipt.verification_level, VerificationLevel::Basic);

    let (seq_no, entry) = store
        .get_by_canonical_id(&receipt.canonical_id)
        .unwrap()
        .unwrap();
    assert_eq!(seq_no, 1);
    assert_eq!(entry.action_type, "UPDATE_PROFILE");
    assert_eq!(entry.context_tags, vec!["profile", "self-service"]);
    assert!(!entry.payload.contains_key("token"));
    assert_eq!(entry.payload["action"], "UPDATE_PROFILE");
    assert_eq!(entry.payload["tags"], json!(["profile", "self-service"]));
    assert_eq!(entry.payload["profile"], json!({"bio": "hello"}));
    assert_eq!(entry.payload["keys"], json!([{"label": "main"}]));
    assert!(!entry.is_tampered());
}

#[tokio::test]
async fn test_audit_catches_rewritten_payload() {
    let ledger = TempLedger::new();
    let store = ledger.open();
    let gate = gate_over(store.clone());
    for amount in [10, 20, 30] {
        gate.dispatch(
            json!({"action": "TRANSFER_CREDITS", "amount": amount}),
            &creator("did:example:alice"),
            &origin("10.5.0.2"),
        )
        .await
        .unwrap();
    }
    assert!(gate.audit().await.unwrap().status.is_intact());

    unlock_updates(&store);
    store
        .__test_execute_raw_sql(
            r#"UPDATE ledger_entries SET payload = '{"action":"TRANSFER_CREDITS","amount":9000}' WHERE seq_no = 2"#,
            &[],
        )
        .unwrap();

    let mut events = gate.subscribe();
    let report = gate.audit().await.unwrap();
    assert_eq!(report.entries_checked, 1);
    assert!(matches!(
        report.status,
        AuditStatus::Broken {
            seq_no: 2,
            reason: BreakReason::DigestMismatch { .. }
        }
    ));

    let event = drain(&mut events).remove(0);
    assert_eq!(event.status, CrisisStatus::Lockdown);
    assert_eq!(event.cause, reason_codes::CHAIN_INTEGRITY_BREACH);

    let err = gate
        .dispatch(json!({"action": "TRANSFER_CREDITS"}), &creator("did:example:alice"), &origin("10.5.0.2"))
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Commit(ref e) if e.kind() == ErrorKind::Integrity));
    assert_eq!(store.height().unwrap(), 3);
}

#[tokio::test]
async fn test_audit_catches_rewritten_columns() {
    let ledger = TempLedger::new();
    let store = ledger.open();
    let gate = gate_over(store.clone());
    let receipt = gate
        .dispatch(
            json!({
                "action": "DELETE_ACCOUNT",
                "tags": ["gdpr", "erasure"],
                "ecg": {"intensity": 0.8, "entropy": 2.5, "pattern": "spiking"},
                "telemetry": {"battery": 0.41},
            }),
            &creator("did:example:alice"),
            &origin("10.5.0.5"),
        )
        .await
        .unwrap();
    assert_eq!(receipt.risk_level, RiskLevel::Critical);

    let (_, entry) = store.get_by_id(&receipt.entry_id).unwrap().unwrap();
    assert_eq!(entry.ecg_intensity, 0.8);
    assert_eq!(entry.ecg_entropy, 1.0);
    assert_eq!(entry.ecg_pattern, "spiking");
    assert_eq!(entry.telemetry_data["battery"], 0.41);
    assert!(gate.audit().await.unwrap().status.is_intact());

    unlock_updates(&store);
    for (field, sql) in [
        ("action_type", "UPDATE ledger_entries SET action_type = 'VIEW' WHERE seq_no = 1"),
        ("risk_level", "UPDATE ledger_entries SET risk_level = 'low' WHERE seq_no = 1"),
        (
            "context_tags",
            r#"UPDATE ledger_entries SET context_tags = '["benign"]' WHERE seq_no = 1"#,
        ),
        (
            "creator_fingerprint",
            "UPDATE ledger_entries SET creator_did = 'did:example:mallory' WHERE seq_no = 1",
        ),
        ("telemetry", "UPDATE ledger_entries SET ecg_pattern = 'stable' WHERE seq_no = 1"),
    ] {
        let snapshot = store.iterate(1, 1).unwrap().remove(0).1;
        store.__test_execute_raw_sql(sql, &[]).unwrap();

        match gate.audit().await.unwrap().status {
            AuditStatus::Broken {
                seq_no: 1,
                reason: BreakReason::FieldMismatch { field: found, .. },
            } => assert_eq!(found, field),
            other => panic!("{} rewrite went unnoticed: {:?}", field, other),
        }

        restore(&store, &snapshot);
        assert!(gate.audit().await.unwrap().status.is_intact());
    }
}

#[tokio::test]
async fn test_corrupted_ledger_reopens_halted_until_repaired() {
    let ledger = TempLedger::new();
    let genuine = {
        let store = ledger.open();
        let gate = gate_over(store.clone());
        for i in 0..3 {
            gate.dispatch(
                json!({"action": "LOG_EVENT", "n": i}),
                &creator("did:example:alice"),
                &origin("10.5.0.3"),
            )
            .await
            .unwrap();
        }
        let genuine = store.iterate(2, 1).unwrap()[0].1.previous_hash.clone();
        unlock_updates(&store);
        store
            .__test_execute_raw_sql(
                "UPDATE ledger_entries SET previous_hash = 'forged' WHERE seq_no = 2",
                &[],
            )
            .unwrap();
        genuine
    };

    let store = ledger.open();
    match store.health() {
        LedgerHealth::Corrupted {
            last_good_seq_no,
            first_bad_seq_no,
            ..
        } => {
            assert_eq!(last_good_seq_no, Some(1));
            assert_eq!(first_bad_seq_no, 2);
        }
        LedgerHealth::Ok => panic!("continuity check missed the forged link"),
    }

    let gate = gate_over(store.clone());
    assert!(gate.pipeline().is_halted());
    assert_eq!(
        gate.stats().await.unwrap().integrity_status,
        IntegrityStatus::Compromised
    );

    let err = gate
        .dispatch(json!({"action": "LOG_EVENT"}), &creator("did:example:alice"), &origin("10.5.0.3"))
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Commit(ref e) if e.kind() == ErrorKind::Integrity));

    // Acknowledgment only re-checks the newest link; the audit re-halts
    gate.acknowledge_breach().await.unwrap();
    assert!(!gate.pipeline().is_halted());
    assert!(!gate.audit().await.unwrap().status.is_intact());
    assert!(gate.pipeline().is_halted());

    unlock_updates(&store);
    store
        .__test_execute_raw_sql(
            "UPDATE ledger_entries SET previous_hash = ?1 WHERE seq_no = 2",
            &[&genuine as &dyn rusqlite::ToSql],
        )
        .unwrap();

    assert!(gate.audit().await.unwrap().status.is_intact());
    gate.acknowledge_breach().await.unwrap();
    let receipt = gate
        .dispatch(json!({"action": "LOG_EVENT", "n": 3}), &creator("did:example:alice"), &origin("10.5.0.3"))
        .await
        .unwrap();
    assert_eq!(receipt.seq_no, 4);
    assert_eq!(walk_to_genesis(&store), 4);
}

#[tokio::test]
async fn test_forged_tip_link_fails_next_commit() {
    let ledger = TempLedger::new();
    let store = ledger.open();
    let gate = gate_over(store.clone());
    for _ in 0..2 {
        let receipt = gate
            .dispatch(json!({"action": "UPDATE_PROFILE"}), &creator("did:example:alice"), &origin("10.5.0.4"))
            .await
            .unwrap();
        assert_eq!(receipt.risk_level, RiskLevel::High);
    }
    assert_eq!(
        gate.stats().await.unwrap().integrity_status,
        IntegrityStatus::Secure
    );

    unlock_updates(&store);
    store
        .__test_execute_raw_sql(
            "UPDATE ledger_entries SET previous_hash = 'forged' WHERE seq_no = 2",
            &[],
        )
        .unwrap();

    assert!(!gate.pipeline().verifier().verify_tip().await.unwrap());
    let mut events = gate.subscribe();
    let err = gate
        .dispatch(json!({"action": "UPDATE_PROFILE"}), &creator("did:example:alice"), &origin("10.5.0.4"))
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Commit(ref e) if e.kind() == ErrorKind::Integrity));
    assert_eq!(store.height().unwrap(), 2);

    let event = drain(&mut events).remove(0);
    assert_eq!(event.status, CrisisStatus::Lockdown);
    assert_eq!(event.threat_level, 100.0);
    assert!(gate.acknowledge_breach().await.is_err());
}
