//! Chain integrity under random and concurrent commits

use crate::test_utils::*;
use proptest::prelude::*;
use serde_json::json;
use sovledger_core::entry::GENESIS_HASH;
use sovledger_core::ledger::{LedgerStore, SqliteLedgerStore};
use sovledger_gate::{ErrorKind, GateError, IntegrityStatus};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Commit { action: String, value: i64 },
    Invalid,
    PrivilegedByNonRoot,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => ("[A-Z][A-Z0-9_]{0,15}", any::<i64>())
            .prop_map(|(action, value)| Op::Commit { action, value }),
        1 => Just(Op::Invalid),
        1 => Just(Op::PrivilegedByNonRoot),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_accepted_commits_form_one_chain(ops in prop::collection::vec(op_strategy(), 1..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let store = Arc::new(SqliteLedgerStore::open_in_memory().unwrap());
            let gate = gate_over(store.clone());
            let mut expected_previous = GENESIS_HASH.to_string();
            let mut accepted = 0u64;

            for (i, op) in ops.iter().enumerate() {
                // One origin per op keeps reputation out of the way
                let profile = origin(&format!("10.0.{}.{}", i / 250, i % 250));
                let result = match op {
                    Op::Commit { action, value } => {
                        gate.dispatch(
                            json!({"action": action, "value": value}),
                            &creator("did:example:alice"),
                            &profile,
                        )
                        .await
                    }
                    Op::Invalid => {
                        gate.dispatch(json!({"value": 1}), &creator("did:example:alice"), &profile)
                            .await
                    }
                    Op::PrivilegedByNonRoot => {
                        gate.ingest_burst(&creator("did:example:mallory"), &profile, b"burst")
                            .await
                    }
                };

                match (op, result) {
                    (Op::Commit { .. }, Ok(receipt)) => {
                        accepted += 1;
                        assert_eq!(receipt.seq_no, accepted);
                        assert_eq!(receipt.previous_hash, expected_previous);
                        expected_previous = receipt.integrity_hash;
                    }
                    (Op::Invalid, Err(GateError::Commit(e))) => {
                        assert_eq!(e.kind(), ErrorKind::Validation);
                    }
                    (Op::PrivilegedByNonRoot, Err(GateError::Commit(e))) => {
                        assert_eq!(e.kind(), ErrorKind::Identity);
                    }
                    (op, other) => panic!("unexpected outcome for {op:?}: {other:?}"),
                }
            }

            let stats = gate.stats().await.unwrap();
            assert_eq!(stats.ledger_height, accepted);
            assert_eq!(stats.last_hash, expected_previous);
            assert_eq!(stats.integrity_status, IntegrityStatus::Secure);

            let report = gate.audit().await.unwrap();
            assert!(report.status.is_intact());
            assert_eq!(report.entries_checked, accepted);
        });
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_commits_never_fork() {
    init_tracing();
    let ledger = TempLedger::new();
    let store = ledger.open();
    let gate = Arc::new(gate_over(store.clone()));

    let mut handles = Vec::new();
    for i in 0..50 {
        let gate = gate.clone();
        handles.push(tokio::spawn(async move {
            gate.dispatch(
                json!({"action": "RECORD_READING", "sensor": i}),
                &creator("did:example:sensor"),
                &origin(&format!("10.1.0.{i}")),
            )
            .await
        }));
    }

    let mut seq_nos = HashSet::new();
    let mut parents = HashSet::new();
    for handle in handles {
        let receipt = handle.await.unwrap().unwrap();
        assert!(seq_nos.insert(receipt.seq_no));
        assert!(parents.insert(receipt.previous_hash));
    }

    assert_eq!(seq_nos.len(), 50);
    assert_eq!(store.height().unwrap(), 50);
    assert_eq!(walk_to_genesis(&store), 50);

    let report = gate.audit().await.unwrap();
    assert!(report.status.is_intact());
    assert_eq!(report.entries_checked, 50);
}

#[tokio::test]
async fn test_chain_survives_restart() {
    let ledger = TempLedger::new();
    let first_tip = {
        let gate = gate_over(ledger.open());
        for i in 0..3 {
            gate.dispatch(
                json!({"action": "LOG_EVENT", "n": i}),
                &creator("did:example:alice"),
                &origin("10.2.0.1"),
            )
            .await
            .unwrap();
        }
        gate.stats().await.unwrap().last_hash
    };

    let store = ledger.open();
    assert!(store.health().is_ok());
    let gate = gate_over(store.clone());
    let receipt = gate
        .dispatch(
            json!({"action": "LOG_EVENT", "n": 3}),
            &creator("did:example:alice"),
            &origin("10.2.0.1"),
        )
        .await
        .unwrap();

    assert_eq!(receipt.seq_no, 4);
    assert_eq!(receipt.previous_hash, first_tip);
    assert_eq!(walk_to_genesis(&store), 4);
}
