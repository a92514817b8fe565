//! End-to-end tests for the sovereign ledger
//!
//! This suite drives [`sovledger_gate::SovereignGate`] over file-backed
//! SQLite ledgers and checks:
//! - chain integrity under random and concurrent commits
//! - tamper detection after raw storage mutation, including across restarts
//! - crisis escalation from reputation, identity and persistence failures

pub mod test_utils;

#[cfg(test)]
mod chain_integrity_tests;

#[cfg(test)]
mod crisis_escalation_tests;

#[cfg(test)]
mod tamper_detection_tests;
