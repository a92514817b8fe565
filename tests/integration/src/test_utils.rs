//! Fixtures shared by the integration tests

use sovledger_core::config::Config;
use sovledger_core::entry::{ChainHead, LedgerEntry, GENESIS_HASH};
use sovledger_core::event::CrisisEvent;
use sovledger_core::ledger::{LedgerStore, Result as StoreResult, SqliteLedgerStore, StoreError};
use sovledger_gate::{AssuranceLevel, CallerContext, CallerProfile, SovereignGate};
use sovledger_sentinel::MemoryCounterStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::Receiver;
use uuid::Uuid;

pub const ROOT_DID: &str = "did:example:root";

/// Install a test subscriber once; honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// SQLite ledger file removed (with its WAL siblings) on drop
pub struct TempLedger {
    path: PathBuf,
}

impl TempLedger {
    pub fn new() -> Self {
        let path = std::env::temp_dir().join(format!("sovledger-it-{}.db", Uuid::new_v4()));
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open(&self) -> Arc<SqliteLedgerStore> {
        Arc::new(SqliteLedgerStore::open(&self.path, Duration::from_secs(5)).unwrap())
    }
}

impl Default for TempLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TempLedger {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        for suffix in ["-wal", "-shm"] {
            let mut sibling = self.path.clone().into_os_string();
            sibling.push(suffix);
            let _ = std::fs::remove_file(sibling);
        }
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default_config();
    config.identity.root_did = ROOT_DID.to_string();
    config
}

pub fn gate_over(store: Arc<dyn LedgerStore>) -> SovereignGate {
    gate_with(&test_config(), store)
}

pub fn gate_with(config: &Config, store: Arc<dyn LedgerStore>) -> SovereignGate {
    SovereignGate::from_config(config, store, Arc::new(MemoryCounterStore::new()))
}

pub fn creator(did: &str) -> CallerContext {
    CallerContext::new(did, "ed25519:public-key-material", "s".repeat(64))
}

pub fn root_creator() -> CallerContext {
    creator(ROOT_DID).with_assurance(AssuranceLevel::High)
}

pub fn origin(ip: &str) -> CallerProfile {
    CallerProfile::from_origin(ip).with_trace_id(Uuid::new_v4().to_string())
}

pub fn drain(rx: &mut Receiver<CrisisEvent>) -> Vec<CrisisEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Walk parent links from the tip back to genesis; returns the number of hops.
pub fn walk_to_genesis(store: &SqliteLedgerStore) -> u64 {
    let mut hash = store.head().unwrap().hash;
    let mut hops = 0;
    while hash != GENESIS_HASH {
        let (_, entry) = store
            .get_by_hash(&hash)
            .unwrap()
            .unwrap_or_else(|| panic!("dangling link {hash}"));
        hash = entry.previous_hash;
        hops += 1;
    }
    hops
}

/// Delegates reads, fails every append as a full disk would
pub struct FailingAppends(pub Arc<SqliteLedgerStore>);

impl LedgerStore for FailingAppends {
    fn head(&self) -> StoreResult<ChainHead> {
        self.0.head()
    }

    fn append(&self, _: &ChainHead, _: &LedgerEntry, _: Instant) -> StoreResult<u64> {
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "No space left on device",
        )))
    }

    fn recent(&self, limit: usize) -> StoreResult<Vec<(u64, LedgerEntry)>> {
        self.0.recent(limit)
    }

    fn iterate(&self, from_seq_no: u64, limit: usize) -> StoreResult<Vec<(u64, LedgerEntry)>> {
        self.0.iterate(from_seq_no, limit)
    }

    fn get_by_id(&self, id: &Uuid) -> StoreResult<Option<(u64, LedgerEntry)>> {
        self.0.get_by_id(id)
    }

    fn get_by_hash(&self, hash: &str) -> StoreResult<Option<(u64, LedgerEntry)>> {
        self.0.get_by_hash(hash)
    }

    fn get_by_canonical_id(&self, canonical_id: &str) -> StoreResult<Option<(u64, LedgerEntry)>> {
        self.0.get_by_canonical_id(canonical_id)
    }
}
