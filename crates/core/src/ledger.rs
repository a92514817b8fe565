//! Ledger storage - durable, append-only entry store.
//!
//! This module provides the [`LedgerStore`] port the commit pipeline writes
//! through, and [`SqliteLedgerStore`], its SQLite adapter:
//! - WAL journal with `synchronous=NORMAL` for durability
//! - Strict append-only semantics enforced by triggers
//! - Conditional appends against an explicit [`ChainHead`]
//! - UNIQUE `previous_hash`, so the chain can never fork
//! - Startup continuity check recorded as [`LedgerHealth`]
//!
//! # Guarantees
//!
//! - Strict ordering: `seq_no` increases by 1 for each entry
//! - Chain continuity: an append only lands if the tip it was computed
//!   against is still the tip
//! - Append-only: no in-place updates or deletes are accepted

use crate::audit::ChainWalker;
use crate::entry::{ChainHead, CreatorIdentity, LedgerEntry};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, ErrorCode, OpenFlags, OptionalExtension, Row, TransactionBehavior,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Rows fetched per batch while walking the chain
const SCAN_BATCH: usize = 512;

const SELECT_COLUMNS: &str = r#"
    SELECT seq_no, id, canonical_id, action_type,
           creator_did, creator_pubkey, creator_signature, creator_fingerprint,
           integrity_hash, previous_hash, risk_level, verification_level,
           payload, context_tags, created_at_us, salt,
           quantum_signature, device_id, session_id, network_origin, verified_by_root,
           telemetry_data, ecg_intensity, ecg_entropy, ecg_pattern
    FROM ledger_entries
"#;

/// Ledger health status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerHealth {
    /// Ledger is healthy
    Ok,
    /// Ledger is corrupted
    Corrupted {
        /// Last good sequence number
        last_good_seq_no: Option<u64>,
        /// First failing sequence number
        first_bad_seq_no: u64,
        /// Error type description
        error_type: String,
    },
}

impl LedgerHealth {
    /// Check if the ledger is healthy
    pub fn is_ok(&self) -> bool {
        matches!(self, LedgerHealth::Ok)
    }
}

/// Errors that can occur in ledger storage
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The tip changed between the read and the conditional append
    #[error("Chain head moved: expected {expected}, found {actual}")]
    HeadMoved { expected: String, actual: String },

    /// A unique identifier or digest already exists
    #[error("Duplicate value: {0}")]
    Collision(String),

    #[error("Ledger operation timed out")]
    Timeout,

    #[error("Ledger lock poisoned")]
    Poisoned,

    /// Stored or submitted data violates the chain rules
    #[error("Ledger corrupted: {0}")]
    Corrupt(String),

    /// The blocking task running the operation did not complete
    #[error("Ledger operation interrupted: {0}")]
    Interrupted(String),

    /// Every append attempt lost the race for the tip
    #[error("Append abandoned after {attempts} contended attempts")]
    Contention { attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// True for errors caused by a row the store could not decode
    pub fn is_unreadable_row(&self) -> bool {
        matches!(
            self,
            StoreError::Database(rusqlite::Error::FromSqlConversionFailure(..))
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable, append-only storage for ledger entries
///
/// Implementations are blocking; async callers run them on the blocking pool.
pub trait LedgerStore: Send + Sync {
    /// Current tip of the chain
    fn head(&self) -> Result<ChainHead>;

    /// Append `entry` only if the tip still equals `expected`.
    ///
    /// Returns the assigned sequence number. Fails with
    /// [`StoreError::HeadMoved`] when another writer got there first and with
    /// [`StoreError::Timeout`] when `deadline` passed before the write began.
    fn append(&self, expected: &ChainHead, entry: &LedgerEntry, deadline: Instant) -> Result<u64>;

    /// Newest entries first
    fn recent(&self, limit: usize) -> Result<Vec<(u64, LedgerEntry)>>;

    /// Entries in commit order starting at `from_seq_no` (inclusive)
    fn iterate(&self, from_seq_no: u64, limit: usize) -> Result<Vec<(u64, LedgerEntry)>>;

    fn get_by_id(&self, id: &Uuid) -> Result<Option<(u64, LedgerEntry)>>;

    fn get_by_hash(&self, integrity_hash: &str) -> Result<Option<(u64, LedgerEntry)>>;

    fn get_by_canonical_id(&self, canonical_id: &str) -> Result<Option<(u64, LedgerEntry)>>;

    /// Number of committed entries
    fn height(&self) -> Result<u64> {
        Ok(self.head()?.height)
    }

    /// Health recorded when the store was opened
    fn health(&self) -> LedgerHealth {
        LedgerHealth::Ok
    }
}

/// SQLite-backed ledger store
pub struct SqliteLedgerStore {
    conn: Mutex<Connection>,
    health: Mutex<LedgerHealth>,
    path: Option<PathBuf>,
}

impl SqliteLedgerStore {
    /// Create or open a ledger at the specified path
    ///
    /// # Arguments
    /// * `path` - Path to the SQLite database file
    /// * `busy_timeout` - How long a writer waits on a lock held elsewhere
    ///
    /// A corrupted chain does not prevent opening; the result of the
    /// continuity check is available through [`LedgerStore::health`].
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref();

        info!(path = %path.display(), "Opening ledger store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(busy_timeout)?;

        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory ledger
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            health: Mutex::new(LedgerHealth::Ok),
            path,
        };

        store.startup_continuity_check()?;
        Ok(store)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_entries (
                seq_no INTEGER PRIMARY KEY,
                id TEXT NOT NULL UNIQUE,
                canonical_id TEXT NOT NULL UNIQUE,
                action_type TEXT NOT NULL,
                creator_did TEXT NOT NULL,
                creator_pubkey TEXT NOT NULL,
                creator_signature TEXT NOT NULL,
                creator_fingerprint TEXT NOT NULL,
                integrity_hash TEXT NOT NULL UNIQUE,
                previous_hash TEXT NOT NULL UNIQUE,
                risk_level TEXT NOT NULL,
                verification_level TEXT NOT NULL,
                payload TEXT NOT NULL,
                context_tags TEXT NOT NULL,
                created_at_us INTEGER NOT NULL,
                salt TEXT NOT NULL,
                quantum_signature TEXT,
                device_id TEXT,
                session_id TEXT,
                network_origin TEXT,
                verified_by_root INTEGER NOT NULL DEFAULT 0,
                telemetry_data TEXT NOT NULL DEFAULT '{}',
                ecg_intensity REAL NOT NULL DEFAULT 0,
                ecg_entropy REAL NOT NULL DEFAULT 0,
                ecg_pattern TEXT NOT NULL DEFAULT 'stable'
            );

            CREATE INDEX IF NOT EXISTS idx_ledger_created_at ON ledger_entries(created_at_us);
            CREATE INDEX IF NOT EXISTS idx_ledger_creator ON ledger_entries(creator_did);

            CREATE TRIGGER IF NOT EXISTS ledger_entries_no_update
            BEFORE UPDATE ON ledger_entries
            BEGIN
                SELECT RAISE(ABORT, 'ledger entries are append-only');
            END;

            CREATE TRIGGER IF NOT EXISTS ledger_entries_no_delete
            BEFORE DELETE ON ledger_entries
            BEGIN
                SELECT RAISE(ABORT, 'ledger entries are append-only');
            END;
            "#,
        )?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn head_internal(conn: &Connection) -> Result<ChainHead> {
        let tip = conn
            .query_row(
                "SELECT seq_no, integrity_hash, created_at_us FROM ledger_entries
                 ORDER BY seq_no DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)? as u64,
                        row.get::<_, String>(1)?,
                        micros_to_datetime(row.get(2)?, 2)?,
                    ))
                },
            )
            .optional()?;

        Ok(match tip {
            Some((height, hash, created_at)) => ChainHead {
                height,
                hash,
                created_at: Some(created_at),
            },
            None => ChainHead::genesis(),
        })
    }

    fn query_one(&self, clause: &str, key: &str) -> Result<Option<(u64, LedgerEntry)>> {
        let conn = self.lock()?;
        let sql = format!("{} WHERE {} = ?1", SELECT_COLUMNS, clause);
        let mut stmt = conn.prepare(&sql)?;
        Ok(stmt.query_row([key], row_to_entry).optional()?)
    }

    /// Perform startup continuity check
    ///
    /// Verifies sequence continuity and hash linkage across the whole chain
    /// and records the outcome. Only database failures are returned as
    /// errors; a broken chain is reported through the returned health.
    pub fn startup_continuity_check(&self) -> Result<LedgerHealth> {
        info!("Starting ledger continuity check");

        let mut walker = ChainWalker::new(false);
        let mut next = 1u64;

        let health = 'scan: loop {
            let batch = match self.iterate(next, SCAN_BATCH) {
                Ok(batch) => batch,
                Err(e) if e.is_unreadable_row() => {
                    break 'scan LedgerHealth::Corrupted {
                        last_good_seq_no: walker.last_good_seq_no(),
                        first_bad_seq_no: walker.last_good_seq_no().map_or(1, |s| s + 1),
                        error_type: e.to_string(),
                    };
                }
                Err(e) => return Err(e),
            };

            let done = batch.len() < SCAN_BATCH;
            for (seq_no, entry) in &batch {
                if let Err(reason) = walker.push(*seq_no, entry) {
                    break 'scan LedgerHealth::Corrupted {
                        last_good_seq_no: walker.last_good_seq_no(),
                        first_bad_seq_no: *seq_no,
                        error_type: reason.description(),
                    };
                }
                next = seq_no + 1;
            }

            if done {
                break LedgerHealth::Ok;
            }
        };

        match &health {
            LedgerHealth::Ok => info!(
                entry_count = walker.checked(),
                "Ledger continuity check passed"
            ),
            LedgerHealth::Corrupted {
                first_bad_seq_no,
                error_type,
                ..
            } => error!(
                seq_no = first_bad_seq_no,
                error_type = %error_type,
                "Ledger corruption detected"
            ),
        }

        *self.health.lock().map_err(|_| StoreError::Poisoned)? = health.clone();
        Ok(health)
    }

    /// Get the database path, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Execute raw SQL for testing purposes only
    ///
    /// **WARNING**: This bypasses every ledger rule and exists only so tests
    /// can simulate tampering. Do NOT use in production code.
    #[doc(hidden)]
    pub fn __test_execute_raw_sql(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<usize> {
        Ok(self.lock()?.execute(sql, params)?)
    }
}

impl LedgerStore for SqliteLedgerStore {
    fn head(&self) -> Result<ChainHead> {
        let conn = self.lock()?;
        Self::head_internal(&conn)
    }

    fn append(&self, expected: &ChainHead, entry: &LedgerEntry, deadline: Instant) -> Result<u64> {
        if Instant::now() >= deadline {
            return Err(StoreError::Timeout);
        }

        let mut conn = self.lock()?;
        if Instant::now() >= deadline {
            return Err(StoreError::Timeout);
        }

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_busy)?;

        let current = Self::head_internal(&tx)?;
        if current.height != expected.height || current.hash != expected.hash {
            debug!(
                expected = %expected.hash,
                actual = %current.hash,
                "Chain head moved before append"
            );
            return Err(StoreError::HeadMoved {
                expected: expected.hash.clone(),
                actual: current.hash,
            });
        }

        if entry.previous_hash != expected.hash {
            warn!(
                entry_id = %entry.id,
                "Rejected entry not linked to the expected head"
            );
            return Err(StoreError::Corrupt(format!(
                "entry links to {} but the head is {}",
                entry.previous_hash, expected.hash
            )));
        }

        let seq_no = expected.height + 1;
        let payload = serde_json::to_string(&entry.payload)?;
        let tags = serde_json::to_string(&entry.context_tags)?;
        let telemetry = serde_json::to_string(&entry.telemetry_data)?;

        tx.execute(
            r#"
            INSERT INTO ledger_entries (
                seq_no, id, canonical_id, action_type,
                creator_did, creator_pubkey, creator_signature, creator_fingerprint,
                integrity_hash, previous_hash, risk_level, verification_level,
                payload, context_tags, created_at_us, salt,
                quantum_signature, device_id, session_id, network_origin, verified_by_root,
                telemetry_data, ecg_intensity, ecg_entropy, ecg_pattern
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                      ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)
            "#,
            params![
                seq_no as i64,
                entry.id.to_string(),
                entry.canonical_id,
                entry.action_type,
                entry.creator.did,
                entry.creator.pubkey,
                entry.creator.signature,
                entry.creator.fingerprint,
                entry.integrity_hash,
                entry.previous_hash,
                entry.risk_level.as_str(),
                entry.verification_level.as_str(),
                payload,
                tags,
                entry.created_at.timestamp_micros(),
                entry.salt,
                entry.quantum_signature,
                entry.device_id,
                entry.session_id,
                entry.network_origin,
                entry.verified_by_root,
                telemetry,
                entry.ecg_intensity,
                entry.ecg_entropy,
                entry.ecg_pattern,
            ],
        )
        .map_err(|e| map_insert_error(e, expected))?;

        tx.commit().map_err(map_busy)?;

        debug!(
            seq_no = seq_no,
            entry_id = %entry.id,
            action = %entry.action_type,
            "Entry appended to ledger"
        );

        Ok(seq_no)
    }

    fn recent(&self, limit: usize) -> Result<Vec<(u64, LedgerEntry)>> {
        let conn = self.lock()?;
        let sql = format!("{} ORDER BY seq_no DESC LIMIT ?1", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map([limit as i64], row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn iterate(&self, from_seq_no: u64, limit: usize) -> Result<Vec<(u64, LedgerEntry)>> {
        let conn = self.lock()?;
        let sql = format!(
            "{} WHERE seq_no >= ?1 ORDER BY seq_no ASC LIMIT ?2",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![from_seq_no as i64, limit as i64], row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn get_by_id(&self, id: &Uuid) -> Result<Option<(u64, LedgerEntry)>> {
        self.query_one("id", &id.to_string())
    }

    fn get_by_hash(&self, integrity_hash: &str) -> Result<Option<(u64, LedgerEntry)>> {
        self.query_one("integrity_hash", integrity_hash)
    }

    fn get_by_canonical_id(&self, canonical_id: &str) -> Result<Option<(u64, LedgerEntry)>> {
        self.query_one("canonical_id", canonical_id)
    }

    fn health(&self) -> LedgerHealth {
        match self.health.lock() {
            Ok(health) => health.clone(),
            Err(_) => LedgerHealth::Corrupted {
                last_good_seq_no: None,
                first_bad_seq_no: 0,
                error_type: "health lock poisoned".to_string(),
            },
        }
    }
}

fn conversion_error(
    idx: usize,
    ty: Type,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn micros_to_datetime(micros: i64, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        conversion_error(
            idx,
            Type::Integer,
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("timestamp out of range: {}", micros),
            ),
        )
    })
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<(u64, LedgerEntry)> {
    let seq_no = row.get::<_, i64>(0)? as u64;

    let id: String = row.get(1)?;
    let id = Uuid::parse_str(&id).map_err(|e| conversion_error(1, Type::Text, e))?;

    let risk: String = row.get(10)?;
    let verification: String = row.get(11)?;
    let payload: String = row.get(12)?;
    let tags: String = row.get(13)?;
    let telemetry: String = row.get(21)?;

    let entry = LedgerEntry {
        id,
        canonical_id: row.get(2)?,
        action_type: row.get(3)?,
        creator: CreatorIdentity {
            did: row.get(4)?,
            pubkey: row.get(5)?,
            signature: row.get(6)?,
            fingerprint: row.get(7)?,
        },
        integrity_hash: row.get(8)?,
        previous_hash: row.get(9)?,
        risk_level: risk
            .parse()
            .map_err(|e| conversion_error(10, Type::Text, e))?,
        verification_level: verification
            .parse()
            .map_err(|e| conversion_error(11, Type::Text, e))?,
        payload: serde_json::from_str(&payload).map_err(|e| conversion_error(12, Type::Text, e))?,
        context_tags: serde_json::from_str(&tags)
            .map_err(|e| conversion_error(13, Type::Text, e))?,
        created_at: micros_to_datetime(row.get(14)?, 14)?,
        salt: row.get(15)?,
        quantum_signature: row.get(16)?,
        device_id: row.get(17)?,
        session_id: row.get(18)?,
        network_origin: row.get(19)?,
        verified_by_root: row.get(20)?,
        telemetry_data: serde_json::from_str(&telemetry)
            .map_err(|e| conversion_error(21, Type::Text, e))?,
        ecg_intensity: row.get(22)?,
        ecg_entropy: row.get(23)?,
        ecg_pattern: row.get(24)?,
    };

    Ok((seq_no, entry))
}

fn map_busy(err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => StoreError::Timeout,
        _ => StoreError::Database(err),
    }
}

fn map_insert_error(err: rusqlite::Error, expected: &ChainHead) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        if failure.code == ErrorCode::ConstraintViolation {
            let message = message.clone().unwrap_or_default();
            // A second child of the same tip, or a second entry at the same position
            if message.contains("previous_hash") || message.contains("seq_no") {
                return StoreError::HeadMoved {
                    expected: expected.hash.clone(),
                    actual: "a concurrent entry".to_string(),
                };
            }
            if message.contains("UNIQUE") {
                return StoreError::Collision(message);
            }
        }
    }
    map_busy(err)
}
