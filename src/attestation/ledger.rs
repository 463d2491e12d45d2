//! Ledger gate (C6, half two): a single writer task owns the sqlite
//! connection; every other task reaches it over an `mpsc` channel, the
//! same "message-passing to a single writer" shape the persistence
//! design calls for. Readers open their own read-only connections —
//! WAL mode allows that to run concurrently with the writer.

use std::path::Path;

use chrono::Utc;
use rusqlite::Connection;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::model::{LedgerEvent, LedgerEventClass};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("ledger writer task is no longer running")]
    WriterGone,
}

/// Handle cloned into every request task. `record` never blocks on
/// durability — it only blocks on the channel having capacity.
#[derive(Clone)]
pub struct LedgerWriter {
    tx: mpsc::UnboundedSender<LedgerEvent>,
}

impl LedgerWriter {
    /// Always enqueues a telemetry event. Enqueues a second, behavioral
    /// event only when `reproducible` holds — ungated behavioral writes
    /// would let non-reproducible signal pollute future ranking.
    pub fn record(
        &self,
        request_id: Uuid,
        attempt: u32,
        from_state: &str,
        to_state: &str,
        payload: serde_json::Value,
        reproducible: bool,
    ) -> Result<(), LedgerError> {
        let telemetry = LedgerEvent {
            request_id,
            attempt,
            class: LedgerEventClass::Telemetry,
            from_state: from_state.to_string(),
            to_state: to_state.to_string(),
            recorded_at: Utc::now(),
            payload: payload.clone(),
        };
        self.tx.send(telemetry).map_err(|_| LedgerError::WriterGone)?;

        if reproducible {
            let behavioral = LedgerEvent {
                request_id,
                attempt,
                class: LedgerEventClass::Behavioral,
                from_state: from_state.to_string(),
                to_state: to_state.to_string(),
                recorded_at: Utc::now(),
                payload,
            };
            self.tx.send(behavioral).map_err(|_| LedgerError::WriterGone)?;
        }
        Ok(())
    }
}

/// Spawns the single writer task and returns a cloneable handle to it.
pub fn spawn(db_path: &Path) -> Result<(LedgerWriter, JoinHandle<()>), LedgerError> {
    let conn = Connection::open(db_path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ledger_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id TEXT NOT NULL,
            attempt INTEGER NOT NULL,
            class TEXT NOT NULL,
            from_state TEXT NOT NULL,
            to_state TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            payload TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fingerprints (
            repo_root TEXT PRIMARY KEY,
            fingerprint_hash TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        )",
        [],
    )?;

    let (tx, mut rx) = mpsc::unbounded_channel::<LedgerEvent>();

    let handle = tokio::task::spawn_blocking(move || {
        while let Some(event) = rx.blocking_recv() {
            if let Err(e) = insert(&conn, &event) {
                tracing::error!(
                    target: "dhi::ledger_write_failed",
                    request_id = %event.request_id,
                    error = %e,
                    "ledger write failed, verified-but-unrecorded run"
                );
            }
        }
    });

    Ok((LedgerWriter { tx }, handle))
}

fn insert(conn: &Connection, event: &LedgerEvent) -> Result<(), LedgerError> {
    let class = match event.class {
        LedgerEventClass::Telemetry => "telemetry",
        LedgerEventClass::Behavioral => "behavioral",
    };
    conn.execute(
        "INSERT INTO ledger_events (request_id, attempt, class, from_state, to_state, recorded_at, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            event.request_id.to_string(),
            event.attempt,
            class,
            event.from_state,
            event.to_state,
            event.recorded_at.to_rfc3339(),
            serde_json::to_string(&event.payload)?,
        ],
    )?;
    Ok(())
}

/// Records (or overwrites) the baseline fingerprint for a project root.
pub fn record_baseline_fingerprint(
    conn: &Connection,
    repo_root: &str,
    fingerprint_hash: &str,
) -> Result<(), LedgerError> {
    conn.execute(
        "INSERT INTO fingerprints (repo_root, fingerprint_hash, recorded_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(repo_root) DO UPDATE SET fingerprint_hash = excluded.fingerprint_hash, recorded_at = excluded.recorded_at",
        rusqlite::params![repo_root, fingerprint_hash, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn read_baseline_fingerprint(conn: &Connection, repo_root: &str) -> Result<Option<String>, LedgerError> {
    let mut stmt = conn.prepare("SELECT fingerprint_hash FROM fingerprints WHERE repo_root = ?1")?;
    let mut rows = stmt.query(rusqlite::params![repo_root])?;
    if let Some(row) = rows.next()? {
        Ok(Some(row.get(0)?))
    } else {
        Ok(None)
    }
}
