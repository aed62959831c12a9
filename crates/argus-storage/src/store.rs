use anyhow::Result;
use argus_common::types::{ProbeState, RunRecord, RunStatus, SentAlert};
use chrono::{Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const PROBE_STATE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS probe_state (
    probe_id TEXT PRIMARY KEY,
    probe_json TEXT NOT NULL DEFAULT '{}',
    rule_json TEXT NOT NULL DEFAULT '{}',
    updated_at INTEGER NOT NULL
);
";

const SENT_ALERTS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sent_alerts (
    alert_id TEXT PRIMARY KEY,
    probe_id TEXT NOT NULL,
    rule_id TEXT NOT NULL,
    sent_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sent_alerts_sent_at ON sent_alerts(sent_at);
";

const COOLDOWNS_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cooldowns (
    key TEXT PRIMARY KEY,
    last_sent_at INTEGER NOT NULL
);
";

const RUN_HISTORY_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS run_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    probe_id TEXT NOT NULL,
    status TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    error_message TEXT,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_run_history_created_at ON run_history(created_at);
CREATE INDEX IF NOT EXISTS idx_run_history_probe_id ON run_history(probe_id);
";

/// Process-local persistence for probe state, dedup, cooldowns, and run
/// history. One engine instance owns the database; there is no multi-writer
/// coordination beyond WAL.
pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Opens (and migrates) the engine database under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let conn = Connection::open(data_dir.join("argus.db"))?;
        Self::init(conn)
    }

    /// An ephemeral store for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(PROBE_STATE_SCHEMA)?;
        conn.execute_batch(SENT_ALERTS_SCHEMA)?;
        conn.execute_batch(COOLDOWNS_SCHEMA)?;
        conn.execute_batch(RUN_HISTORY_SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the database connection, recovering from a poisoned Mutex if necessary.
    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ---- probe state ----

    /// Loads a probe's persisted state, or an empty state when the probe has
    /// never run. Absence is not an error.
    pub fn load_probe_state(&self, probe_id: &str) -> Result<ProbeState> {
        let conn = self.lock_conn();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT probe_json, rule_json FROM probe_state WHERE probe_id = ?1",
                [probe_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((probe_json, rule_json)) = row else {
            return Ok(ProbeState::default());
        };

        Ok(ProbeState {
            probe: serde_json::from_str(&probe_json).unwrap_or_default(),
            rule: serde_json::from_str(&rule_json).unwrap_or_default(),
        })
    }

    /// Upserts both state namespaces as opaque JSON blobs and stamps
    /// `updated_at`.
    pub fn save_probe_state(&self, probe_id: &str, state: &ProbeState) -> Result<()> {
        let probe_json = serde_json::to_string(&state.probe)?;
        let rule_json = serde_json::to_string(&state.rule)?;
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO probe_state (probe_id, probe_json, rule_json, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(probe_id) DO UPDATE SET
                 probe_json = excluded.probe_json,
                 rule_json = excluded.rule_json,
                 updated_at = excluded.updated_at",
            rusqlite::params![probe_id, probe_json, rule_json, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    // ---- dedup ----

    /// True iff the alert id has been recorded as sent, and (when a TTL is
    /// given) the record is younger than the TTL. Without a TTL, dedup is
    /// permanent until operator cleanup.
    pub fn is_alert_sent(&self, alert_id: &str, ttl: Option<Duration>) -> Result<bool> {
        let conn = self.lock_conn();
        let sent_at: Option<i64> = conn
            .query_row(
                "SELECT sent_at FROM sent_alerts WHERE alert_id = ?1",
                [alert_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(sent_at) = sent_at else {
            return Ok(false);
        };
        match ttl {
            Some(ttl) => {
                Ok(Utc::now().timestamp_millis() - sent_at < ttl.num_milliseconds())
            }
            None => Ok(true),
        }
    }

    /// Insert-or-ignore: recording the same alert id twice is a silent no-op
    /// and leaves the original `sent_at` untouched.
    pub fn record_alert(&self, alert_id: &str, probe_id: &str, rule_id: &str) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT OR IGNORE INTO sent_alerts (alert_id, probe_id, rule_id, sent_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![alert_id, probe_id, rule_id, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    // ---- cooldowns ----

    pub fn is_in_cooldown(&self, key: &str, window: Duration) -> Result<bool> {
        let conn = self.lock_conn();
        let last_sent_at: Option<i64> = conn
            .query_row(
                "SELECT last_sent_at FROM cooldowns WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(last_sent_at.is_some_and(|last| {
            Utc::now().timestamp_millis() - last < window.num_milliseconds()
        }))
    }

    pub fn record_cooldown(&self, key: &str) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO cooldowns (key, last_sent_at) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET last_sent_at = excluded.last_sent_at",
            rusqlite::params![key, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    // ---- run history ----

    pub fn record_run(
        &self,
        probe_id: &str,
        status: RunStatus,
        duration_ms: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO run_history (probe_id, status, duration_ms, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                probe_id,
                status.to_string(),
                duration_ms,
                error_message,
                Utc::now().timestamp_millis()
            ],
        )?;
        Ok(())
    }

    // ---- inspection views ----

    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<SentAlert>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(
            "SELECT alert_id, probe_id, rule_id, sent_at FROM sent_alerts
             ORDER BY sent_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut alerts = Vec::new();
        for row in rows {
            let (alert_id, probe_id, rule_id, sent_at) = row?;
            alerts.push(SentAlert {
                alert_id,
                probe_id,
                rule_id,
                sent_at: argus_common::time::from_millis(sent_at),
            });
        }
        Ok(alerts)
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        self.query_runs(
            "SELECT id, probe_id, status, duration_ms, error_message, created_at
             FROM run_history ORDER BY id DESC LIMIT ?1",
            rusqlite::params![limit as i64],
        )
    }

    pub fn runs_for_probe(&self, probe_id: &str, limit: usize) -> Result<Vec<RunRecord>> {
        self.query_runs(
            "SELECT id, probe_id, status, duration_ms, error_message, created_at
             FROM run_history WHERE probe_id = ?1 ORDER BY id DESC LIMIT ?2",
            rusqlite::params![probe_id, limit as i64],
        )
    }

    fn query_runs(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::types::ToSql],
    ) -> Result<Vec<RunRecord>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, probe_id, status, duration_ms, error_message, created_at) = row?;
            records.push(RunRecord {
                id,
                probe_id,
                status: status.parse().unwrap_or(RunStatus::Error),
                duration_ms,
                error_message,
                created_at: argus_common::time::from_millis(created_at),
            });
        }
        Ok(records)
    }

    // ---- retention ----

    /// Removes run-history rows older than `older_than`. Returns the number
    /// of rows deleted.
    pub fn prune_run_history(&self, older_than: Duration) -> Result<u32> {
        let cutoff = Utc::now().timestamp_millis() - older_than.num_milliseconds();
        let conn = self.lock_conn();
        let deleted = conn.execute(
            "DELETE FROM run_history WHERE created_at < ?1",
            [cutoff],
        )?;
        Ok(deleted as u32)
    }

    /// Removes dedup records older than `older_than`, re-arming those alert
    /// ids. Cooldown rows age out the same way.
    pub fn prune_sent_alerts(&self, older_than: Duration) -> Result<u32> {
        let cutoff = Utc::now().timestamp_millis() - older_than.num_milliseconds();
        let conn = self.lock_conn();
        let mut deleted = conn.execute(
            "DELETE FROM sent_alerts WHERE sent_at < ?1",
            [cutoff],
        )?;
        deleted += conn.execute(
            "DELETE FROM cooldowns WHERE last_sent_at < ?1",
            [cutoff],
        )?;
        Ok(deleted as u32)
    }
}
