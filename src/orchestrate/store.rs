//! Persistent run store: SQLite-shaped 5-table schema (§6), upsert
//! semantics on primary-key collision.

use crate::error::{DiscoveryError, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl RunStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Canceled => "canceled",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "running" => RunStatus::Running,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "canceled" => RunStatus::Canceled,
            _ => RunStatus::Queued,
        }
    }
}

pub struct RunStore {
    conn: Connection,
}

impl RunStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| DiscoveryError::Internal(e.to_string()))?;
        conn.execute_batch(SCHEMA).map_err(|e| DiscoveryError::Internal(e.to_string()))?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| DiscoveryError::Internal(e.to_string()))?;
        conn.execute_batch(SCHEMA).map_err(|e| DiscoveryError::Internal(e.to_string()))?;
        Ok(Self { conn })
    }

    pub fn upsert_run(&self, run_id: &str, status: RunStatus, stage: &str, progress: f64, config_json: &str, config_hash: u64, error: Option<&str>) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO runs (run_id, status, stage, progress, created_at, updated_at, config_json, config_hash, error)
                 VALUES (?1, ?2, ?3, ?4, strftime('%s','now'), strftime('%s','now'), ?5, ?6, ?7)
                 ON CONFLICT(run_id) DO UPDATE SET
                    status=excluded.status, stage=excluded.stage, progress=excluded.progress,
                    updated_at=excluded.updated_at, error=excluded.error",
                params![run_id, status.as_str(), stage, progress, config_json, config_hash as i64, error],
            )
            .map_err(|e| DiscoveryError::Internal(e.to_string()))?;
        Ok(())
    }

    pub fn run_status(&self, run_id: &str) -> Result<Option<RunStatus>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status FROM runs WHERE run_id = ?1")
            .map_err(|e| DiscoveryError::Internal(e.to_string()))?;
        let mut rows = stmt.query(params![run_id]).map_err(|e| DiscoveryError::Internal(e.to_string()))?;
        match rows.next().map_err(|e| DiscoveryError::Internal(e.to_string()))? {
            Some(row) => {
                let status: String = row.get(0).map_err(|e| DiscoveryError::Internal(e.to_string()))?;
                Ok(Some(RunStatus::parse(&status)))
            }
            None => Ok(None),
        }
    }

    pub fn append_log(&self, run_id: &str, stage: &str, message: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO run_logs (run_id, timestamp, stage, message) VALUES (?1, strftime('%s','now'), ?2, ?3)",
                params![run_id, stage, message],
            )
            .map_err(|e| DiscoveryError::Internal(e.to_string()))?;
        Ok(())
    }

    pub fn upsert_result(&self, run_id: &str, result_json: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO run_results (run_id, result_json, updated_at) VALUES (?1, ?2, strftime('%s','now'))
                 ON CONFLICT(run_id) DO UPDATE SET result_json=excluded.result_json, updated_at=excluded.updated_at",
                params![run_id, result_json],
            )
            .map_err(|e| DiscoveryError::Internal(e.to_string()))?;
        Ok(())
    }

    pub fn upsert_plot(&self, run_id: &str, plot_id: &str, payload_json: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO run_plots (run_id, plot_id, payload_json) VALUES (?1, ?2, ?3)
                 ON CONFLICT(run_id, plot_id) DO UPDATE SET payload_json=excluded.payload_json",
                params![run_id, plot_id, payload_json],
            )
            .map_err(|e| DiscoveryError::Internal(e.to_string()))?;
        Ok(())
    }

    pub fn record_artifact(&self, run_id: &str, artifact_type: &str, path: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO run_artifacts (run_id, artifact_type, path, created_at) VALUES (?1, ?2, ?3, strftime('%s','now'))",
                params![run_id, artifact_type, path],
            )
            .map_err(|e| DiscoveryError::Internal(e.to_string()))?;
        Ok(())
    }

    /// `resume` semantics (§4.12): re-submits the stored config under
    /// `queued`, appends a `"resumed"` stage-log line. Fails fast if the
    /// run is currently active.
    pub fn resume(&self, run_id: &str) -> Result<()> {
        match self.run_status(run_id)? {
            Some(RunStatus::Running) | Some(RunStatus::Queued) => {
                Err(DiscoveryError::InvalidConfig(format!("run {run_id} is already active")))
            }
            Some(_) => {
                self.conn
                    .execute("UPDATE runs SET status='queued', updated_at=strftime('%s','now') WHERE run_id=?1", params![run_id])
                    .map_err(|e| DiscoveryError::Internal(e.to_string()))?;
                self.append_log(run_id, "resumed", "run resumed")
            }
            None => Err(DiscoveryError::InvalidConfig(format!("no such run {run_id}"))),
        }
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS runs (
    run_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    stage TEXT NOT NULL,
    progress REAL NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    config_json TEXT NOT NULL,
    config_hash INTEGER NOT NULL,
    error TEXT
);
CREATE TABLE IF NOT EXISTS run_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    stage TEXT NOT NULL,
    message TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS run_results (
    run_id TEXT PRIMARY KEY,
    result_json TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS run_plots (
    run_id TEXT NOT NULL,
    plot_id TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    PRIMARY KEY (run_id, plot_id)
);
CREATE TABLE IF NOT EXISTS run_artifacts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    artifact_type TEXT NOT NULL,
    path TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_existing_row() {
        let store = RunStore::in_memory().unwrap();
        store.upsert_run("run-1", RunStatus::Queued, "init", 0.0, "{}", 1, None).unwrap();
        store.upsert_run("run-1", RunStatus::Running, "stage_a", 0.2, "{}", 1, None).unwrap();
        assert_eq!(store.run_status("run-1").unwrap(), Some(RunStatus::Running));
    }

    #[test]
    fn resume_fails_fast_on_active_run() {
        let store = RunStore::in_memory().unwrap();
        store.upsert_run("run-2", RunStatus::Running, "stage_b", 0.5, "{}", 1, None).unwrap();
        assert!(store.resume("run-2").is_err());
    }

    #[test]
    fn resume_requeues_failed_run_with_log_line() {
        let store = RunStore::in_memory().unwrap();
        store.upsert_run("run-3", RunStatus::Failed, "stage_c", 0.5, "{}", 1, Some("boom")).unwrap();
        store.resume("run-3").unwrap();
        assert_eq!(store.run_status("run-3").unwrap(), Some(RunStatus::Queued));
    }
}
