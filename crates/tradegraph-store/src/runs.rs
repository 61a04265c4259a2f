use chrono::Utc;
use rusqlite::Connection;
use tradegraph_models::request::{AnalysisResponse, RunStatus};
use tradegraph_models::store_schema::{RunRow, RUNS_TABLE_DDL};

use crate::error::StoreError;

const SELECT_COLUMNS: &str =
    "SELECT run_id, instrument_id, as_of_date, status, final_decision, response_json, created_at \
     FROM runs";

/// SQLite table of archived runs.
///
/// Opened read-write with WAL journal so a reader (e.g. `tradegraph show`)
/// can inspect the archive while another process writes to it.
pub struct RunStore {
    conn: Connection,
}

impl RunStore {
    /// Open the archive at `path`, creating the schema if it doesn't exist.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(RUNS_TABLE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(RUNS_TABLE_DDL)?;
        Ok(Self { conn })
    }

    /// Insert or replace the row for a run. Returns the serialized response.
    pub fn save(&self, response: &AnalysisResponse) -> Result<String, StoreError> {
        let response_json = serde_json::to_string(response)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO runs \
             (run_id, instrument_id, as_of_date, status, final_decision, response_json, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                response.run_id.to_string(),
                response.instrument_id,
                response.full_state.as_of_date().to_string(),
                status_label(response.status),
                response.final_decision,
                response_json,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(response_json)
    }

    /// Get a single run by id.
    pub fn get(&self, run_id: &str) -> Result<Option<RunRow>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{SELECT_COLUMNS} WHERE run_id = ?1"))?;

        match stmt.query_row(rusqlite::params![run_id], map_row) {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Most recent runs for an instrument, newest first.
    pub fn list_by_instrument(
        &self,
        instrument_id: &str,
        limit: usize,
    ) -> Result<Vec<RunRow>, StoreError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{SELECT_COLUMNS} WHERE instrument_id = ?1 ORDER BY created_at DESC LIMIT ?2"
        ))?;

        let rows = stmt
            .query_map(rusqlite::params![instrument_id, limit as i64], map_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let count: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        run_id: row.get(0)?,
        instrument_id: row.get(1)?,
        as_of_date: row.get(2)?,
        status: row.get(3)?,
        final_decision: row.get(4)?,
        response_json: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Completed => "completed",
        RunStatus::Cancelled => "cancelled",
        RunStatus::Failed => "failed",
    }
}
