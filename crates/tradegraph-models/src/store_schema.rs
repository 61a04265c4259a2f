/// Run archive table. One row per analysis run, keyed by run id.
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS runs (
///     run_id         TEXT PRIMARY KEY,
///     instrument_id  TEXT NOT NULL,
///     as_of_date     TEXT NOT NULL,
///     status         TEXT NOT NULL,
///     final_decision TEXT,
///     response_json  TEXT NOT NULL,
///     created_at     TEXT NOT NULL
/// );
/// ```
pub const RUNS_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS runs (
    run_id         TEXT PRIMARY KEY,
    instrument_id  TEXT NOT NULL,
    as_of_date     TEXT NOT NULL,
    status         TEXT NOT NULL,
    final_decision TEXT,
    response_json  TEXT NOT NULL,
    created_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_runs_instrument ON runs(instrument_id);
CREATE INDEX IF NOT EXISTS idx_runs_created ON runs(created_at);
";

/// Situation memory table: past situations and the recommendation taken.
pub const MEMORY_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS situation_memories (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    role           TEXT NOT NULL,
    situation      TEXT NOT NULL,
    recommendation TEXT NOT NULL,
    created_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_memories_role ON situation_memories(role);
";

/// A raw archive row as read from SQLite.
#[derive(Debug, Clone)]
pub struct RunRow {
    pub run_id: String,
    pub instrument_id: String,
    pub as_of_date: String,
    pub status: String,
    pub final_decision: Option<String>,
    pub response_json: String,
    pub created_at: String,
}

/// One remembered situation.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRow {
    pub role: String,
    pub situation: String,
    pub recommendation: String,
}
