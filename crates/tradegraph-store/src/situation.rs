use std::collections::HashSet;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::Connection;
use tradegraph_models::store_schema::{MemoryRow, MEMORY_TABLE_DDL};

use crate::error::StoreError;

/// A remembered recommendation and how closely its situation matched the query.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarSituation {
    pub recommendation: String,
    pub similarity: f64,
}

/// SQLite-backed situation memory, partitioned by role (e.g. `bull`, `risk_judge`).
///
/// Similarity is the Jaccard index of the lowercase word sets of two situations.
pub struct SqliteMemory {
    conn: Mutex<Connection>,
}

impl SqliteMemory {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(MEMORY_TABLE_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(MEMORY_TABLE_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("SQLite mutex poisoned: {e}")))
    }

    /// Seed a situation. Learning from outcomes is handled outside this crate.
    pub fn insert(&self, row: &MemoryRow) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO situation_memories (role, situation, recommendation, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                row.role,
                row.situation,
                row.recommendation,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Top-`k` recommendations for `role` ranked by similarity to `situation`.
    /// Ties keep insertion order. Situations sharing no words are skipped.
    pub fn retrieve_similar(
        &self,
        role: &str,
        situation: &str,
        k: usize,
    ) -> Result<Vec<SimilarSituation>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows: Vec<(String, String)> = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare_cached(
                "SELECT situation, recommendation FROM situation_memories \
                 WHERE role = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![role], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let query = word_set(situation);
        let mut scored: Vec<SimilarSituation> = rows
            .into_iter()
            .filter_map(|(past, recommendation)| {
                let similarity = jaccard(&query, &word_set(&past));
                (similarity > 0.0).then_some(SimilarSituation {
                    recommendation,
                    similarity,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        scored.truncate(k);
        Ok(scored)
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}
