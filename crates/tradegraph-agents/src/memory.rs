use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use tradegraph_store::SqliteMemory;

use crate::error::AgentError;

/// A remembered recommendation for a similar past situation.
#[derive(Debug, Clone, PartialEq)]
pub struct PastSituation {
    pub recommendation: String,
}

/// Read-only similarity search over past situations.
#[async_trait]
pub trait SituationMemory: Send + Sync {
    async fn retrieve_similar(
        &self,
        situation: &str,
        k: usize,
    ) -> Result<Vec<PastSituation>, AgentError>;
}

/// Memory that never remembers anything. Used when no store is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMemory;

#[async_trait]
impl SituationMemory for NoopMemory {
    async fn retrieve_similar(
        &self,
        _situation: &str,
        _k: usize,
    ) -> Result<Vec<PastSituation>, AgentError> {
        Ok(Vec::new())
    }
}

/// Stage roles that keep separate memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRole {
    Bull,
    Bear,
    Trader,
    ResearchJudge,
    RiskJudge,
}

impl MemoryRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bull => "bull",
            Self::Bear => "bear",
            Self::Trader => "trader",
            Self::ResearchJudge => "research_judge",
            Self::RiskJudge => "risk_judge",
        }
    }
}

/// One role's partition of the SQLite situation store.
pub struct StoredMemory {
    store: Arc<SqliteMemory>,
    role: MemoryRole,
}

impl StoredMemory {
    pub fn new(store: Arc<SqliteMemory>, role: MemoryRole) -> Self {
        Self { store, role }
    }
}

#[async_trait]
impl SituationMemory for StoredMemory {
    async fn retrieve_similar(
        &self,
        situation: &str,
        k: usize,
    ) -> Result<Vec<PastSituation>, AgentError> {
        let matches = self
            .store
            .retrieve_similar(self.role.as_str(), situation, k)?;
        Ok(matches
            .into_iter()
            .map(|m| PastSituation {
                recommendation: m.recommendation,
            })
            .collect())
    }
}

/// Memory handles injected into the debate, trader and judge stages.
#[derive(Clone)]
pub struct MemoryBank {
    pub bull: Arc<dyn SituationMemory>,
    pub bear: Arc<dyn SituationMemory>,
    pub trader: Arc<dyn SituationMemory>,
    pub research_judge: Arc<dyn SituationMemory>,
    pub risk_judge: Arc<dyn SituationMemory>,
}

impl Default for MemoryBank {
    fn default() -> Self {
        let noop: Arc<dyn SituationMemory> = Arc::new(NoopMemory);
        Self {
            bull: noop.clone(),
            bear: noop.clone(),
            trader: noop.clone(),
            research_judge: noop.clone(),
            risk_judge: noop,
        }
    }
}

impl MemoryBank {
    /// Every role backed by its own partition of one store.
    pub fn from_store(store: Arc<SqliteMemory>) -> Self {
        let role = |r| -> Arc<dyn SituationMemory> { Arc::new(StoredMemory::new(store.clone(), r)) };
        Self {
            bull: role(MemoryRole::Bull),
            bear: role(MemoryRole::Bear),
            trader: role(MemoryRole::Trader),
            research_judge: role(MemoryRole::ResearchJudge),
            risk_judge: role(MemoryRole::RiskJudge),
        }
    }
}

/// Retrieve precedent, treating a failing memory like an empty one.
pub async fn recall(memory: &dyn SituationMemory, situation: &str, k: usize) -> Vec<PastSituation> {
    match memory.retrieve_similar(situation, k).await {
        Ok(found) => found,
        Err(e) => {
            warn!(error = %e, "Memory lookup failed; continuing without precedent");
            Vec::new()
        }
    }
}

/// Render past recommendations for a prompt.
pub fn format_past(past: &[PastSituation]) -> String {
    if past.is_empty() {
        return "No past memories found.".to_string();
    }
    past.iter()
        .map(|p| p.recommendation.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tradegraph_models::store_schema::MemoryRow;

    fn seeded_store() -> Arc<SqliteMemory> {
        let store = SqliteMemory::open_in_memory().unwrap();
        store
            .insert(&MemoryRow {
                role: "bull".to_string(),
                situation: "rising rates tech selloff".to_string(),
                recommendation: "Trim duration-sensitive growth names".to_string(),
            })
            .unwrap();
        store
            .insert(&MemoryRow {
                role: "bear".to_string(),
                situation: "rising rates tech selloff".to_string(),
                recommendation: "Bear lesson".to_string(),
            })
            .unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn noop_memory_is_empty() {
        let bank = MemoryBank::default();
        let found = recall(bank.risk_judge.as_ref(), "anything", 2).await;
        assert!(found.is_empty());
        assert_eq!(format_past(&found), "No past memories found.");
    }

    #[tokio::test]
    async fn stored_memory_is_partitioned_by_role() {
        let bank = MemoryBank::from_store(seeded_store());

        let bull = recall(bank.bull.as_ref(), "tech selloff as rates keep rising", 2).await;
        assert_eq!(bull.len(), 1);
        assert_eq!(bull[0].recommendation, "Trim duration-sensitive growth names");

        let trader = recall(bank.trader.as_ref(), "tech selloff", 2).await;
        assert!(trader.is_empty());
    }

    #[test]
    fn format_joins_recommendations() {
        let past = vec![
            PastSituation {
                recommendation: "a".to_string(),
            },
            PastSituation {
                recommendation: "b".to_string(),
            },
        ];
        assert_eq!(format_past(&past), "a\n\nb");
    }
}
