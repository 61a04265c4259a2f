use async_trait::async_trait;
use tradegraph_models::stage::StageId;
use tradegraph_models::state::{SharedState, StateDelta};

use crate::error::AgentError;

/// One node of the workflow graph.
///
/// A stage reads the current state and returns a partial update; it never
/// mutates state itself. When `execute` fails, times out or panics, the engine
/// merges `failure_delta` instead so downstream stages still see a value for
/// every field this stage owns.
#[async_trait]
pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    async fn execute(&self, state: &SharedState) -> Result<StateDelta, AgentError>;

    fn failure_delta(&self, state: &SharedState, reason: &str) -> StateDelta;
}

/// Degraded output recorded in place of a failed stage's result.
pub fn failure_text(reason: &str) -> String {
    format!("stage failed: {reason}")
}
