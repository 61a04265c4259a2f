use async_trait::async_trait;
use tracing::debug;
use tradegraph_models::message::Message;
use tradegraph_models::stage::{Domain, StageId};
use tradegraph_models::state::{SharedState, StateDelta};

use crate::error::AgentError;
use crate::stage::Stage;

/// Drops a completed analyst's tool-call rounds from the conversation,
/// keeping its final report as one summarizing turn.
///
/// Turns from other stages are kept in order. Pruning twice is a no-op.
#[derive(Debug, Clone, Copy)]
pub struct ContextPruner {
    domain: Domain,
}

impl ContextPruner {
    pub fn new(domain: Domain) -> Self {
        Self { domain }
    }

    pub fn prune(&self, messages: &[Message]) -> Vec<Message> {
        let analyst = StageId::Analyst(self.domain);
        let tools = StageId::ToolCalls(self.domain);

        let summary = messages
            .iter()
            .rev()
            .find(|m| m.stage == Some(analyst) && !m.requests_tools())
            .map(|m| m.content.clone());

        let mut pruned: Vec<Message> = messages
            .iter()
            .filter(|m| m.stage != Some(analyst) && m.stage != Some(tools))
            .cloned()
            .collect();
        if let Some(text) = summary {
            pruned.push(Message::assistant(text).from_stage(analyst));
        }
        pruned
    }
}

#[async_trait]
impl Stage for ContextPruner {
    fn id(&self) -> StageId {
        StageId::PruneContext(self.domain)
    }

    async fn execute(&self, state: &SharedState) -> Result<StateDelta, AgentError> {
        let pruned = self.prune(state.messages());
        debug!(
            stage = %self.id(),
            before = state.messages().len(),
            after = pruned.len(),
            "Pruned conversation"
        );
        Ok(StateDelta::default().replace_messages(pruned))
    }

    /// Leaves history as it was.
    fn failure_delta(&self, _state: &SharedState, _reason: &str) -> StateDelta {
        StateDelta::default()
    }
}
