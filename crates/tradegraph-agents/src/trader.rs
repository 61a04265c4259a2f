use std::sync::Arc;

use async_trait::async_trait;
use tradegraph_models::message::Message;
use tradegraph_models::stage::StageId;
use tradegraph_models::state::{SharedState, StateDelta};

use crate::backend::ReasoningBackend;
use crate::debate::non_empty;
use crate::error::AgentError;
use crate::memory::{format_past, recall, SituationMemory};
use crate::prompts;
use crate::stage::{failure_text, Stage};

/// Turns the investment plan into a concrete trading proposal.
pub struct TraderStage {
    backend: Arc<dyn ReasoningBackend>,
    memory: Arc<dyn SituationMemory>,
    memory_matches: usize,
}

impl TraderStage {
    pub fn new(
        backend: Arc<dyn ReasoningBackend>,
        memory: Arc<dyn SituationMemory>,
        memory_matches: usize,
    ) -> Self {
        Self {
            backend,
            memory,
            memory_matches,
        }
    }

    fn plan(&self, plan: String) -> StateDelta {
        StateDelta {
            trader_plan: Some(plan.clone()),
            ..Default::default()
        }
        .append_messages(vec![Message::assistant(plan).from_stage(self.id())])
    }
}

#[async_trait]
impl Stage for TraderStage {
    fn id(&self) -> StageId {
        StageId::Trader
    }

    async fn execute(&self, state: &SharedState) -> Result<StateDelta, AgentError> {
        let past = recall(
            self.memory.as_ref(),
            &state.reports().situation(),
            self.memory_matches,
        )
        .await;
        let conversation = vec![
            Message::system(prompts::trader_prompt(state, &format_past(&past))),
            Message::user(format!(
                "Propose the trade for {} as of {}.",
                state.instrument_id(),
                state.as_of_date()
            )),
        ];
        let response = self.backend.invoke(&conversation, &[]).await?;
        Ok(self.plan(non_empty(&response.text, "No trading plan was produced.")))
    }

    fn failure_delta(&self, _state: &SharedState, reason: &str) -> StateDelta {
        self.plan(failure_text(reason))
    }
}
