use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use tradegraph_models::message::Message;
use tradegraph_models::stage::{DebateSide, StageId};
use tradegraph_models::state::{SharedState, StateDelta};

use crate::backend::ReasoningBackend;
use crate::error::AgentError;
use crate::memory::{format_past, recall, SituationMemory};
use crate::prompts;
use crate::stage::{failure_text, Stage};

/// Next step of the investment debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebateRoute {
    Continue(DebateSide),
    Terminate,
}

/// Bounds the bull/bear exchange to `2 * max_rounds` advocate turns.
#[derive(Debug, Clone, Copy)]
pub struct DebateCoordinator {
    max_rounds: u32,
}

impl DebateCoordinator {
    pub fn new(max_rounds: u32) -> Self {
        Self { max_rounds }
    }

    pub fn turn_limit(&self) -> u32 {
        self.max_rounds.saturating_mul(2)
    }

    /// Bull opens, then sides strictly alternate until the turn limit.
    pub fn should_continue(&self, state: &SharedState) -> DebateRoute {
        let debate = state.debate();
        if debate.round_count >= self.turn_limit() {
            return DebateRoute::Terminate;
        }
        let next = debate
            .last_speaker
            .map(DebateSide::opponent)
            .unwrap_or(DebateSide::OPENING);
        DebateRoute::Continue(next)
    }
}

/// One advocate turn. Failures still count as a turn.
pub struct AdvocateStage {
    side: DebateSide,
    backend: Arc<dyn ReasoningBackend>,
    memory: Arc<dyn SituationMemory>,
    memory_matches: usize,
}

impl AdvocateStage {
    pub fn new(
        side: DebateSide,
        backend: Arc<dyn ReasoningBackend>,
        memory: Arc<dyn SituationMemory>,
        memory_matches: usize,
    ) -> Self {
        Self {
            side,
            backend,
            memory,
            memory_matches,
        }
    }
}

#[async_trait]
impl Stage for AdvocateStage {
    fn id(&self) -> StageId {
        StageId::Advocate(self.side)
    }

    async fn execute(&self, state: &SharedState) -> Result<StateDelta, AgentError> {
        let past = recall(
            self.memory.as_ref(),
            &state.reports().situation(),
            self.memory_matches,
        )
        .await;
        let conversation = vec![
            Message::system(prompts::advocate_prompt(self.side, state, &format_past(&past))),
            Message::user(format!(
                "Make your argument on {} now.",
                state.instrument_id()
            )),
        ];
        let response = self.backend.invoke(&conversation, &[]).await?;
        let argument = non_empty(&response.text, "(no argument given)");

        let debate = state.debate().with_turn(self.side, &argument);
        debug!(
            stage = %self.id(),
            instrument = state.instrument_id(),
            round = debate.round_count,
            "Advocate spoke"
        );
        Ok(StateDelta {
            debate: Some(debate),
            ..Default::default()
        })
    }

    fn failure_delta(&self, state: &SharedState, reason: &str) -> StateDelta {
        StateDelta {
            debate: Some(state.debate().with_turn(self.side, &failure_text(reason))),
            ..Default::default()
        }
    }
}

/// Judges the debate and writes the investment plan that seeds the trader.
pub struct ResearchJudgeStage {
    backend: Arc<dyn ReasoningBackend>,
    memory: Arc<dyn SituationMemory>,
    memory_matches: usize,
}

impl ResearchJudgeStage {
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

    fn decide(state: &SharedState, decision: String) -> StateDelta {
        let mut debate = state.debate().clone();
        debate.judge_decision = Some(decision.clone());
        StateDelta {
            debate: Some(debate),
            investment_plan: Some(decision),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Stage for ResearchJudgeStage {
    fn id(&self) -> StageId {
        StageId::ResearchJudge
    }

    async fn execute(&self, state: &SharedState) -> Result<StateDelta, AgentError> {
        let past = recall(
            self.memory.as_ref(),
            &state.reports().situation(),
            self.memory_matches,
        )
        .await;
        let conversation = vec![
            Message::system(prompts::research_judge_prompt(state, &format_past(&past))),
            Message::user("Deliver your decision and investment plan."),
        ];
        let response = self.backend.invoke(&conversation, &[]).await?;
        Ok(Self::decide(
            state,
            non_empty(&response.text, "No decision was produced."),
        ))
    }

    fn failure_delta(&self, state: &SharedState, reason: &str) -> StateDelta {
        Self::decide(state, failure_text(reason))
    }
}

pub(crate) fn non_empty(text: &str, fallback: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}
