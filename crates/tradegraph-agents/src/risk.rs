use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use tradegraph_models::message::Message;
use tradegraph_models::stage::{RiskPosture, StageId};
use tradegraph_models::state::{SharedState, StateDelta};

use crate::backend::ReasoningBackend;
use crate::debate::non_empty;
use crate::error::AgentError;
use crate::memory::{format_past, recall, SituationMemory};
use crate::prompts;
use crate::stage::{failure_text, Stage};

/// Next step of the risk review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskRoute {
    Continue(RiskPosture),
    Terminate,
}

/// Round-robins the three risk postures for at most `max_cycles` full cycles.
#[derive(Debug, Clone, Copy)]
pub struct RiskReviewPanel {
    max_cycles: u32,
}

impl RiskReviewPanel {
    pub fn new(max_cycles: u32) -> Self {
        Self { max_cycles }
    }

    pub fn turn_limit(&self) -> u32 {
        self.max_cycles
            .saturating_mul(RiskPosture::ORDER.len() as u32)
    }

    pub fn should_continue(&self, state: &SharedState) -> RiskRoute {
        let risk = state.risk();
        if risk.round_count >= self.turn_limit() {
            return RiskRoute::Terminate;
        }
        let next = risk
            .last_speaker
            .map(RiskPosture::successor)
            .unwrap_or(RiskPosture::ORDER[0]);
        RiskRoute::Continue(next)
    }
}

/// One risk advocate turn. Failures still count as a turn.
pub struct RiskAdvocateStage {
    posture: RiskPosture,
    backend: Arc<dyn ReasoningBackend>,
}

impl RiskAdvocateStage {
    pub fn new(posture: RiskPosture, backend: Arc<dyn ReasoningBackend>) -> Self {
        Self { posture, backend }
    }
}

#[async_trait]
impl Stage for RiskAdvocateStage {
    fn id(&self) -> StageId {
        StageId::RiskAdvocate(self.posture)
    }

    async fn execute(&self, state: &SharedState) -> Result<StateDelta, AgentError> {
        let conversation = vec![
            Message::system(prompts::risk_advocate_prompt(self.posture, state)),
            Message::user("Give your view on the trader's plan."),
        ];
        let response = self.backend.invoke(&conversation, &[]).await?;
        let argument = non_empty(&response.text, "(no argument given)");

        let risk = state.risk().with_turn(self.posture, &argument);
        debug!(
            stage = %self.id(),
            instrument = state.instrument_id(),
            round = risk.round_count,
            "Risk advocate spoke"
        );
        Ok(StateDelta {
            risk: Some(risk),
            ..Default::default()
        })
    }

    fn failure_delta(&self, state: &SharedState, reason: &str) -> StateDelta {
        StateDelta {
            risk: Some(state.risk().with_turn(self.posture, &failure_text(reason))),
            ..Default::default()
        }
    }
}

/// The only writer of the final decision.
pub struct RiskJudgeStage {
    backend: Arc<dyn ReasoningBackend>,
    memory: Arc<dyn SituationMemory>,
    memory_matches: usize,
}

impl RiskJudgeStage {
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

    fn decide(&self, state: &SharedState, decision: String) -> StateDelta {
        let mut risk = state.risk().clone();
        risk.judge_decision = Some(decision.clone());
        StateDelta {
            risk: Some(risk),
            final_decision: Some(decision.clone()),
            ..Default::default()
        }
        .append_messages(vec![Message::assistant(decision).from_stage(self.id())])
    }
}

#[async_trait]
impl Stage for RiskJudgeStage {
    fn id(&self) -> StageId {
        StageId::RiskJudge
    }

    async fn execute(&self, state: &SharedState) -> Result<StateDelta, AgentError> {
        let past = recall(
            self.memory.as_ref(),
            &state.reports().situation(),
            self.memory_matches,
        )
        .await;
        let conversation = vec![
            Message::system(prompts::risk_judge_prompt(state, &format_past(&past))),
            Message::user("Deliver the final decision."),
        ];
        let response = self.backend.invoke(&conversation, &[]).await?;
        Ok(self.decide(state, non_empty(&response.text, "No decision was produced.")))
    }

    fn failure_delta(&self, state: &SharedState, reason: &str) -> StateDelta {
        self.decide(state, failure_text(reason))
    }
}
