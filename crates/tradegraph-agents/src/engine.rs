use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tradegraph_models::config::WorkflowConfig;
use tradegraph_models::request::{AnalysisResponse, RunStatus, StepOutcome, StepRecord};
use tradegraph_models::stage::{DebateSide, StageId};
use tradegraph_models::state::{SharedState, StateDelta};
use uuid::Uuid;

use crate::analyst::{AnalystStage, UnifiedAnalystStage};
use crate::backend::ReasoningBackend;
use crate::debate::{AdvocateStage, ResearchJudgeStage};
use crate::error::{AgentError, WorkflowError};
use crate::graph::{AnalystSelection, Router, StageGraph, Transition};
use crate::memory::MemoryBank;
use crate::pruner::ContextPruner;
use crate::risk::{RiskAdvocateStage, RiskJudgeStage};
use crate::stage::{failure_text, Stage};
use crate::tools::{ToolCallAdapter, ToolRegistry};
use crate::trader::TraderStage;

/// Loop bounds and timeouts for one engine.
#[derive(Debug, Clone)]
pub struct WorkflowLimits {
    pub max_debate_rounds: u32,
    pub max_risk_cycles: u32,
    pub max_tool_calls: u32,
    pub memory_matches: usize,
    pub stage_timeout: Duration,
    pub run_timeout: Option<Duration>,
    pub max_steps: u32,
    pub summarize_threshold_chars: usize,
}

impl Default for WorkflowLimits {
    fn default() -> Self {
        Self::from(&WorkflowConfig::default())
    }
}

impl From<&WorkflowConfig> for WorkflowLimits {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            max_debate_rounds: config.max_debate_rounds,
            max_risk_cycles: config.max_risk_cycles,
            max_tool_calls: config.max_tool_calls,
            memory_matches: config.memory_matches,
            stage_timeout: Duration::from_secs(config.stage_timeout_seconds),
            run_timeout: config.run_timeout_seconds.map(Duration::from_secs),
            max_steps: config.max_steps,
            summarize_threshold_chars: config.summarize_threshold_chars,
        }
    }
}

/// Assembles a [`WorkflowEngine`]. Stages not overridden are built from the
/// configured backends, tools and memory.
pub struct EngineBuilder {
    limits: WorkflowLimits,
    quick: Option<Arc<dyn ReasoningBackend>>,
    deep: Option<Arc<dyn ReasoningBackend>>,
    tools: Arc<ToolRegistry>,
    memory: MemoryBank,
    overrides: HashMap<StageId, Arc<dyn Stage>>,
}

impl EngineBuilder {
    pub fn new(limits: WorkflowLimits) -> Self {
        Self {
            limits,
            quick: None,
            deep: None,
            tools: Arc::new(ToolRegistry::new()),
            memory: MemoryBank::default(),
            overrides: HashMap::new(),
        }
    }

    /// Backend for analysts, advocates, risk advocates and the trader.
    pub fn quick_backend(mut self, backend: Arc<dyn ReasoningBackend>) -> Self {
        self.quick = Some(backend);
        self
    }

    /// Backend for the research judge and the risk judge.
    pub fn deep_backend(mut self, backend: Arc<dyn ReasoningBackend>) -> Self {
        self.deep = Some(backend);
        self
    }

    /// Use one backend for every stage.
    pub fn backend(self, backend: Arc<dyn ReasoningBackend>) -> Self {
        self.quick_backend(backend.clone()).deep_backend(backend)
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn memory(mut self, memory: MemoryBank) -> Self {
        self.memory = memory;
        self
    }

    /// Replace the stage registered under `stage.id()`.
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.overrides.insert(stage.id(), stage);
        self
    }

    pub fn build(self, selection: &AnalystSelection) -> Result<WorkflowEngine, WorkflowError> {
        let graph = StageGraph::build(selection)?;

        let mut stages = HashMap::new();
        for id in graph.stages() {
            let stage = match self.overrides.get(&id) {
                Some(stage) => stage.clone(),
                None => self.default_stage(id)?,
            };
            stages.insert(id, stage);
        }
        graph.validate(|id| stages.contains_key(&id))?;

        let limits = self.limits;
        let router = Router::new(
            limits.max_debate_rounds,
            limits.max_risk_cycles,
            limits.max_tool_calls,
        );
        let longest_run = graph.max_run_steps(
            limits.max_tool_calls,
            limits.max_debate_rounds,
            limits.max_risk_cycles,
        );
        let step_budget = longest_run.max(u64::from(limits.max_steps));
        if step_budget > u64::from(limits.max_steps) {
            debug!(
                max_steps = limits.max_steps,
                step_budget, "Raising step limit to cover the configured bounds"
            );
        }
        Ok(WorkflowEngine {
            graph,
            stages,
            router,
            limits,
            step_budget,
        })
    }

    fn default_stage(&self, id: StageId) -> Result<Arc<dyn Stage>, WorkflowError> {
        let quick = || self.quick.clone().ok_or(WorkflowError::MissingBackend("quick"));
        let deep = || self.deep.clone().ok_or(WorkflowError::MissingBackend("deep"));
        let k = self.limits.memory_matches;
        let memory = &self.memory;

        let stage: Arc<dyn Stage> = match id {
            StageId::Analyst(domain) => Arc::new(AnalystStage::new(
                domain,
                quick()?,
                self.tools.clone(),
                self.limits.max_tool_calls,
            )),
            StageId::ToolCalls(domain) => Arc::new(ToolCallAdapter::new(domain, self.tools.clone())),
            StageId::PruneContext(domain) => Arc::new(ContextPruner::new(domain)),
            StageId::UnifiedAnalyst => Arc::new(UnifiedAnalystStage::new(
                quick()?,
                self.tools.clone(),
                self.limits.summarize_threshold_chars,
            )),
            StageId::Advocate(side) => {
                let memory = match side {
                    DebateSide::Bull => memory.bull.clone(),
                    DebateSide::Bear => memory.bear.clone(),
                };
                Arc::new(AdvocateStage::new(side, quick()?, memory, k))
            }
            StageId::ResearchJudge => Arc::new(ResearchJudgeStage::new(
                deep()?,
                memory.research_judge.clone(),
                k,
            )),
            StageId::Trader => Arc::new(TraderStage::new(quick()?, memory.trader.clone(), k)),
            StageId::RiskAdvocate(posture) => Arc::new(RiskAdvocateStage::new(posture, quick()?)),
            StageId::RiskJudge => {
                Arc::new(RiskJudgeStage::new(deep()?, memory.risk_judge.clone(), k))
            }
        };
        Ok(stage)
    }
}

/// Result of one run. `state.final_decision()` is set only when completed.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub state: SharedState,
    pub steps: Vec<StepRecord>,
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn into_response(
        self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        processing_time_ms: u64,
    ) -> AnalysisResponse {
        AnalysisResponse {
            run_id,
            instrument_id: self.state.instrument_id().to_string(),
            status: self.status,
            final_decision: self.state.final_decision().map(str::to_string),
            error: self.error,
            full_state: self.state,
            steps: self.steps,
            started_at,
            processing_time_ms,
        }
    }
}

/// Executes the stage graph for one shared state at a time.
///
/// Stages run one after another. Each runs on its own task so a panic or a
/// stage timeout is contained and recorded as that stage's failure.
/// Cancellation, the run timeout and the step limit are checked before every
/// stage. The step limit only trips when a stage stops advancing its counters.
pub struct WorkflowEngine {
    graph: StageGraph,
    stages: HashMap<StageId, Arc<dyn Stage>>,
    router: Router,
    limits: WorkflowLimits,
    step_budget: u64,
}

impl WorkflowEngine {
    pub fn builder(limits: WorkflowLimits) -> EngineBuilder {
        EngineBuilder::new(limits)
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn limits(&self) -> &WorkflowLimits {
        &self.limits
    }

    /// Steps a run may take: `max_steps`, raised to the longest run the
    /// configured bounds allow.
    pub fn step_budget(&self) -> u64 {
        self.step_budget
    }

    pub async fn run(&self, initial: SharedState, cancel: &CancellationToken) -> RunOutcome {
        let run_started = Instant::now();
        let mut state = initial;
        let mut steps: Vec<StepRecord> = Vec::new();
        let mut current = self.graph.start();

        info!(
            instrument = state.instrument_id(),
            as_of = %state.as_of_date(),
            start = %current,
            "Workflow run started"
        );

        let stopped = loop {
            if cancel.is_cancelled() {
                info!(instrument = state.instrument_id(), next = %current, "Run cancelled");
                break Some((RunStatus::Cancelled, format!("cancelled before {current}")));
            }
            if let Some(limit) = self.limits.run_timeout {
                if run_started.elapsed() >= limit {
                    warn!(instrument = state.instrument_id(), next = %current, "Run timeout exceeded");
                    break Some((
                        RunStatus::Cancelled,
                        format!(
                            "run timeout of {}s exceeded before {current}",
                            limit.as_secs()
                        ),
                    ));
                }
            }
            if steps.len() as u64 >= self.step_budget {
                error!(instrument = state.instrument_id(), next = %current, "Step limit reached");
                break Some((
                    RunStatus::Failed,
                    format!(
                        "step limit of {} reached before {current}",
                        self.step_budget
                    ),
                ));
            }
            let (Some(stage), Some(edge)) = (self.stages.get(&current), self.graph.edge(current))
            else {
                error!(stage = %current, "No stage registered");
                break Some((RunStatus::Failed, format!("no stage registered for {current}")));
            };

            let step = steps.len() as u32;
            let stage_started = Instant::now();
            let (delta, mut outcome) = match self.execute_stage(stage.clone(), &state).await {
                Ok(delta) => (delta, StepOutcome::Completed),
                Err(e) => {
                    let reason = e.to_string();
                    warn!(
                        stage = %current,
                        instrument = state.instrument_id(),
                        step,
                        debate_round = state.debate().round_count,
                        risk_round = state.risk().round_count,
                        tool_round = ?current.domain().map(|d| state.tool_call_counts().get(d)),
                        error = %reason,
                        "Stage failed; recording degraded output"
                    );
                    (
                        stage.failure_delta(&state, &reason),
                        StepOutcome::Failed {
                            reason: failure_text(&reason),
                        },
                    )
                }
            };

            if let Err(e) = state.apply(current, delta) {
                error!(
                    stage = %current,
                    instrument = state.instrument_id(),
                    step,
                    error = %e,
                    "Discarding stage output that violates state invariants"
                );
                outcome = StepOutcome::Rejected {
                    reason: e.to_string(),
                };
            }

            let elapsed_ms = stage_started.elapsed().as_millis() as u64;
            steps.push(StepRecord {
                step,
                stage: current,
                outcome,
                elapsed_ms,
            });

            match self.router.resolve(edge, &state) {
                Transition::To(next) => current = next,
                Transition::End => break None,
            }
        };

        let (status, error) = match stopped {
            Some((status, reason)) => (status, Some(reason)),
            None if state.final_decision().is_some() => (RunStatus::Completed, None),
            None => (
                RunStatus::Failed,
                Some("run ended without a final decision".to_string()),
            ),
        };

        info!(
            instrument = state.instrument_id(),
            status = ?status,
            steps = steps.len(),
            reports = state.reports().populated_count(),
            elapsed_ms = run_started.elapsed().as_millis() as u64,
            "Workflow run finished"
        );

        RunOutcome {
            status,
            state,
            steps,
            error,
        }
    }

    async fn execute_stage(
        &self,
        stage: Arc<dyn Stage>,
        state: &SharedState,
    ) -> Result<StateDelta, AgentError> {
        let snapshot = state.clone();
        let handle = tokio::spawn(async move { stage.execute(&snapshot).await });
        let abort = handle.abort_handle();

        match tokio::time::timeout(self.limits.stage_timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(AgentError::Panicked(panic_message(join_error))),
            Err(_) => {
                abort.abort();
                Err(AgentError::Timeout(self.limits.stage_timeout.as_secs()))
            }
        }
    }
}

fn panic_message(join_error: JoinError) -> String {
    if !join_error.is_panic() {
        return join_error.to_string();
    }
    let payload = join_error.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
