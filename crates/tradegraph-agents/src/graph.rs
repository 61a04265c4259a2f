use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;
use tradegraph_models::stage::{DebateSide, Domain, RiskPosture, StageId};
use tradegraph_models::state::SharedState;

use crate::debate::{DebateCoordinator, DebateRoute};
use crate::error::WorkflowError;
use crate::risk::{RiskReviewPanel, RiskRoute};

/// Which analysts feed the debate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalystSelection {
    /// One analyst per domain, run in this order.
    Sequential(Vec<Domain>),
    /// A single analyst producing all four reports.
    Unified,
}

impl AnalystSelection {
    /// Parse analyst names. `unified` anywhere in the list selects unified mode.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, WorkflowError> {
        if names.is_empty() {
            return Err(WorkflowError::NoAnalysts);
        }
        let is_unified = |name: &str| name.trim().eq_ignore_ascii_case("unified");
        if names.iter().any(|n| is_unified(n.as_ref())) {
            let ignored: Vec<&str> = names
                .iter()
                .map(AsRef::as_ref)
                .filter(|n| !is_unified(n))
                .collect();
            if !ignored.is_empty() {
                warn!(ignored = ?ignored, "Unified mode selected; ignoring other analysts");
            }
            return Ok(Self::Unified);
        }

        let mut domains = Vec::with_capacity(names.len());
        for name in names {
            let domain: Domain = name
                .as_ref()
                .parse()
                .map_err(|_| WorkflowError::UnknownAnalyst(name.as_ref().to_string()))?;
            if domains.contains(&domain) {
                return Err(WorkflowError::DuplicateAnalyst(domain));
            }
            domains.push(domain);
        }
        Ok(Self::Sequential(domains))
    }
}

/// Where control goes after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    To(StageId),
    End,
}

/// Outgoing edge of a node. Conditional edges are resolved against state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Goto(StageId),
    /// Analyst to its Tool-Call Adapter while tools are pending and budget
    /// remains, otherwise to its Context Pruner.
    ToolLoop(Domain),
    /// Next advocate, or the research judge once the turn limit is reached.
    Debate,
    /// Next risk advocate, or the risk judge once the cycle limit is reached.
    RiskPanel,
    Finish,
}

impl Edge {
    /// Every stage this edge can lead to.
    fn targets(self) -> Vec<StageId> {
        match self {
            Self::Goto(id) => vec![id],
            Self::ToolLoop(d) => vec![StageId::ToolCalls(d), StageId::PruneContext(d)],
            Self::Debate => vec![
                StageId::Advocate(DebateSide::Bull),
                StageId::Advocate(DebateSide::Bear),
                StageId::ResearchJudge,
            ],
            Self::RiskPanel => RiskPosture::ORDER
                .into_iter()
                .map(StageId::RiskAdvocate)
                .chain([StageId::RiskJudge])
                .collect(),
            Self::Finish => Vec::new(),
        }
    }
}

/// Evaluates conditional edges.
#[derive(Debug, Clone, Copy)]
pub struct Router {
    debate: DebateCoordinator,
    risk: RiskReviewPanel,
    max_tool_calls: u32,
}

impl Router {
    pub fn new(max_debate_rounds: u32, max_risk_cycles: u32, max_tool_calls: u32) -> Self {
        Self {
            debate: DebateCoordinator::new(max_debate_rounds),
            risk: RiskReviewPanel::new(max_risk_cycles),
            max_tool_calls,
        }
    }

    pub fn resolve(&self, edge: Edge, state: &SharedState) -> Transition {
        match edge {
            Edge::Goto(id) => Transition::To(id),
            Edge::ToolLoop(domain) => {
                let under_cap = state.tool_call_counts().get(domain) < self.max_tool_calls;
                if under_cap && tools_pending(state, domain) {
                    Transition::To(StageId::ToolCalls(domain))
                } else {
                    Transition::To(StageId::PruneContext(domain))
                }
            }
            Edge::Debate => match self.debate.should_continue(state) {
                DebateRoute::Continue(side) => Transition::To(StageId::Advocate(side)),
                DebateRoute::Terminate => Transition::To(StageId::ResearchJudge),
            },
            Edge::RiskPanel => match self.risk.should_continue(state) {
                RiskRoute::Continue(posture) => Transition::To(StageId::RiskAdvocate(posture)),
                RiskRoute::Terminate => Transition::To(StageId::RiskJudge),
            },
            Edge::Finish => Transition::End,
        }
    }
}

/// Whether the analyst's latest turn is waiting on tool results.
fn tools_pending(state: &SharedState, domain: Domain) -> bool {
    let analyst = StageId::Analyst(domain);
    state
        .messages()
        .iter()
        .rev()
        .find(|m| m.stage == Some(analyst))
        .is_some_and(|m| m.requests_tools())
}

/// Static routing table: one outgoing edge per stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageGraph {
    start: StageId,
    edges: BTreeMap<StageId, Edge>,
}

impl StageGraph {
    pub fn build(selection: &AnalystSelection) -> Result<Self, WorkflowError> {
        let mut edges = BTreeMap::new();
        let start = match selection {
            AnalystSelection::Unified => {
                edges.insert(StageId::UnifiedAnalyst, Edge::Debate);
                StageId::UnifiedAnalyst
            }
            AnalystSelection::Sequential(domains) => {
                let Some(&first) = domains.first() else {
                    return Err(WorkflowError::NoAnalysts);
                };
                for (i, &domain) in domains.iter().enumerate() {
                    edges.insert(StageId::Analyst(domain), Edge::ToolLoop(domain));
                    edges.insert(
                        StageId::ToolCalls(domain),
                        Edge::Goto(StageId::Analyst(domain)),
                    );
                    let after_prune = match domains.get(i + 1) {
                        Some(&next) => Edge::Goto(StageId::Analyst(next)),
                        None => Edge::Debate,
                    };
                    edges.insert(StageId::PruneContext(domain), after_prune);
                }
                StageId::Analyst(first)
            }
        };

        for side in [DebateSide::Bull, DebateSide::Bear] {
            edges.insert(StageId::Advocate(side), Edge::Debate);
        }
        edges.insert(StageId::ResearchJudge, Edge::Goto(StageId::Trader));
        edges.insert(StageId::Trader, Edge::RiskPanel);
        for posture in RiskPosture::ORDER {
            edges.insert(StageId::RiskAdvocate(posture), Edge::RiskPanel);
        }
        edges.insert(StageId::RiskJudge, Edge::Finish);

        let graph = Self { start, edges };
        graph.validate(|id| graph.edges.contains_key(&id))?;
        Ok(graph)
    }

    pub fn start(&self) -> StageId {
        self.start
    }

    pub fn edge(&self, stage: StageId) -> Option<Edge> {
        self.edges.get(&stage).copied()
    }

    pub fn stages(&self) -> impl Iterator<Item = StageId> + '_ {
        self.edges.keys().copied()
    }

    /// Every stage reachable as the start or an edge target.
    pub fn targets(&self) -> BTreeSet<StageId> {
        std::iter::once(self.start)
            .chain(self.edges.values().flat_map(|e| e.targets()))
            .collect()
    }

    /// Longest run the bounds allow when every stage advances its counters.
    ///
    /// Each sequential analyst takes `max_tool_calls + 1` analyst steps,
    /// `max_tool_calls` adapter steps and one prune. The unified analyst is a
    /// single step.
    pub fn max_run_steps(
        &self,
        max_tool_calls: u32,
        max_debate_rounds: u32,
        max_risk_cycles: u32,
    ) -> u64 {
        let per_analyst = 2 * u64::from(max_tool_calls) + 2;
        let analysts: u64 = self
            .edges
            .keys()
            .map(|id| match id {
                StageId::Analyst(_) => per_analyst,
                StageId::UnifiedAnalyst => 1,
                _ => 0,
            })
            .sum();
        let debate = 2 * u64::from(max_debate_rounds) + 1;
        let trader = 1;
        let risk = 3 * u64::from(max_risk_cycles) + 1;
        analysts + debate + trader + risk
    }

    /// Fails on the first target for which `is_registered` is false.
    pub fn validate(&self, is_registered: impl Fn(StageId) -> bool) -> Result<(), WorkflowError> {
        match self.targets().into_iter().find(|&id| !is_registered(id)) {
            Some(missing) => Err(WorkflowError::UnknownStage(missing)),
            None => Ok(()),
        }
    }
}
