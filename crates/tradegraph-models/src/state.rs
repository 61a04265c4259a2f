use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Message;
use crate::stage::{DebateSide, Domain, RiskPosture, StageId};

/// Latest report per information domain. Each slot is written once per run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Reports {
    pub market: Option<String>,
    pub sentiment: Option<String>,
    pub news: Option<String>,
    pub fundamentals: Option<String>,
}

impl Reports {
    pub fn get(&self, domain: Domain) -> Option<&str> {
        match domain {
            Domain::Market => self.market.as_deref(),
            Domain::Sentiment => self.sentiment.as_deref(),
            Domain::News => self.news.as_deref(),
            Domain::Fundamentals => self.fundamentals.as_deref(),
        }
    }

    fn slot_mut(&mut self, domain: Domain) -> &mut Option<String> {
        match domain {
            Domain::Market => &mut self.market,
            Domain::Sentiment => &mut self.sentiment,
            Domain::News => &mut self.news,
            Domain::Fundamentals => &mut self.fundamentals,
        }
    }

    pub fn populated(&self) -> impl Iterator<Item = (Domain, &str)> + '_ {
        Domain::ALL
            .into_iter()
            .filter_map(|d| self.get(d).map(|text| (d, text)))
    }

    pub fn populated_count(&self) -> usize {
        self.populated().count()
    }

    /// All four reports joined, used as the memory lookup key.
    pub fn situation(&self) -> String {
        Domain::ALL
            .into_iter()
            .map(|d| self.get(d).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Two-party debate transcript and turn accounting.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DebateState {
    pub history: String,
    pub bull_history: String,
    pub bear_history: String,
    pub current_response: String,
    pub last_speaker: Option<DebateSide>,
    /// One increment per advocate turn.
    pub round_count: u32,
    pub judge_decision: Option<String>,
}

impl DebateState {
    /// Record one advocate turn.
    pub fn with_turn(&self, side: DebateSide, argument: &str) -> Self {
        let mut next = self.clone();
        let line = format!("{}: {}", side.label(), argument);
        append_line(&mut next.history, &line);
        match side {
            DebateSide::Bull => append_line(&mut next.bull_history, &line),
            DebateSide::Bear => append_line(&mut next.bear_history, &line),
        }
        next.current_response = line;
        next.last_speaker = Some(side);
        next.round_count += 1;
        next
    }
}

/// Three-way risk panel transcript and turn accounting.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RiskState {
    pub history: String,
    pub aggressive_history: String,
    pub conservative_history: String,
    pub neutral_history: String,
    pub current_aggressive_response: String,
    pub current_conservative_response: String,
    pub current_neutral_response: String,
    pub last_speaker: Option<RiskPosture>,
    /// One increment per risk advocate turn.
    pub round_count: u32,
    pub judge_decision: Option<String>,
}

impl RiskState {
    pub fn latest_response(&self, posture: RiskPosture) -> &str {
        match posture {
            RiskPosture::Aggressive => &self.current_aggressive_response,
            RiskPosture::Conservative => &self.current_conservative_response,
            RiskPosture::Neutral => &self.current_neutral_response,
        }
    }

    /// Number of completed cycles (every posture spoke once).
    pub fn cycles(&self) -> u32 {
        self.round_count / RiskPosture::ORDER.len() as u32
    }

    /// Record one risk advocate turn.
    pub fn with_turn(&self, posture: RiskPosture, argument: &str) -> Self {
        let mut next = self.clone();
        let line = format!("{}: {}", posture.label(), argument);
        append_line(&mut next.history, &line);
        let (own_history, latest) = match posture {
            RiskPosture::Aggressive => (
                &mut next.aggressive_history,
                &mut next.current_aggressive_response,
            ),
            RiskPosture::Conservative => (
                &mut next.conservative_history,
                &mut next.current_conservative_response,
            ),
            RiskPosture::Neutral => (
                &mut next.neutral_history,
                &mut next.current_neutral_response,
            ),
        };
        append_line(own_history, &line);
        *latest = line;
        next.last_speaker = Some(posture);
        next.round_count += 1;
        next
    }
}

fn append_line(buf: &mut String, line: &str) {
    if !buf.is_empty() {
        buf.push('\n');
    }
    buf.push_str(line);
}

/// Tool-call rounds consumed by each analyst in the current run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallCounts {
    pub market: u32,
    pub sentiment: u32,
    pub news: u32,
    pub fundamentals: u32,
}

impl ToolCallCounts {
    pub fn get(&self, domain: Domain) -> u32 {
        match domain {
            Domain::Market => self.market,
            Domain::Sentiment => self.sentiment,
            Domain::News => self.news,
            Domain::Fundamentals => self.fundamentals,
        }
    }

    fn add(&mut self, domain: Domain, rounds: u32) {
        let slot = match domain {
            Domain::Market => &mut self.market,
            Domain::Sentiment => &mut self.sentiment,
            Domain::News => &mut self.news,
            Domain::Fundamentals => &mut self.fundamentals,
        };
        *slot += rounds;
    }
}

/// How a stage changes the conversation history.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagesUpdate {
    Append(Vec<Message>),
    /// Used by the context pruner.
    Replace(Vec<Message>),
}

/// Partial update returned by a stage and merged by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    pub messages: Option<MessagesUpdate>,
    pub reports: Vec<(Domain, String)>,
    /// Tool-call rounds to charge against the producing stage's domain.
    pub tool_call_rounds: u32,
    pub debate: Option<DebateState>,
    pub investment_plan: Option<String>,
    pub trader_plan: Option<String>,
    pub risk: Option<RiskState>,
    pub final_decision: Option<String>,
}

impl StateDelta {
    pub fn append_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(MessagesUpdate::Append(messages));
        self
    }

    pub fn replace_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(MessagesUpdate::Replace(messages));
        self
    }

    pub fn with_report(mut self, domain: Domain, text: impl Into<String>) -> Self {
        self.reports.push((domain, text.into()));
        self
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum StateError {
    #[error("report for {0} was already written this run")]
    ReportAlreadyWritten(Domain),

    #[error("final decision was already set")]
    FinalDecisionAlreadySet,

    #[error("{stage} round counter went backwards: {from} -> {to}")]
    RoundCountDecreased {
        stage: &'static str,
        from: u32,
        to: u32,
    },

    #[error("stage {0} charged tool-call rounds but has no analyst domain")]
    ToolRoundsWithoutDomain(StageId),
}

/// The single record threaded through every stage of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedState {
    instrument_id: String,
    as_of_date: NaiveDate,
    messages: Vec<Message>,
    reports: Reports,
    debate: DebateState,
    investment_plan: Option<String>,
    trader_plan: Option<String>,
    risk: RiskState,
    tool_call_counts: ToolCallCounts,
    final_decision: Option<String>,
}

impl SharedState {
    /// Fresh state for one run, seeded with a single user turn naming the subject.
    pub fn new(instrument_id: impl Into<String>, as_of_date: NaiveDate) -> Self {
        let instrument_id = instrument_id.into();
        let seed = Message::user(format!("Analyze {instrument_id} as of {as_of_date}"));
        Self {
            instrument_id,
            as_of_date,
            messages: vec![seed],
            reports: Reports::default(),
            debate: DebateState::default(),
            investment_plan: None,
            trader_plan: None,
            risk: RiskState::default(),
            tool_call_counts: ToolCallCounts::default(),
            final_decision: None,
        }
    }

    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    pub fn as_of_date(&self) -> NaiveDate {
        self.as_of_date
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn reports(&self) -> &Reports {
        &self.reports
    }

    pub fn debate(&self) -> &DebateState {
        &self.debate
    }

    pub fn investment_plan(&self) -> Option<&str> {
        self.investment_plan.as_deref()
    }

    pub fn trader_plan(&self) -> Option<&str> {
        self.trader_plan.as_deref()
    }

    pub fn risk(&self) -> &RiskState {
        &self.risk
    }

    pub fn tool_call_counts(&self) -> &ToolCallCounts {
        &self.tool_call_counts
    }

    pub fn final_decision(&self) -> Option<&str> {
        self.final_decision.as_deref()
    }

    /// Merge a stage's delta. Either the whole delta applies or none of it does.
    pub fn apply(&mut self, stage: StageId, delta: StateDelta) -> Result<(), StateError> {
        self.validate(stage, &delta)?;

        let StateDelta {
            messages,
            reports,
            tool_call_rounds,
            debate,
            investment_plan,
            trader_plan,
            risk,
            final_decision,
        } = delta;

        match messages {
            Some(MessagesUpdate::Append(mut turns)) => self.messages.append(&mut turns),
            Some(MessagesUpdate::Replace(turns)) => self.messages = turns,
            None => {}
        }
        for (domain, text) in reports {
            *self.reports.slot_mut(domain) = Some(text);
        }
        if let Some(domain) = stage.domain() {
            self.tool_call_counts.add(domain, tool_call_rounds);
        }
        if let Some(debate) = debate {
            self.debate = debate;
        }
        if investment_plan.is_some() {
            self.investment_plan = investment_plan;
        }
        if trader_plan.is_some() {
            self.trader_plan = trader_plan;
        }
        if let Some(risk) = risk {
            self.risk = risk;
        }
        if final_decision.is_some() {
            self.final_decision = final_decision;
        }
        Ok(())
    }

    fn validate(&self, stage: StageId, delta: &StateDelta) -> Result<(), StateError> {
        for (i, (domain, _)) in delta.reports.iter().enumerate() {
            let repeated = delta.reports[..i].iter().any(|(d, _)| d == domain);
            if repeated || self.reports.get(*domain).is_some() {
                return Err(StateError::ReportAlreadyWritten(*domain));
            }
        }
        if delta.tool_call_rounds > 0 && stage.domain().is_none() {
            return Err(StateError::ToolRoundsWithoutDomain(stage));
        }
        if let Some(debate) = &delta.debate {
            if debate.round_count < self.debate.round_count {
                return Err(StateError::RoundCountDecreased {
                    stage: "debate",
                    from: self.debate.round_count,
                    to: debate.round_count,
                });
            }
        }
        if let Some(risk) = &delta.risk {
            if risk.round_count < self.risk.round_count {
                return Err(StateError::RoundCountDecreased {
                    stage: "risk",
                    from: self.risk.round_count,
                    to: risk.round_count,
                });
            }
        }
        if delta.final_decision.is_some() && self.final_decision.is_some() {
            return Err(StateError::FinalDecisionAlreadySet);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SharedState {
        SharedState::new("AAPL", NaiveDate::from_ymd_opt(2024, 5, 10).unwrap())
    }

    #[test]
    fn new_state_is_seeded_and_empty() {
        let s = state();
        assert_eq!(s.instrument_id(), "AAPL");
        assert_eq!(s.messages().len(), 1);
        assert_eq!(s.reports().populated_count(), 0);
        assert_eq!(s.debate().round_count, 0);
        assert!(s.final_decision().is_none());
    }

    #[test]
    fn report_is_written_once() {
        let mut s = state();
        let stage = StageId::Analyst(Domain::News);
        s.apply(stage, StateDelta::default().with_report(Domain::News, "calm"))
            .unwrap();
        let err = s
            .apply(stage, StateDelta::default().with_report(Domain::News, "again"))
            .unwrap_err();
        assert_eq!(err, StateError::ReportAlreadyWritten(Domain::News));
        assert_eq!(s.reports().get(Domain::News), Some("calm"));
    }

    #[test]
    fn rejected_delta_leaves_state_untouched() {
        let mut s = state();
        s.apply(
            StageId::RiskJudge,
            StateDelta {
                final_decision: Some("BUY".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        let before = s.clone();
        let delta = StateDelta {
            final_decision: Some("SELL".to_string()),
            ..Default::default()
        }
        .append_messages(vec![Message::assistant("late")]);
        assert_eq!(
            s.apply(StageId::RiskJudge, delta),
            Err(StateError::FinalDecisionAlreadySet)
        );
        assert_eq!(s, before);
    }

    #[test]
    fn tool_rounds_charge_the_stage_domain() {
        let mut s = state();
        let delta = StateDelta {
            tool_call_rounds: 1,
            ..Default::default()
        };
        s.apply(StageId::ToolCalls(Domain::Fundamentals), delta.clone())
            .unwrap();
        s.apply(StageId::ToolCalls(Domain::Fundamentals), delta.clone())
            .unwrap();
        assert_eq!(s.tool_call_counts().get(Domain::Fundamentals), 2);
        assert_eq!(s.tool_call_counts().get(Domain::Market), 0);

        assert!(matches!(
            s.apply(StageId::Trader, delta),
            Err(StateError::ToolRoundsWithoutDomain(StageId::Trader))
        ));
    }

    #[test]
    fn debate_counter_cannot_go_backwards() {
        let mut s = state();
        let advanced = s.debate().with_turn(DebateSide::Bull, "growth");
        s.apply(
            StageId::Advocate(DebateSide::Bull),
            StateDelta {
                debate: Some(advanced),
                ..Default::default()
            },
        )
        .unwrap();

        let err = s
            .apply(
                StageId::Advocate(DebateSide::Bear),
                StateDelta {
                    debate: Some(DebateState::default()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StateError::RoundCountDecreased { from: 1, to: 0, .. }));
    }

    #[test]
    fn debate_turns_accumulate_per_side() {
        let debate = DebateState::default()
            .with_turn(DebateSide::Bull, "margins expanding")
            .with_turn(DebateSide::Bear, "valuation stretched");
        assert_eq!(debate.round_count, 2);
        assert_eq!(debate.last_speaker, Some(DebateSide::Bear));
        assert_eq!(debate.bull_history, "Bull Analyst: margins expanding");
        assert_eq!(debate.current_response, "Bear Analyst: valuation stretched");
        assert_eq!(debate.history.lines().count(), 2);
    }

    #[test]
    fn risk_turns_track_latest_per_posture() {
        let risk = RiskState::default()
            .with_turn(RiskPosture::Aggressive, "size up")
            .with_turn(RiskPosture::Conservative, "hedge")
            .with_turn(RiskPosture::Neutral, "half size");
        assert_eq!(risk.cycles(), 1);
        assert_eq!(
            risk.latest_response(RiskPosture::Conservative),
            "Safe Analyst: hedge"
        );
        assert_eq!(risk.last_speaker, Some(RiskPosture::Neutral));
    }

    #[test]
    fn replace_messages_swaps_history() {
        let mut s = state();
        s.apply(
            StageId::PruneContext(Domain::Market),
            StateDelta::default().replace_messages(vec![Message::assistant("summary")]),
        )
        .unwrap();
        assert_eq!(s.messages().len(), 1);
        assert_eq!(s.messages()[0].content, "summary");
    }

    #[test]
    fn situation_joins_all_domains() {
        let reports = Reports {
            market: Some("m".to_string()),
            news: Some("n".to_string()),
            ..Default::default()
        };
        assert_eq!(reports.situation(), "m\n\n\n\nn\n\n");
    }

    #[test]
    fn roundtrip_shared_state() {
        let mut s = state();
        s.apply(
            StageId::Analyst(Domain::Market),
            StateDelta::default().with_report(Domain::Market, "uptrend"),
        )
        .unwrap();
        let json = serde_json::to_string(&s).unwrap();
        let parsed: SharedState = serde_json::from_str(&json).unwrap();
        assert_eq!(s, parsed);
    }
}
