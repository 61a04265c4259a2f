use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An information domain covered by one analyst report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Market,
    Sentiment,
    News,
    Fundamentals,
}

impl Domain {
    pub const ALL: [Domain; 4] = [
        Domain::Market,
        Domain::Sentiment,
        Domain::News,
        Domain::Fundamentals,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Sentiment => "sentiment",
            Self::News => "news",
            Self::Fundamentals => "fundamentals",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = String;

    /// Accepts `social` as an alias for `sentiment`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "market" => Ok(Self::Market),
            "sentiment" | "social" => Ok(Self::Sentiment),
            "news" => Ok(Self::News),
            "fundamentals" => Ok(Self::Fundamentals),
            other => Err(format!("unknown analyst domain: {other}")),
        }
    }
}

/// The two sides of the investment debate. Bull always opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateSide {
    Bull,
    Bear,
}

impl DebateSide {
    pub const OPENING: DebateSide = DebateSide::Bull;

    pub fn opponent(self) -> Self {
        match self {
            Self::Bull => Self::Bear,
            Self::Bear => Self::Bull,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Bull => "Bull Analyst",
            Self::Bear => "Bear Analyst",
        }
    }
}

/// Risk postures of the review panel, in speaking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskPosture {
    Aggressive,
    Conservative,
    Neutral,
}

impl RiskPosture {
    pub const ORDER: [RiskPosture; 3] = [
        RiskPosture::Aggressive,
        RiskPosture::Conservative,
        RiskPosture::Neutral,
    ];

    /// The posture that speaks after this one.
    pub fn successor(self) -> Self {
        match self {
            Self::Aggressive => Self::Conservative,
            Self::Conservative => Self::Neutral,
            Self::Neutral => Self::Aggressive,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Aggressive => "Risky Analyst",
            Self::Conservative => "Safe Analyst",
            Self::Neutral => "Neutral Analyst",
        }
    }
}

/// Identifier of a node in the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "stage", content = "of")]
pub enum StageId {
    Analyst(Domain),
    /// Tool-Call Adapter bound to one analyst.
    ToolCalls(Domain),
    /// Context Pruner run after one analyst completes.
    PruneContext(Domain),
    UnifiedAnalyst,
    Advocate(DebateSide),
    ResearchJudge,
    Trader,
    RiskAdvocate(RiskPosture),
    RiskJudge,
}

impl StageId {
    /// The analyst domain this stage belongs to, if any.
    pub fn domain(self) -> Option<Domain> {
        match self {
            Self::Analyst(d) | Self::ToolCalls(d) | Self::PruneContext(d) => Some(d),
            _ => None,
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analyst(d) => write!(f, "{d} analyst"),
            Self::ToolCalls(d) => write!(f, "{d} tools"),
            Self::PruneContext(d) => write!(f, "{d} prune"),
            Self::UnifiedAnalyst => write!(f, "unified analyst"),
            Self::Advocate(side) => write!(f, "{}", side.label()),
            Self::ResearchJudge => write!(f, "Research Manager"),
            Self::Trader => write!(f, "Trader"),
            Self::RiskAdvocate(p) => write!(f, "{}", p.label()),
            Self::RiskJudge => write!(f, "Risk Judge"),
        }
    }
}
