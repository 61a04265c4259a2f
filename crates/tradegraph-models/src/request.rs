use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stage::StageId;
use crate::state::SharedState;

/// Inbound analysis request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRequest {
    pub instrument_id: String,
    pub as_of_date: NaiveDate,
    /// Analyst domains to run in order, or `["unified"]`. Falls back to configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyst_set: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The risk judge wrote the final decision.
    Completed,
    /// Stopped at a stage boundary by a cancellation signal or the run timeout.
    Cancelled,
    /// Stopped by the engine's step limit.
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    /// The stage errored, timed out or panicked; a degraded value was recorded.
    Failed { reason: String },
    /// The stage's delta broke a state invariant and was discarded.
    Rejected { reason: String },
}

/// One stage invocation in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    pub step: u32,
    pub stage: StageId,
    pub outcome: StepOutcome,
    pub elapsed_ms: u64,
}

/// Response for one run. Absence of `final_decision` signals non-completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResponse {
    pub run_id: Uuid,
    pub instrument_id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_decision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub full_state: SharedState,
    pub steps: Vec<StepRecord>,
    pub started_at: DateTime<Utc>,
    pub processing_time_ms: u64,
}
