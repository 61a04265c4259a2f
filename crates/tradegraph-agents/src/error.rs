use thiserror::Error;
use tradegraph_models::stage::{Domain, StageId};

/// Failures inside a single stage. The engine converts these into degraded
/// stage output; they never abort a run.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Claude CLI error: {0}")]
    Cli(String),

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Stage panicked: {0}")]
    Panicked(String),

    #[error("Store error: {0}")]
    Store(#[from] tradegraph_store::StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fatal configuration errors, raised before a run starts.
#[derive(Error, Debug, PartialEq)]
pub enum WorkflowError {
    #[error("no analysts selected")]
    NoAnalysts,

    #[error("unknown analyst: {0}")]
    UnknownAnalyst(String),

    #[error("analyst selected twice: {0}")]
    DuplicateAnalyst(Domain),

    #[error("routing table targets {0} but no stage is registered for it")]
    UnknownStage(StageId),

    #[error("no {0} reasoning backend configured")]
    MissingBackend(&'static str),
}
