//! tradegraph - multi-stage trading recommendation workflow
//!
//! Runs analyst reports, a bull/bear debate, a trader synthesis and a
//! three-way risk review for one instrument, and returns the final decision
//! together with the full state for audit.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use tradegraph::models::{AnalysisRequest, TradegraphConfig};
//! use tradegraph::agents::{AnalystSelection, WorkflowEngine};
//! use tradegraph::store::RunArchive;
//! ```

pub use tradegraph_agents as agents;
pub use tradegraph_models as models;
pub use tradegraph_store as store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tradegraph_agents::claude_cli::{ClaudeCliBackend, ClaudeCliConfig};
use tradegraph_agents::{
    AnalystSelection, EngineBuilder, MemoryBank, ToolRegistry, WorkflowEngine, WorkflowError,
    WorkflowLimits,
};
use tradegraph_models::config::TradegraphConfig;
use tradegraph_models::request::{AnalysisRequest, AnalysisResponse};
use tradegraph_models::state::SharedState;
use tradegraph_store::{RunArchive, RunStore, SqliteMemory, StoreError};
use uuid::Uuid;

/// Analyst selection for a request: its `analyst_set`, else the configured list.
pub fn resolve_selection(
    config: &TradegraphConfig,
    request: &AnalysisRequest,
) -> Result<AnalystSelection, WorkflowError> {
    match &request.analyst_set {
        Some(names) => AnalystSelection::from_names(names.as_slice()),
        None => AnalystSelection::from_names(config.workflow.analysts.as_slice()),
    }
}

/// Build an engine backed by the Claude CLI, configured tools and memory.
pub fn build_engine(
    config: &TradegraphConfig,
    selection: &AnalystSelection,
) -> Result<WorkflowEngine, anyhow::Error> {
    let timeout = Duration::from_secs(config.backend.timeout_seconds);
    let quick = ClaudeCliBackend::new(ClaudeCliConfig {
        model: config.backend.quick_model.clone(),
        timeout,
    });
    let deep = ClaudeCliBackend::new(ClaudeCliConfig {
        model: config.backend.deep_model.clone(),
        timeout,
    });

    let memory = match &config.memory {
        Some(memory) => MemoryBank::from_store(Arc::new(SqliteMemory::open(&memory.sqlite_path)?)),
        None => MemoryBank::default(),
    };

    let engine = EngineBuilder::new(WorkflowLimits::from(&config.workflow))
        .quick_backend(Arc::new(quick))
        .deep_backend(Arc::new(deep))
        .tools(ToolRegistry::from_config(&config.tools))
        .memory(memory)
        .build(selection)?;
    Ok(engine)
}

/// Open the run archive when persistence is configured.
pub fn open_archive(config: &TradegraphConfig) -> Result<Option<RunArchive>, StoreError> {
    let Some(persistence) = &config.persistence else {
        return Ok(None);
    };
    let store = RunStore::open(&persistence.sqlite_path)?;
    Ok(Some(RunArchive::new(
        store,
        persistence.memory_max_capacity,
        Duration::from_secs(persistence.memory_ttl_seconds),
    )))
}

/// Run one analysis. Always returns a response; archive failures are logged.
pub async fn analyze(
    engine: &WorkflowEngine,
    request: &AnalysisRequest,
    archive: Option<&RunArchive>,
    cancel: &CancellationToken,
) -> AnalysisResponse {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let started = Instant::now();
    info!(run_id = %run_id, instrument = %request.instrument_id, "Starting analysis");

    let state = SharedState::new(request.instrument_id.clone(), request.as_of_date);
    let outcome = engine.run(state, cancel).await;
    let response = outcome.into_response(run_id, started_at, started.elapsed().as_millis() as u64);

    if let Some(archive) = archive {
        if let Err(e) = archive.save(&response).await {
            warn!(run_id = %run_id, error = %e, "Failed to archive run");
        }
    }
    response
}
