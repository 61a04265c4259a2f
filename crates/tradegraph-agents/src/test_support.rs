//! Deterministic stubs for exercising the workflow without a real backend.
//!
//! Backends here never touch the network: they return fixed text, always ask
//! for a tool, fail, sleep, or cancel the run they are part of. The helpers at
//! the bottom assemble a complete engine from these stubs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tradegraph_models::message::{Message, Role, ToolCall};
use tradegraph_models::stage::StageId;
use tradegraph_models::state::{SharedState, StateDelta};

use crate::backend::{BackendResponse, ReasoningBackend, ToolSpec};
use crate::engine::{EngineBuilder, WorkflowEngine, WorkflowLimits};
use crate::error::{AgentError, WorkflowError};
use crate::graph::AnalystSelection;
use crate::stage::{failure_text, Stage};
use crate::tools::Tool;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct CallLog {
    system_prompts: Vec<String>,
    user_prompts: Vec<String>,
    bound_tools: Vec<usize>,
}

impl CallLog {
    fn record(&mut self, messages: &[Message], tools: &[ToolSpec]) {
        let last_of = |role| {
            messages
                .iter()
                .rev()
                .find(|m| m.role == role)
                .map(|m| m.content.clone())
                .unwrap_or_default()
        };
        self.system_prompts.push(last_of(Role::System));
        self.user_prompts.push(last_of(Role::User));
        self.bound_tools.push(tools.len());
    }
}

/// Returns the same text for every call and never requests tools.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    text: String,
    log: Mutex<CallLog>,
}

impl ScriptedBackend {
    pub fn fixed(text: &str) -> Self {
        Self {
            text: text.to_string(),
            log: Mutex::default(),
        }
    }

    pub fn calls(&self) -> usize {
        lock(&self.log).bound_tools.len()
    }

    pub fn last_system_prompt(&self) -> Option<String> {
        lock(&self.log).system_prompts.last().cloned()
    }

    pub fn last_user_prompt(&self) -> Option<String> {
        lock(&self.log).user_prompts.last().cloned()
    }

    pub fn system_prompts(&self) -> Vec<String> {
        lock(&self.log).system_prompts.clone()
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<BackendResponse, AgentError> {
        lock(&self.log).record(messages, tools);
        Ok(BackendResponse::text(self.text.clone()))
    }
}

/// Requests the named tool on every call, whether or not tools are bound.
#[derive(Debug)]
pub struct ToolHungryBackend {
    tool: String,
    log: Mutex<CallLog>,
}

impl ToolHungryBackend {
    pub fn new(tool: &str) -> Self {
        Self {
            tool: tool.to_string(),
            log: Mutex::default(),
        }
    }

    pub fn calls(&self) -> usize {
        lock(&self.log).bound_tools.len()
    }

    /// Number of tools bound on each call, in order.
    pub fn bound_tool_counts(&self) -> Vec<usize> {
        lock(&self.log).bound_tools.clone()
    }
}

#[async_trait]
impl ReasoningBackend for ToolHungryBackend {
    fn name(&self) -> &str {
        "tool-hungry"
    }

    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<BackendResponse, AgentError> {
        let call_number = {
            let mut log = lock(&self.log);
            log.record(messages, tools);
            log.bound_tools.len()
        };
        Ok(BackendResponse {
            text: String::new(),
            tool_calls: vec![ToolCall {
                id: format!("call-{call_number}"),
                name: self.tool.clone(),
                args: serde_json::json!({"ticker": "TICK1"}),
            }],
        })
    }
}

/// Fails every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingBackend;

#[async_trait]
impl ReasoningBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    async fn invoke(
        &self,
        _messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<BackendResponse, AgentError> {
        Err(AgentError::Backend("backend unavailable".to_string()))
    }
}

/// Sleeps before answering "ok". Used to trip stage timeouts.
#[derive(Debug, Clone, Copy)]
pub struct SlowBackend {
    delay: Duration,
}

impl SlowBackend {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl ReasoningBackend for SlowBackend {
    fn name(&self) -> &str {
        "slow"
    }

    async fn invoke(
        &self,
        _messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<BackendResponse, AgentError> {
        tokio::time::sleep(self.delay).await;
        Ok(BackendResponse::text("ok"))
    }
}

/// Cancels `token` on its first call, then answers like `inner`.
pub struct CancelOnInvoke {
    inner: Arc<dyn ReasoningBackend>,
    token: CancellationToken,
}

impl CancelOnInvoke {
    pub fn new(inner: Arc<dyn ReasoningBackend>, token: CancellationToken) -> Self {
        Self { inner, token }
    }
}

#[async_trait]
impl ReasoningBackend for CancelOnInvoke {
    fn name(&self) -> &str {
        "cancel-on-invoke"
    }

    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<BackendResponse, AgentError> {
        self.token.cancel();
        self.inner.invoke(messages, tools).await
    }
}

/// A stage that panics whenever it runs.
pub struct PanickingStage(pub StageId);

#[async_trait]
impl Stage for PanickingStage {
    fn id(&self) -> StageId {
        self.0
    }

    async fn execute(&self, _state: &SharedState) -> Result<StateDelta, AgentError> {
        panic!("analyst exploded");
    }

    fn failure_delta(&self, _state: &SharedState, reason: &str) -> StateDelta {
        match self.0 {
            StageId::Analyst(domain) => StateDelta::default()
                .append_messages(vec![Message::assistant(failure_text(reason)).from_stage(self.0)])
                .with_report(domain, failure_text(reason)),
            _ => StateDelta::default(),
        }
    }
}

/// Tool with a fixed answer, or a fixed failure.
#[derive(Debug, Clone)]
pub struct StubTool {
    name: String,
    output: Result<String, String>,
    calls: Arc<AtomicUsize>,
}

impl StubTool {
    pub fn new(name: &str, output: &str) -> Self {
        Self {
            name: name.to_string(),
            output: Ok(output.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            output: Err("provider returned 503".to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter, still readable after the tool moves into a registry.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Tool for StubTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "stub data tool"
    }

    async fn invoke(&self, _args: &Value) -> Result<String, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.output.clone().map_err(AgentError::Tool)
    }
}

/// Fresh state for instrument `TICK1` on 2024-01-02.
pub fn tick1_state() -> SharedState {
    let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap_or_default();
    SharedState::new("TICK1", date)
}

/// Default bounds with a short stage timeout.
pub fn fast_limits() -> WorkflowLimits {
    WorkflowLimits {
        max_debate_rounds: 1,
        max_risk_cycles: 1,
        max_tool_calls: 3,
        memory_matches: 2,
        stage_timeout: Duration::from_secs(10),
        run_timeout: None,
        max_steps: 256,
        summarize_threshold_chars: 3000,
    }
}

/// Engine whose every stage is served by one backend.
pub fn try_stub_engine(
    limits: WorkflowLimits,
    selection: AnalystSelection,
    backend: Arc<dyn ReasoningBackend>,
) -> Result<WorkflowEngine, WorkflowError> {
    EngineBuilder::new(limits).backend(backend).build(&selection)
}

/// Engine answering "`text`" at every stage.
///
/// # Panics
/// If the selection is invalid.
pub fn stub_engine(limits: WorkflowLimits, selection: AnalystSelection, text: &str) -> WorkflowEngine {
    match try_stub_engine(limits, selection, Arc::new(ScriptedBackend::fixed(text))) {
        Ok(engine) => engine,
        Err(e) => panic!("invalid stub engine: {e}"),
    }
}
