use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use tradegraph_models::config::ToolConfig;
use tradegraph_models::message::{Message, ToolCall};
use tradegraph_models::stage::{Domain, StageId};
use tradegraph_models::state::{SharedState, StateDelta};

use crate::backend::ToolSpec;
use crate::error::AgentError;
use crate::stage::{failure_text, Stage};

/// An external data provider an analyst may call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn invoke(&self, args: &Value) -> Result<String, AgentError>;
}

/// Tools grouped by the analyst domain allowed to call them.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    by_domain: HashMap<Domain, Vec<Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One `CommandTool` per configured entry.
    pub fn from_config(tools: &[ToolConfig]) -> Self {
        let mut registry = Self::new();
        for config in tools {
            registry.register(config.domain, Arc::new(CommandTool::from_config(config)));
        }
        registry
    }

    pub fn register(&mut self, domain: Domain, tool: Arc<dyn Tool>) {
        self.by_domain.entry(domain).or_default().push(tool);
    }

    pub fn for_domain(&self, domain: Domain) -> &[Arc<dyn Tool>] {
        self.by_domain
            .get(&domain)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The restricted subset bound when a domain's analyst calls the backend.
    pub fn specs(&self, domain: Domain) -> Vec<ToolSpec> {
        self.for_domain(domain)
            .iter()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
            })
            .collect()
    }

    pub fn find(&self, domain: Domain, name: &str) -> Option<Arc<dyn Tool>> {
        self.for_domain(domain)
            .iter()
            .find(|tool| tool.name() == name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.by_domain.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs an external command with the JSON args on stdin and returns stdout.
#[derive(Debug, Clone)]
pub struct CommandTool {
    name: String,
    description: String,
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandTool {
    pub fn from_config(config: &ToolConfig) -> Self {
        Self {
            name: config.name.clone(),
            description: config.description.clone(),
            command: config.command.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    async fn run(&self, input: Vec<u8>) -> Result<String, AgentError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Tool(format!("failed to spawn {}: {e}", self.command)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&input)
                .await
                .map_err(|e| AgentError::Tool(format!("failed to write args: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| AgentError::Tool(format!("failed to wait for {}: {e}", self.command)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::Tool(format!(
                "{} exited {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, args: &Value) -> Result<String, AgentError> {
        let input = serde_json::to_vec(args)?;
        tokio::time::timeout(self.timeout, self.run(input))
            .await
            .map_err(|_| AgentError::Timeout(self.timeout.as_secs()))?
    }
}

/// Executes the tool calls requested by one analyst's latest turn and folds
/// the results back into the conversation as tool turns.
///
/// Every execution charges one tool-call round to the analyst's domain. Tool
/// failures become error results; they never fail the stage.
pub struct ToolCallAdapter {
    domain: Domain,
    registry: Arc<ToolRegistry>,
}

impl ToolCallAdapter {
    pub fn new(domain: Domain, registry: Arc<ToolRegistry>) -> Self {
        Self { domain, registry }
    }

    /// Calls from the analyst's latest turn, if that turn is still awaiting results.
    fn pending_calls<'a>(&self, state: &'a SharedState) -> &'a [ToolCall] {
        let analyst = StageId::Analyst(self.domain);
        state
            .messages()
            .iter()
            .rev()
            .find(|m| m.stage == Some(analyst))
            .filter(|m| m.requests_tools())
            .map(|m| m.tool_calls.as_slice())
            .unwrap_or_default()
    }

    async fn run_call(&self, call: &ToolCall) -> Message {
        let stage = StageId::ToolCalls(self.domain);
        let Some(tool) = self.registry.find(self.domain, &call.name) else {
            warn!(stage = %stage, tool = %call.name, "Requested tool is not bound to this analyst");
            return Message::tool_result(call, format!("{}: unknown tool", call.name), true)
                .from_stage(stage);
        };

        match tool.invoke(&call.args).await {
            Ok(output) if output.trim().is_empty() => {
                Message::tool_result(call, format!("{}: returned no data", call.name), true)
                    .from_stage(stage)
            }
            Ok(output) => {
                debug!(stage = %stage, tool = %call.name, chars = output.len(), "Tool returned");
                Message::tool_result(call, output, false).from_stage(stage)
            }
            Err(e) => {
                warn!(stage = %stage, tool = %call.name, error = %e, "Tool failed");
                Message::tool_result(call, format!("{}: {e}", call.name), true).from_stage(stage)
            }
        }
    }
}

#[async_trait]
impl Stage for ToolCallAdapter {
    fn id(&self) -> StageId {
        StageId::ToolCalls(self.domain)
    }

    async fn execute(&self, state: &SharedState) -> Result<StateDelta, AgentError> {
        let mut results = Vec::new();
        for call in self.pending_calls(state) {
            results.push(self.run_call(call).await);
        }
        Ok(StateDelta {
            tool_call_rounds: 1,
            ..Default::default()
        }
        .append_messages(results))
    }

    fn failure_delta(&self, state: &SharedState, reason: &str) -> StateDelta {
        let stage = self.id();
        let results = self
            .pending_calls(state)
            .iter()
            .map(|call| Message::tool_result(call, failure_text(reason), true).from_stage(stage))
            .collect();
        StateDelta {
            tool_call_rounds: 1,
            ..Default::default()
        }
        .append_messages(results)
    }
}
