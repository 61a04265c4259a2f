use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};
use tradegraph_models::message::{Message, Role};

use crate::backend::{BackendResponse, ReasoningBackend, ToolSpec};
use crate::error::AgentError;
use crate::parser::parse_tool_calls;

/// Configuration for a Claude CLI invocation.
#[derive(Debug, Clone)]
pub struct ClaudeCliConfig {
    pub model: String,
    pub timeout: Duration,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-haiku-latest".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Invoke the `claude` CLI with a system prompt and user prompt.
/// Returns the raw stdout text.
pub async fn invoke_claude(
    system_prompt: &str,
    user_prompt: &str,
    config: &ClaudeCliConfig,
) -> Result<String, AgentError> {
    debug!(model = %config.model, prompt_chars = user_prompt.len(), "Invoking claude CLI");

    let result = tokio::time::timeout(config.timeout, async {
        Command::new("claude")
            .args([
                "-p",
                user_prompt,
                "--system-prompt",
                system_prompt,
                "--model",
                &config.model,
                "--output-format",
                "text",
            ])
            .kill_on_drop(true)
            .output()
            .await
    })
    .await
    .map_err(|_| AgentError::Timeout(config.timeout.as_secs()))?
    .map_err(|e| AgentError::Cli(format!("Failed to spawn claude: {e}")))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        warn!(status = %result.status, stderr = %stderr, "Claude CLI failed");
        return Err(AgentError::Cli(format!(
            "claude exited {}: {}",
            result.status, stderr
        )));
    }

    let stdout = String::from_utf8_lossy(&result.stdout).to_string();
    if stdout.trim().is_empty() {
        return Err(AgentError::Cli(
            "Claude returned empty response".to_string(),
        ));
    }

    Ok(stdout)
}

/// Check if the `claude` CLI is available on the system.
pub async fn check_cli_available() -> bool {
    match Command::new("claude").arg("--version").output().await {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

/// Reasoning backend that shells out to the `claude` CLI.
///
/// System turns become the system prompt; every other turn is rendered into a
/// plain-text transcript. Tool calls travel as a JSON envelope in the reply.
#[derive(Debug, Clone)]
pub struct ClaudeCliBackend {
    config: ClaudeCliConfig,
}

impl ClaudeCliBackend {
    pub fn new(config: ClaudeCliConfig) -> Self {
        Self { config }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl ReasoningBackend for ClaudeCliBackend {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<BackendResponse, AgentError> {
        let mut system_prompt = render_system(messages);
        if !tools.is_empty() {
            system_prompt.push_str("\n\n");
            system_prompt.push_str(&tool_instructions(tools));
        }
        let transcript = render_transcript(messages);

        let raw = invoke_claude(&system_prompt, &transcript, &self.config).await?;
        let tool_calls = parse_tool_calls(&raw, tools);
        debug!(
            model = %self.config.model,
            reply_chars = raw.len(),
            tool_calls = tool_calls.len(),
            "Claude CLI replied"
        );

        let text = if tool_calls.is_empty() {
            raw.trim().to_string()
        } else {
            String::new()
        };
        Ok(BackendResponse { text, tool_calls })
    }
}

fn render_system(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages.iter().filter(|m| m.role != Role::System) {
        let heading = match message.role {
            Role::User => "USER".to_string(),
            Role::Assistant => "ASSISTANT".to_string(),
            Role::Tool if message.is_error => "TOOL RESULT (error)".to_string(),
            Role::Tool => "TOOL RESULT".to_string(),
            Role::System => continue,
        };
        out.push_str(&format!("### {heading}\n"));
        if !message.content.is_empty() {
            out.push_str(&message.content);
            out.push('\n');
        }
        for call in &message.tool_calls {
            out.push_str(&format!("(requested tool {} with {})\n", call.name, call.args));
        }
        out.push('\n');
    }
    out
}

fn tool_instructions(tools: &[ToolSpec]) -> String {
    let listing = tools
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"## AVAILABLE TOOLS
{listing}

To request data, reply with ONLY a JSON object and nothing else:
{{"tool_calls": [{{"name": "<tool name>", "args": {{"ticker": "<ticker>", "date": "<YYYY-MM-DD>"}}}}]}}

When you have enough data, reply with your report as plain text instead."#
    )
}
