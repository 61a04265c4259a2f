use async_trait::async_trait;
use serde::Serialize;
use tradegraph_models::message::{Message, ToolCall};

use crate::error::AgentError;

/// A tool the backend may request, as advertised to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
}

/// Text plus any tool invocations the backend asked for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl BackendResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// The reasoning backend. Mockable for testing.
///
/// `tools` is the subset bound for this invocation; an empty slice means the
/// backend must answer directly.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<BackendResponse, AgentError>;
}
