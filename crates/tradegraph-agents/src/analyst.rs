use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};
use tradegraph_models::message::Message;
use tradegraph_models::stage::{Domain, StageId};
use tradegraph_models::state::{SharedState, StateDelta};

use crate::backend::ReasoningBackend;
use crate::error::AgentError;
use crate::parser::parse_unified_reports;
use crate::prompts;
use crate::stage::{failure_text, Stage};
use crate::tools::ToolRegistry;

/// Raw unified-mode payloads are cut to this many characters before summarizing.
const SUMMARY_INPUT_LIMIT: usize = 8000;

/// Produces the report for one information domain.
///
/// Each invocation is one backend call. A reply that requests tools is
/// recorded as a pending turn and the graph routes to the Tool-Call Adapter;
/// any other reply is the report. Once the domain's tool-call budget is spent
/// no tools are bound and tool requests in the reply are ignored.
pub struct AnalystStage {
    domain: Domain,
    backend: Arc<dyn ReasoningBackend>,
    tools: Arc<ToolRegistry>,
    max_tool_calls: u32,
}

impl AnalystStage {
    pub fn new(
        domain: Domain,
        backend: Arc<dyn ReasoningBackend>,
        tools: Arc<ToolRegistry>,
        max_tool_calls: u32,
    ) -> Self {
        Self {
            domain,
            backend,
            tools,
            max_tool_calls,
        }
    }

    fn conversation(&self, state: &SharedState, rounds: u32, tools_allowed: bool) -> Vec<Message> {
        let mut conversation = vec![Message::system(prompts::analyst_system_prompt(
            self.domain,
            state,
        ))];
        conversation.extend(state.messages().iter().cloned());
        if rounds > 0 {
            let nudge = if tools_allowed {
                prompts::tool_followup_prompt().to_string()
            } else {
                prompts::tool_budget_exhausted_prompt(self.max_tool_calls)
            };
            conversation.push(Message::user(nudge));
        }
        conversation
    }

    /// Tool results for this domain that failed or came back empty.
    fn data_gaps(&self, state: &SharedState) -> Vec<String> {
        let tools = StageId::ToolCalls(self.domain);
        state
            .messages()
            .iter()
            .filter(|m| m.stage == Some(tools) && m.is_error)
            .map(|m| m.content.clone())
            .collect()
    }

    fn compose_report(&self, text: &str, gaps: &[String]) -> String {
        let mut report = if text.trim().is_empty() {
            format!(
                "No {} report was produced: the analysis returned no content.",
                self.domain
            )
        } else {
            text.trim().to_string()
        };
        if !gaps.is_empty() {
            report.push_str("\n\nData gaps: the following data could not be retrieved:");
            for gap in gaps {
                report.push_str("\n- ");
                report.push_str(gap);
            }
        }
        report
    }
}

#[async_trait]
impl Stage for AnalystStage {
    fn id(&self) -> StageId {
        StageId::Analyst(self.domain)
    }

    async fn execute(&self, state: &SharedState) -> Result<StateDelta, AgentError> {
        let stage = self.id();
        let rounds = state.tool_call_counts().get(self.domain);
        let tools_allowed = rounds < self.max_tool_calls;
        let specs = if tools_allowed {
            self.tools.specs(self.domain)
        } else {
            Vec::new()
        };

        let conversation = self.conversation(state, rounds, tools_allowed);
        let response = self.backend.invoke(&conversation, &specs).await?;

        if !response.tool_calls.is_empty() {
            if tools_allowed {
                debug!(
                    stage = %stage,
                    instrument = state.instrument_id(),
                    round = rounds,
                    calls = response.tool_calls.len(),
                    "Analyst requested tools"
                );
                let turn = Message::assistant(response.text)
                    .with_tool_calls(response.tool_calls)
                    .from_stage(stage);
                return Ok(StateDelta::default().append_messages(vec![turn]));
            }
            info!(
                stage = %stage,
                instrument = state.instrument_id(),
                round = rounds,
                "Tool budget spent; ignoring tool requests and writing the report"
            );
        }

        let report = self.compose_report(&response.text, &self.data_gaps(state));
        Ok(StateDelta::default()
            .append_messages(vec![Message::assistant(report.clone()).from_stage(stage)])
            .with_report(self.domain, report))
    }

    fn failure_delta(&self, _state: &SharedState, reason: &str) -> StateDelta {
        let text = failure_text(reason);
        StateDelta::default()
            .append_messages(vec![Message::assistant(text.clone()).from_stage(self.id())])
            .with_report(self.domain, text)
    }
}

/// Single analyst covering all four domains in one pass.
///
/// Data is fetched directly from each domain's first tool, oversized payloads
/// are summarized, and one analysis call returns a JSON object with a section
/// per domain.
pub struct UnifiedAnalystStage {
    backend: Arc<dyn ReasoningBackend>,
    tools: Arc<ToolRegistry>,
    summarize_threshold: usize,
}

impl UnifiedAnalystStage {
    pub fn new(
        backend: Arc<dyn ReasoningBackend>,
        tools: Arc<ToolRegistry>,
        summarize_threshold: usize,
    ) -> Self {
        Self {
            backend,
            tools,
            summarize_threshold,
        }
    }

    /// Raw data from the domain's first tool, or `None` when it has nothing.
    async fn fetch(&self, domain: Domain, state: &SharedState) -> Option<String> {
        let Some(tool) = self.tools.for_domain(domain).first() else {
            debug!(domain = %domain, "No tool registered for domain");
            return None;
        };
        let args = json!({
            "ticker": state.instrument_id(),
            "date": state.as_of_date().to_string(),
        });
        match tool.invoke(&args).await {
            Ok(data) if !data.trim().is_empty() => Some(data),
            Ok(_) => {
                warn!(domain = %domain, tool = tool.name(), "Tool returned no data");
                None
            }
            Err(e) => {
                warn!(domain = %domain, tool = tool.name(), error = %e, "Tool failed");
                None
            }
        }
    }

    async fn condense(&self, domain: Domain, state: &SharedState, raw: String) -> String {
        if raw.chars().count() <= self.summarize_threshold {
            return raw;
        }
        let conversation = vec![
            Message::system(prompts::unified_summary_prompt(domain, state.instrument_id())),
            Message::user(truncate_chars(&raw, SUMMARY_INPUT_LIMIT)),
        ];
        match self.backend.invoke(&conversation, &[]).await {
            Ok(summary) if !summary.text.trim().is_empty() => summary.text,
            Ok(_) => truncate_chars(&raw, self.summarize_threshold),
            Err(e) => {
                warn!(domain = %domain, error = %e, "Summary failed; truncating raw data");
                truncate_chars(&raw, self.summarize_threshold)
            }
        }
    }
}

#[async_trait]
impl Stage for UnifiedAnalystStage {
    fn id(&self) -> StageId {
        StageId::UnifiedAnalyst
    }

    async fn execute(&self, state: &SharedState) -> Result<StateDelta, AgentError> {
        let mut sections = Vec::with_capacity(Domain::ALL.len());
        for domain in Domain::ALL {
            let brief = match self.fetch(domain, state).await {
                Some(raw) => self.condense(domain, state, raw).await,
                None => format!("{domain} data unavailable"),
            };
            sections.push(format!("## {} DATA\n{}", domain.as_str().to_uppercase(), brief));
        }

        let conversation = vec![
            Message::system(prompts::unified_analysis_prompt(state)),
            Message::user(sections.join("\n\n")),
        ];
        let response = self.backend.invoke(&conversation, &[]).await?;

        let mut delta = StateDelta::default();
        match parse_unified_reports(&response.text) {
            Ok(mut parsed) => {
                for domain in Domain::ALL {
                    let text = parsed
                        .remove(&domain)
                        .unwrap_or_else(|| format!("No {domain} analysis was returned."));
                    delta = delta.with_report(domain, text);
                }
            }
            Err(e) => {
                warn!(instrument = state.instrument_id(), error = %e, "Unified analysis was not valid JSON; using raw text");
                let text = if response.text.trim().is_empty() {
                    "No analysis was produced: the analysis returned no content.".to_string()
                } else {
                    response.text.trim().to_string()
                };
                for domain in Domain::ALL {
                    delta = delta.with_report(domain, text.clone());
                }
            }
        }
        Ok(delta.append_messages(vec![Message::assistant(response.text).from_stage(self.id())]))
    }

    fn failure_delta(&self, _state: &SharedState, reason: &str) -> StateDelta {
        let text = failure_text(reason);
        Domain::ALL
            .into_iter()
            .fold(StateDelta::default(), |delta, d| delta.with_report(d, text.clone()))
            .append_messages(vec![Message::assistant(text.clone()).from_stage(self.id())])
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}... (truncated)", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{tick1_state, FailingBackend, ScriptedBackend, StubTool, ToolHungryBackend};
    use tradegraph_models::message::ToolCall;

    fn registry_with(domain: Domain, tool: StubTool) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(domain, Arc::new(tool));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn plain_reply_is_the_report() {
        let stage = AnalystStage::new(
            Domain::Market,
            Arc::new(ScriptedBackend::fixed("uptrend intact")),
            Arc::new(ToolRegistry::new()),
            3,
        );
        let delta = stage.execute(&tick1_state()).await.unwrap();
        assert_eq!(delta.reports, vec![(Domain::Market, "uptrend intact".to_string())]);
        assert_eq!(delta.tool_call_rounds, 0);
    }

    #[tokio::test]
    async fn tool_request_leaves_report_unwritten() {
        let stage = AnalystStage::new(
            Domain::News,
            Arc::new(ToolHungryBackend::new("get_news")),
            registry_with(Domain::News, StubTool::new("get_news", "headlines")),
            3,
        );
        let delta = stage.execute(&tick1_state()).await.unwrap();
        assert!(delta.reports.is_empty());
        let Some(tradegraph_models::state::MessagesUpdate::Append(turns)) = delta.messages else {
            panic!("expected appended turn");
        };
        assert!(turns[0].requests_tools());
        assert_eq!(turns[0].stage, Some(StageId::Analyst(Domain::News)));
    }

    #[tokio::test]
    async fn exhausted_budget_binds_no_tools_and_ignores_requests() {
        let backend = Arc::new(ToolHungryBackend::new("get_news"));
        let stage = AnalystStage::new(
            Domain::News,
            backend.clone(),
            registry_with(Domain::News, StubTool::new("get_news", "headlines")),
            0,
        );
        let delta = stage.execute(&tick1_state()).await.unwrap();
        assert_eq!(backend.bound_tool_counts(), vec![0]);
        let (_, report) = &delta.reports[0];
        assert!(report.starts_with("No news report was produced"));
    }

    #[tokio::test]
    async fn failed_tool_results_are_listed_as_data_gaps() {
        let mut state = tick1_state();
        let call = ToolCall {
            id: "c1".to_string(),
            name: "get_news".to_string(),
            args: serde_json::Value::Null,
        };
        state
            .apply(
                StageId::ToolCalls(Domain::News),
                StateDelta {
                    tool_call_rounds: 1,
                    ..Default::default()
                }
                .append_messages(vec![Message::tool_result(&call, "get_news: returned no data", true)
                    .from_stage(StageId::ToolCalls(Domain::News))]),
            )
            .unwrap();

        let stage = AnalystStage::new(
            Domain::News,
            Arc::new(ScriptedBackend::fixed("quiet week")),
            Arc::new(ToolRegistry::new()),
            3,
        );
        let delta = stage.execute(&state).await.unwrap();
        let (_, report) = &delta.reports[0];
        assert!(report.starts_with("quiet week"));
        assert!(report.contains("Data gaps"));
        assert!(report.contains("- get_news: returned no data"));
    }

    #[test]
    fn failure_writes_degraded_report() {
        let stage = AnalystStage::new(
            Domain::Fundamentals,
            Arc::new(FailingBackend),
            Arc::new(ToolRegistry::new()),
            3,
        );
        let delta = stage.failure_delta(&tick1_state(), "Backend error: down");
        assert_eq!(
            delta.reports,
            vec![(Domain::Fundamentals, "stage failed: Backend error: down".to_string())]
        );
    }

    #[tokio::test]
    async fn unified_parses_sections_and_marks_missing_data() {
        let backend = Arc::new(ScriptedBackend::fixed(
            r#"{"market": "uptrend", "fundamentals": "cheap", "news": "quiet"}"#,
        ));
        let stage = UnifiedAnalystStage::new(
            backend.clone(),
            registry_with(Domain::Market, StubTool::new("get_prices", "close 101.2")),
            3000,
        );
        let delta = stage.execute(&tick1_state()).await.unwrap();
        assert_eq!(delta.reports.len(), 4);
        assert!(delta
            .reports
            .contains(&(Domain::Sentiment, "No sentiment analysis was returned.".to_string())));

        let prompt = backend.last_user_prompt().unwrap();
        assert!(prompt.contains("## MARKET DATA\nclose 101.2"));
        assert!(prompt.contains("## NEWS DATA\nnews data unavailable"));
    }

    #[tokio::test]
    async fn unified_falls_back_to_raw_text() {
        let stage = UnifiedAnalystStage::new(
            Arc::new(ScriptedBackend::fixed("ok")),
            Arc::new(ToolRegistry::new()),
            3000,
        );
        let delta = stage.execute(&tick1_state()).await.unwrap();
        assert!(delta.reports.iter().all(|(_, text)| text == "ok"));
    }

    #[tokio::test]
    async fn unified_summarizes_oversized_payloads() {
        let backend = Arc::new(ScriptedBackend::fixed("ok"));
        let stage = UnifiedAnalystStage::new(
            backend.clone(),
            registry_with(Domain::News, StubTool::new("get_news", &"x".repeat(50))),
            10,
        );
        stage.execute(&tick1_state()).await.unwrap();
        // one summary call for news plus the analysis call
        assert_eq!(backend.calls(), 2);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("¥¥¥¥", 2), "¥¥... (truncated)");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
