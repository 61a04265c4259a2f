use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use tradegraph_models::message::ToolCall;
use tradegraph_models::stage::Domain;
use uuid::Uuid;

use crate::backend::ToolSpec;
use crate::error::AgentError;

/// Extract the first JSON object from a string that may contain surrounding text.
///
/// Models wrap JSON in prose or code fences, so this tries, in order: the whole
/// reply, the first fenced block, then the first balanced `{ ... }`.
pub fn extract_json(text: &str) -> Result<String, AgentError> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && serde_json::from_str::<Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    if let Some(json_str) = extract_from_markdown_block(trimmed) {
        if serde_json::from_str::<Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    if let Some(json_str) = extract_first_object(trimmed) {
        if serde_json::from_str::<Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    Err(AgentError::Parse(format!(
        "no JSON object in reply ({} chars)",
        text.len()
    )))
}

/// Extract JSON from a markdown code block (```json ... ``` or ``` ... ```)
fn extract_from_markdown_block(text: &str) -> Option<String> {
    let start_markers = ["```json\n", "```json\r\n", "```\n", "```\r\n"];

    for marker in &start_markers {
        if let Some(start) = text.find(marker) {
            let json_start = start + marker.len();
            if let Some(end) = text[json_start..].find("```") {
                let extracted = text[json_start..json_start + end].trim();
                return Some(extracted.to_string());
            }
        }
    }

    None
}

/// Find the first balanced { ... } in the text.
fn extract_first_object(text: &str) -> Option<String> {
    let mut depth = 0;
    let mut start = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => {
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
            }
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        return Some(text[s..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }

    None
}

/// Tool invocation as the model writes it, before an id is assigned.
#[derive(Debug, Deserialize)]
struct RequestedCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
struct ToolCallEnvelope {
    tool_calls: Vec<RequestedCall>,
}

/// Extract tool-call requests of the form `{"tool_calls": [{"name", "args"}]}`.
///
/// Only names in `bound` are accepted. Returns an empty list when the reply is
/// plain prose, so callers treat it as a direct answer.
pub fn parse_tool_calls(raw: &str, bound: &[ToolSpec]) -> Vec<ToolCall> {
    if bound.is_empty() {
        return Vec::new();
    }
    let Ok(json_str) = extract_json(raw) else {
        return Vec::new();
    };
    let Ok(envelope) = serde_json::from_str::<ToolCallEnvelope>(&json_str) else {
        return Vec::new();
    };

    envelope
        .tool_calls
        .into_iter()
        .filter(|call| {
            let known = bound.iter().any(|tool| tool.name == call.name);
            if !known {
                warn!(tool = %call.name, "Ignoring request for unbound tool");
            }
            known
        })
        .map(|call| ToolCall {
            id: format!("call-{}", Uuid::new_v4().simple()),
            name: call.name,
            args: call.args,
        })
        .collect()
}

/// Parse the unified analyst's JSON object keyed by domain.
///
/// Keys that are missing or not strings are left out of the map. Nested
/// objects are rendered as pretty JSON.
pub fn parse_unified_reports(raw: &str) -> Result<BTreeMap<Domain, String>, AgentError> {
    let json_str = extract_json(raw)?;
    let value: Value = serde_json::from_str(&json_str)?;
    let object = value
        .as_object()
        .ok_or_else(|| AgentError::Parse("unified analysis is not a JSON object".to_string()))?;

    let mut reports = BTreeMap::new();
    for (key, section) in object {
        let Ok(domain) = key.parse::<Domain>() else {
            continue;
        };
        let text = match section {
            Value::String(s) => s.trim().to_string(),
            Value::Null => continue,
            other => serde_json::to_string_pretty(other)?,
        };
        if !text.is_empty() {
            reports.insert(domain, text);
        }
    }

    if reports.is_empty() {
        return Err(AgentError::Parse(
            "unified analysis contains no domain sections".to_string(),
        ));
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_bare_object() {
        let input = r#"{"rating": "buy", "horizon": "6m"}"#;
        let result = extract_json(input).unwrap();
        assert_eq!(result, input);
    }

    #[test]
    fn extract_from_markdown() {
        let input = "Here is my analysis:\n```json\n{\"rating\": \"hold\"}\n```\nDone.";
        let result = extract_json(input).unwrap();
        assert_eq!(result, r#"{"rating": "hold"}"#);
    }

    #[test]
    fn extract_from_markdown_no_lang() {
        let input = "Result:\n```\n{\"rating\": \"hold\"}\n```";
        let result = extract_json(input).unwrap();
        assert_eq!(result, r#"{"rating": "hold"}"#);
    }

    #[test]
    fn extract_with_prefix_text() {
        let input = "Based on my analysis, here is the result:\n{\"rating\": \"overweight\", \"horizon\": \"3m\"}";
        let result = extract_json(input).unwrap();
        assert!(result.contains("overweight"));
    }

    #[test]
    fn extract_nested_json() {
        let input = r#"{"outer": {"inner": "value"}, "list": [1, 2, 3]}"#;
        let result = extract_json(input).unwrap();
        assert_eq!(result, input);
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        let input = r#"{"reasoning": "range moved from {low} to {high}", "rating": "sell"}"#;
        let result = extract_json(input).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed["rating"], "sell");
    }

    #[test]
    fn extract_no_json() {
        let input = "This is just plain text with no JSON at all.";
        let result = extract_json(input);
        assert!(result.is_err());
    }

    fn bound(names: &[&str]) -> Vec<ToolSpec> {
        names
            .iter()
            .map(|n| ToolSpec {
                name: n.to_string(),
                description: String::new(),
            })
            .collect()
    }

    #[test]
    fn parse_fenced_tool_calls() {
        let input = "I need prices first.\n```json\n{\"tool_calls\": [{\"name\": \"get_prices\", \"args\": {\"ticker\": \"AAPL\"}}]}\n```";
        let calls = parse_tool_calls(input, &bound(&["get_prices"]));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "get_prices");
        assert_eq!(calls[0].args["ticker"], "AAPL");
        assert!(calls[0].id.starts_with("call-"));
    }

    #[test]
    fn unbound_tool_names_are_dropped() {
        let input = r#"{"tool_calls": [{"name": "get_prices"}, {"name": "rm_rf"}]}"#;
        let calls = parse_tool_calls(input, &bound(&["get_prices"]));
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args, Value::Null);
    }

    #[test]
    fn prose_and_unbound_replies_have_no_calls() {
        assert!(parse_tool_calls("The trend is up.", &bound(&["get_prices"])).is_empty());
        let input = r#"{"tool_calls": [{"name": "get_prices"}]}"#;
        assert!(parse_tool_calls(input, &[]).is_empty());
        assert!(parse_tool_calls(r#"{"signal": "buy"}"#, &bound(&["get_prices"])).is_empty());
    }

    #[test]
    fn parse_unified_sections() {
        let input = r#"```json
{
    "market": "Uptrend above the 50-day average",
    "fundamentals": {"pe": 31.2},
    "news": "",
    "social": "Retail chatter is bullish"
}
```"#;
        let reports = parse_unified_reports(input).unwrap();
        assert_eq!(
            reports.get(&Domain::Market).map(String::as_str),
            Some("Uptrend above the 50-day average")
        );
        assert!(reports[&Domain::Fundamentals].contains("31.2"));
        assert!(!reports.contains_key(&Domain::News));
        assert_eq!(reports[&Domain::Sentiment], "Retail chatter is bullish");
    }

    #[test]
    fn unified_without_sections_is_an_error() {
        assert!(parse_unified_reports(r#"{"verdict": "buy"}"#).is_err());
        assert!(parse_unified_reports("no json here").is_err());
    }
}
