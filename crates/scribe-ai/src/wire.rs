//! Line-level wire parsing shared by all adapters

use crate::types::Usage;

/// Return the first balanced `{...}` substring of `line`.
///
/// Braces inside JSON string literals are ignored. Lines that carry no
/// object (SSE `event:` fields, `: ping` comments, `data: [DONE]`) yield `None`.
pub fn extract_json_object(line: &str) -> Option<&str> {
    let start = line.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in line[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&line[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// A tool call block opened by the vendor
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallStart {
    pub index: usize,
    pub id: String,
    pub name: String,
    /// Input the vendor sent up front; used when no fragments follow
    pub initial_input: serde_json::Value,
    pub server_executed: bool,
}

/// A JSON text fragment for an open tool call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallDelta {
    pub index: usize,
    pub fragment: String,
}

/// Result of a tool the vendor executed itself
#[derive(Debug, Clone, PartialEq)]
pub struct ServerToolResult {
    pub tool_call_id: String,
    pub result: serde_json::Value,
}

/// Everything one wire object contributed to the stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseResult {
    /// Reasoning delta, emitted ahead of `content`
    pub thinking: Option<String>,
    /// Answer text delta
    pub content: Option<String>,
    pub tool_call_starts: Vec<ToolCallStart>,
    pub tool_call_deltas: Vec<ToolCallDelta>,
    pub block_completes: Vec<usize>,
    pub tool_results: Vec<ServerToolResult>,
    pub signature: Option<String>,
    pub usage: Option<Usage>,
    /// Vendor finish marker seen
    pub is_complete: bool,
    /// Vendor-reported failure; ends the stream
    pub error: Option<String>,
}

impl ParseResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn thinking(content: impl Into<String>) -> Self {
        Self {
            thinking: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn complete() -> Self {
        Self {
            is_complete: true,
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Nothing usable in this object
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_from_sse_data_line() {
        let line = r#"data: {"type":"ping"}"#;
        assert_eq!(extract_json_object(line), Some(r#"{"type":"ping"}"#));
    }

    #[test]
    fn test_extract_ignores_noise_lines() {
        assert_eq!(extract_json_object("event: content_block_delta"), None);
        assert_eq!(extract_json_object(": ping"), None);
        assert_eq!(extract_json_object("data: [DONE]"), None);
        assert_eq!(extract_json_object(""), None);
    }

    #[test]
    fn test_extract_nested_and_braces_in_strings() {
        let line = r#"data: {"a":{"b":"}{"},"c":"\"}"} trailing {"x":1}"#;
        assert_eq!(
            extract_json_object(line),
            Some(r#"{"a":{"b":"}{"},"c":"\"}"}"#)
        );
    }

    #[test]
    fn test_extract_unbalanced_is_none() {
        assert_eq!(extract_json_object(r#"data: {"a":{"b":1}"#), None);
    }

    #[test]
    fn test_parse_result_helpers() {
        assert!(ParseResult::default().is_empty());
        assert!(!ParseResult::complete().is_empty());
        let thinking = ParseResult::thinking("hmm");
        assert_eq!(thinking.thinking.as_deref(), Some("hmm"));
        assert!(thinking.content.is_none());
    }
}
