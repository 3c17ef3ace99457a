//! Built-in tools offered to the model

use async_trait::async_trait;
use scribe_agent::{Tool, ToolError};
use serde_json::{Value, json};
use tokio::fs;

use crate::config::expand_home;

const MAX_LINES: usize = 2000;
const MAX_LINE_CHARS: usize = 2000;

/// Reads a text file, optionally a window of its lines
#[derive(Debug, Default)]
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file. For large files, use offset and limit parameters."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read (relative or absolute)"
                },
                "offset": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum number of lines to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let path = input
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::failed("Missing 'path' argument"))?;

        let content = fs::read_to_string(expand_home(path))
            .await
            .map_err(|e| ToolError::failed(format!("Failed to read {}: {}", path, e)))?;

        let offset = input
            .get("offset")
            .and_then(Value::as_u64)
            .map(|o| (o as usize).saturating_sub(1))
            .unwrap_or(0);
        let limit = input
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l as usize)
            .unwrap_or(MAX_LINES);

        Ok(json!(window(&content, offset, limit)?))
    }
}

/// Lines `offset..offset+limit` with truncation notices appended
fn window(content: &str, offset: usize, limit: usize) -> Result<String, ToolError> {
    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();

    if total == 0 {
        return Ok(String::new());
    }
    if offset >= total {
        return Err(ToolError::failed(format!(
            "Offset {} is beyond end of file ({} lines total)",
            offset + 1,
            total
        )));
    }

    let end = offset.saturating_add(limit).min(total);
    let mut truncated = false;
    let selected: Vec<String> = lines[offset..end]
        .iter()
        .map(|line| {
            if line.chars().count() > MAX_LINE_CHARS {
                truncated = true;
                line.chars().take(MAX_LINE_CHARS).collect()
            } else {
                line.to_string()
            }
        })
        .collect();

    let mut output = selected.join("\n");

    let mut notices = Vec::new();
    if truncated {
        notices.push(format!(
            "Some lines were truncated to {} characters",
            MAX_LINE_CHARS
        ));
    }
    if end < total {
        notices.push(format!(
            "{} more lines not shown. Use offset={} to continue reading",
            total - end,
            end + 1
        ));
    }
    if !notices.is_empty() {
        output.push_str(&format!("\n\n... ({})", notices.join(". ")));
    }

    Ok(output)
}
