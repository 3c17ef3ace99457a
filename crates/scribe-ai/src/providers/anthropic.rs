//! Anthropic Messages API adapter

use serde_json::{Value, json};
use std::collections::HashMap;

use super::{
    DEFAULT_MAX_TOKENS, ProviderAdapter, ProviderCredentials, RequestContext, TurnFormatter,
    WireParser, WireRequest, result_is_error, result_text, u32_field,
};
use crate::{
    error::{Error, Result},
    types::{ProviderId, Turn, Usage},
    wire::{ParseResult, ServerToolResult, ToolCallDelta, ToolCallStart},
};

const API_VERSION: &str = "2023-06-01";
const BETA_FEATURES: &str = "fine-grained-tool-streaming-2025-05-14";
/// Token budget reserved for extended thinking when enabled
const THINKING_BUDGET: u32 = 4096;

/// Anthropic Messages API
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicAdapter;

impl ProviderAdapter for AnthropicAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn build_request(
        &self,
        context: &RequestContext<'_>,
        credentials: &ProviderCredentials,
    ) -> Result<WireRequest> {
        let api_key = credentials
            .resolve_api_key(ProviderId::Anthropic)?
            .ok_or(Error::InvalidApiKey("anthropic"))?;
        let url = format!("{}/v1/messages", credentials.base_url(ProviderId::Anthropic));

        let mut max_tokens = context.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let mut body = json!({
            "model": context.model,
            "messages": self.format_turns(context.turns),
            "stream": true,
        });

        if let Some(system_prompt) = context.system_prompt {
            body["system"] = json!([{
                "type": "text",
                "text": system_prompt,
                "cache_control": { "type": "ephemeral" }
            }]);
        }

        if !context.tools.is_empty() {
            body["tools"] = context
                .tools
                .iter()
                .map(|tool| {
                    let mut schema = if tool.parameters.is_object() {
                        tool.parameters.clone()
                    } else {
                        json!({ "properties": {} })
                    };
                    if let Some(obj) = schema.as_object_mut() {
                        obj.entry("type").or_insert(json!("object"));
                    }
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": schema
                    })
                })
                .collect();
        }

        if context.thinking {
            // budget_tokens must stay below max_tokens
            max_tokens = max_tokens.max(THINKING_BUDGET + 1024);
            body["thinking"] = json!({ "type": "enabled", "budget_tokens": THINKING_BUDGET });
        }
        body["max_tokens"] = json!(max_tokens);

        tracing::debug!("Anthropic API URL: {}", url);

        Ok(WireRequest::post(url, body)
            .header("accept", "text/event-stream")
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("anthropic-beta", BETA_FEATURES))
    }

    fn parser(&self) -> Box<dyn WireParser> {
        Box::new(AnthropicParser::default())
    }
}

impl TurnFormatter for AnthropicAdapter {
    fn format_turns(&self, turns: &[Turn]) -> Vec<Value> {
        let mut messages = vec![];

        for turn in turns {
            messages.push(json!({
                "role": "user",
                "content": [{ "type": "text", "text": turn.user_input.render() }]
            }));

            for step in &turn.steps {
                let mut blocks = vec![];

                // Unsigned thinking is rejected by the API, so only signed blocks are echoed
                if let (Some(thinking), Some(signature)) = (&step.thinking, &step.signature) {
                    blocks.push(json!({
                        "type": "thinking",
                        "thinking": thinking,
                        "signature": signature
                    }));
                }
                if let Some(content) = step.content.as_deref().filter(|c| !c.is_empty()) {
                    blocks.push(json!({ "type": "text", "text": content }));
                }
                for call in &step.tool_calls {
                    if call.is_server_executed {
                        blocks.push(json!({
                            "type": "server_tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.input
                        }));
                        if let Some(result) = &call.result {
                            blocks.push(json!({
                                "type": format!("{}_tool_result", call.name),
                                "tool_use_id": call.id,
                                "content": result
                            }));
                        }
                    } else {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.input
                        }));
                    }
                }

                if blocks.is_empty() {
                    continue;
                }
                messages.push(json!({ "role": "assistant", "content": blocks }));

                let results: Vec<Value> = step
                    .tool_calls
                    .iter()
                    .filter(|call| !call.is_server_executed)
                    .map(|call| {
                        json!({
                            "type": "tool_result",
                            "tool_use_id": call.id,
                            "content": result_text(call),
                            "is_error": result_is_error(call)
                        })
                    })
                    .collect();
                if !results.is_empty() {
                    messages.push(json!({ "role": "user", "content": results }));
                }
            }
        }

        messages
    }
}

/// Kind of the content block open at an index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse,
    Other,
}

#[derive(Debug, Default)]
struct AnthropicParser {
    blocks: HashMap<usize, BlockKind>,
}

impl AnthropicParser {
    fn block_start(&mut self, index: usize, block: &Value) -> ParseResult {
        let block_type = block.get("type").and_then(Value::as_str).unwrap_or("");
        let mut result = ParseResult::default();

        let kind = match block_type {
            "text" => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    if !text.is_empty() {
                        result.content = Some(text.to_string());
                    }
                }
                BlockKind::Text
            }
            "thinking" => {
                if let Some(text) = block.get("thinking").and_then(Value::as_str) {
                    if !text.is_empty() {
                        result.thinking = Some(text.to_string());
                    }
                }
                BlockKind::Thinking
            }
            "tool_use" | "server_tool_use" => {
                result.tool_call_starts.push(ToolCallStart {
                    index,
                    id: string_field(block, "id"),
                    name: string_field(block, "name"),
                    initial_input: block.get("input").cloned().unwrap_or_else(|| json!({})),
                    server_executed: block_type == "server_tool_use",
                });
                BlockKind::ToolUse
            }
            t if t.ends_with("_tool_result") => {
                result.tool_results.push(ServerToolResult {
                    tool_call_id: string_field(block, "tool_use_id"),
                    result: block.get("content").cloned().unwrap_or(Value::Null),
                });
                BlockKind::Other
            }
            _ => BlockKind::Other,
        };

        self.blocks.insert(index, kind);
        result
    }

    fn block_delta(&mut self, index: usize, delta: &Value) -> ParseResult {
        let delta_type = delta.get("type").and_then(Value::as_str).unwrap_or("");
        let text = |key: &str| delta.get(key).and_then(Value::as_str).unwrap_or("").to_string();

        match delta_type {
            "text_delta" => ParseResult::text(text("text")),
            "thinking_delta" => ParseResult::thinking(text("thinking")),
            "signature_delta" => ParseResult {
                signature: Some(text("signature")),
                ..Default::default()
            },
            "input_json_delta" => {
                if self.blocks.get(&index) != Some(&BlockKind::ToolUse) {
                    tracing::debug!("input_json_delta for non-tool block {}", index);
                }
                ParseResult {
                    tool_call_deltas: vec![ToolCallDelta {
                        index,
                        fragment: text("partial_json"),
                    }],
                    ..Default::default()
                }
            }
            _ => ParseResult::default(),
        }
    }
}

impl WireParser for AnthropicParser {
    fn parse(&mut self, object: &Value) -> ParseResult {
        let event_type = object.get("type").and_then(Value::as_str).unwrap_or("");
        let index = object.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;

        match event_type {
            "message_start" => ParseResult {
                usage: object.pointer("/message/usage").map(parse_usage),
                ..Default::default()
            },
            "content_block_start" => match object.get("content_block") {
                Some(block) => self.block_start(index, block),
                None => ParseResult::default(),
            },
            "content_block_delta" => match object.get("delta") {
                Some(delta) => self.block_delta(index, delta),
                None => ParseResult::default(),
            },
            "content_block_stop" => {
                self.blocks.remove(&index);
                ParseResult {
                    block_completes: vec![index],
                    ..Default::default()
                }
            }
            "message_delta" => ParseResult {
                usage: object.get("usage").map(parse_usage),
                ..Default::default()
            },
            "message_stop" => ParseResult::complete(),
            "error" => {
                let message = object
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown Anthropic error");
                ParseResult::failed(message)
            }
            _ => ParseResult::default(),
        }
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn parse_usage(usage: &Value) -> Usage {
    Usage {
        input: u32_field(usage, "input_tokens"),
        output: u32_field(usage, "output_tokens"),
        cache_read: u32_field(usage, "cache_read_input_tokens"),
        cache_write: u32_field(usage, "cache_creation_input_tokens"),
    }
}
