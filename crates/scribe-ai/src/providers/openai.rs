//! OpenAI-compatible Chat Completions adapter (OpenAI, OpenRouter, Groq)

use serde_json::{Value, json};
use std::collections::BTreeSet;

use super::{
    DEFAULT_MAX_TOKENS, ProviderAdapter, ProviderCredentials, RequestContext, TurnFormatter,
    WireParser, WireRequest, result_text, u32_field,
};
use crate::{
    error::{Error, Result},
    types::{ProviderId, Turn, Usage},
    wire::{ParseResult, ToolCallDelta, ToolCallStart},
};

/// Chat Completions speaker for one OpenAI-compatible vendor
#[derive(Debug, Clone, Copy)]
pub struct OpenAIAdapter {
    provider: ProviderId,
}

impl OpenAIAdapter {
    pub const fn new(provider: ProviderId) -> Self {
        Self { provider }
    }
}

impl ProviderAdapter for OpenAIAdapter {
    fn id(&self) -> ProviderId {
        self.provider
    }

    fn build_request(
        &self,
        context: &RequestContext<'_>,
        credentials: &ProviderCredentials,
    ) -> Result<WireRequest> {
        let api_key = credentials
            .resolve_api_key(self.provider)?
            .ok_or(Error::InvalidApiKey(self.provider.as_str()))?;
        let url = format!("{}/chat/completions", credentials.base_url(self.provider));

        let mut messages = vec![];
        if let Some(system_prompt) = context.system_prompt {
            messages.push(json!({ "role": "system", "content": system_prompt }));
        }
        messages.extend(self.format_turns(context.turns));

        let max_tokens = context.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        let mut body = json!({
            "model": context.model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        match self.provider {
            ProviderId::OpenAI => body["max_completion_tokens"] = json!(max_tokens),
            _ => body["max_tokens"] = json!(max_tokens),
        }

        if !context.tools.is_empty() {
            body["tools"] = context
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters
                        }
                    })
                })
                .collect();
        }

        if context.thinking {
            match self.provider {
                ProviderId::OpenRouter => body["reasoning"] = json!({ "effort": "medium" }),
                ProviderId::Groq => body["reasoning_format"] = json!("parsed"),
                _ => body["reasoning_effort"] = json!("medium"),
            }
        }

        tracing::debug!("{} API URL: {}", self.provider, url);

        let mut request =
            WireRequest::post(url, body).header("authorization", format!("Bearer {}", api_key));
        if self.provider == ProviderId::OpenRouter {
            request = request.header("x-title", "scribe");
        }
        Ok(request)
    }

    fn parser(&self) -> Box<dyn WireParser> {
        Box::new(OpenAIParser::default())
    }
}

impl TurnFormatter for OpenAIAdapter {
    fn format_turns(&self, turns: &[Turn]) -> Vec<Value> {
        let mut messages = vec![];

        for turn in turns {
            messages.push(json!({ "role": "user", "content": turn.user_input.render() }));

            for step in &turn.steps {
                // Server-side calls have no Chat Completions representation
                let calls: Vec<_> = step
                    .tool_calls
                    .iter()
                    .filter(|call| !call.is_server_executed)
                    .collect();
                let content = step.content.as_deref().filter(|c| !c.is_empty());
                if content.is_none() && calls.is_empty() {
                    continue;
                }

                let mut assistant = json!({
                    "role": "assistant",
                    "content": content,
                });
                if !calls.is_empty() {
                    assistant["tool_calls"] = calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.input.to_string()
                                }
                            })
                        })
                        .collect();
                }
                messages.push(assistant);

                for call in calls {
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": call.id,
                        "content": result_text(call)
                    }));
                }
            }
        }

        messages
    }
}

#[derive(Debug, Default)]
struct OpenAIParser {
    /// Tool call indices opened in this stream and not yet completed
    open: BTreeSet<usize>,
}

impl OpenAIParser {
    fn tool_deltas(&mut self, deltas: &[Value], result: &mut ParseResult) {
        for delta in deltas {
            let index = delta.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
            let function = delta.get("function");

            if self.open.insert(index) {
                let id = delta
                    .get("id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call_{}", index));
                let name = function
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                result.tool_call_starts.push(ToolCallStart {
                    index,
                    id,
                    name,
                    initial_input: json!({}),
                    server_executed: false,
                });
            }

            if let Some(arguments) = function
                .and_then(|f| f.get("arguments"))
                .and_then(Value::as_str)
                .filter(|a| !a.is_empty())
            {
                result.tool_call_deltas.push(ToolCallDelta {
                    index,
                    fragment: arguments.to_string(),
                });
            }
        }
    }
}

impl WireParser for OpenAIParser {
    fn parse(&mut self, object: &Value) -> ParseResult {
        if let Some(error) = object.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return ParseResult::failed(message);
        }

        let mut result = ParseResult::default();

        if let Some(choice) = object.pointer("/choices/0") {
            if let Some(delta) = choice.get("delta") {
                let content = delta
                    .get("content")
                    .and_then(Value::as_str)
                    .filter(|c| !c.is_empty());
                let reasoning = delta
                    .get("reasoning_content")
                    .or_else(|| delta.get("reasoning"))
                    .and_then(Value::as_str)
                    .filter(|r| !r.is_empty());

                result.thinking = reasoning.map(str::to_string);
                result.content = content.map(str::to_string);

                if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                    self.tool_deltas(calls, &mut result);
                }
            }

            if choice
                .get("finish_reason")
                .is_some_and(|reason| !reason.is_null())
            {
                result.block_completes = std::mem::take(&mut self.open).into_iter().collect();
            }
        }

        // Sent last when stream_options.include_usage is set
        if let Some(usage) = object.get("usage").filter(|u| !u.is_null()) {
            result.usage = Some(Usage {
                input: u32_field(usage, "prompt_tokens"),
                output: u32_field(usage, "completion_tokens"),
                cache_read: usage
                    .get("prompt_tokens_details")
                    .map(|d| u32_field(d, "cached_tokens"))
                    .unwrap_or(0),
                cache_write: 0,
            });
            result.is_complete = true;
        }

        result
    }
}
