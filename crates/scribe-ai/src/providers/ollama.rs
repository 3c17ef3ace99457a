//! Ollama `/api/chat` adapter (newline-delimited JSON)

use serde_json::{Value, json};

use super::{
    ProviderAdapter, ProviderCredentials, RequestContext, TurnFormatter, WireParser, WireRequest,
    result_text, u32_field,
};
use crate::{
    error::Result,
    types::{ProviderId, Turn, Usage},
    wire::{ParseResult, ToolCallStart},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct OllamaAdapter;

impl ProviderAdapter for OllamaAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Ollama
    }

    fn build_request(
        &self,
        context: &RequestContext<'_>,
        credentials: &ProviderCredentials,
    ) -> Result<WireRequest> {
        let url = format!("{}/api/chat", credentials.base_url(ProviderId::Ollama));

        let mut messages = vec![];
        if let Some(system_prompt) = context.system_prompt {
            messages.push(json!({ "role": "system", "content": system_prompt }));
        }
        messages.extend(self.format_turns(context.turns));

        let mut body = json!({
            "model": context.model,
            "messages": messages,
            "stream": true,
            "think": context.thinking,
        });
        if let Some(max_tokens) = context.max_tokens {
            body["options"] = json!({ "num_predict": max_tokens });
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

        tracing::debug!("Ollama API URL: {}", url);

        let mut request = WireRequest::post(url, body);
        // A local server needs no key; a proxied one may
        if let Some(api_key) = credentials.resolve_api_key(ProviderId::Ollama)? {
            request = request.header("authorization", format!("Bearer {}", api_key));
        }
        Ok(request)
    }

    fn parser(&self) -> Box<dyn WireParser> {
        Box::new(OllamaParser::default())
    }
}

impl TurnFormatter for OllamaAdapter {
    fn format_turns(&self, turns: &[Turn]) -> Vec<Value> {
        let mut messages = vec![];

        for turn in turns {
            messages.push(json!({ "role": "user", "content": turn.user_input.render() }));

            for step in &turn.steps {
                let calls: Vec<_> = step
                    .tool_calls
                    .iter()
                    .filter(|call| !call.is_server_executed)
                    .collect();
                let content = step.content.as_deref().unwrap_or_default();
                if content.is_empty() && calls.is_empty() {
                    continue;
                }

                let mut assistant = json!({ "role": "assistant", "content": content });
                if let Some(thinking) = step.thinking.as_deref().filter(|t| !t.is_empty()) {
                    assistant["thinking"] = json!(thinking);
                }
                if !calls.is_empty() {
                    assistant["tool_calls"] = calls
                        .iter()
                        .map(|call| {
                            json!({ "function": { "name": call.name, "arguments": call.input } })
                        })
                        .collect();
                }
                messages.push(assistant);

                for call in calls {
                    messages.push(json!({
                        "role": "tool",
                        "tool_name": call.name,
                        "content": result_text(call)
                    }));
                }
            }
        }

        messages
    }
}

#[derive(Debug, Default)]
struct OllamaParser {
    calls_seen: usize,
}

impl WireParser for OllamaParser {
    fn parse(&mut self, object: &Value) -> ParseResult {
        if let Some(error) = object.get("error") {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return ParseResult::failed(message);
        }

        let mut result = ParseResult::default();

        if let Some(message) = object.get("message") {
            let content = message
                .get("content")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty());
            let thinking = message
                .get("thinking")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty());
            result.thinking = thinking.map(str::to_string);
            result.content = content.map(str::to_string);

            for call in message
                .get("tool_calls")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                let index = self.calls_seen;
                self.calls_seen += 1;
                let function = call.get("function");
                result.tool_call_starts.push(ToolCallStart {
                    index,
                    id: format!("call_{}", index),
                    name: function
                        .and_then(|f| f.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    initial_input: function
                        .and_then(|f| f.get("arguments"))
                        .cloned()
                        .unwrap_or_else(|| json!({})),
                    server_executed: false,
                });
                result.block_completes.push(index);
            }
        }

        if object.get("done").and_then(Value::as_bool).unwrap_or(false) {
            result.usage = Some(Usage {
                input: u32_field(object, "prompt_eval_count"),
                output: u32_field(object, "eval_count"),
                ..Default::default()
            });
            result.is_complete = true;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::{in_progress_turn, tool_round_trip_turn};

    #[test]
    fn test_build_request_without_key() {
        let turns = vec![in_progress_turn("Hi")];
        let context = RequestContext {
            model: "llama3.2",
            system_prompt: None,
            turns: &turns,
            tools: &[],
            thinking: true,
            max_tokens: Some(256),
        };
        let request = OllamaAdapter
            .build_request(&context, &ProviderCredentials::default())
            .unwrap();

        assert_eq!(request.url, "http://localhost:11434/api/chat");
        assert!(request.header_value("authorization").is_none());
        assert_eq!(request.body["think"], json!(true));
        assert_eq!(request.body["options"]["num_predict"], json!(256));
        assert_eq!(request.body["messages"][0]["content"], json!("Hi"));
    }

    #[test]
    fn test_format_tool_round_trip() {
        let messages = OllamaAdapter.format_turns(&[tool_round_trip_turn()]);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1]["thinking"], json!("I should read the file."));
        assert_eq!(
            messages[1]["tool_calls"][0]["function"]["arguments"],
            json!({"path": "notes.md"})
        );
        assert_eq!(messages[2]["role"], json!("tool"));
        assert_eq!(messages[2]["tool_name"], json!("read_file"));
        assert_eq!(messages[2]["content"], json!("hello notes"));
    }

    #[test]
    fn test_parse_content_thinking_and_done() {
        let mut parser = OllamaParser::default();
        let thinking = parser.parse(&json!({
            "message": {"role": "assistant", "content": "", "thinking": "hmm"}, "done": false
        }));
        assert_eq!(thinking.thinking.as_deref(), Some("hmm"));
        assert!(thinking.content.is_none());

        let content = parser.parse(&json!({
            "message": {"role": "assistant", "content": "Hi"}, "done": false
        }));
        assert_eq!(content.content.as_deref(), Some("Hi"));
        assert!(!content.is_complete);

        let done = parser.parse(&json!({
            "message": {"role": "assistant", "content": ""},
            "done": true, "prompt_eval_count": 26, "eval_count": 8
        }));
        assert!(done.is_complete);
        assert_eq!(done.usage.unwrap().output, 8);
    }

    #[test]
    fn test_parse_thinking_and_content_together() {
        let mut parser = OllamaParser::default();
        let result = parser.parse(&json!({
            "message": {"role": "assistant", "content": "Hi", "thinking": "greet back"},
            "done": false
        }));
        assert_eq!(result.thinking.as_deref(), Some("greet back"));
        assert_eq!(result.content.as_deref(), Some("Hi"));
    }

    #[test]
    fn test_parse_whole_tool_calls() {
        let mut parser = OllamaParser::default();
        let result = parser.parse(&json!({
            "message": {"role": "assistant", "content": "", "tool_calls": [
                {"function": {"name": "read_file", "arguments": {"path": "a.md"}}}
            ]},
            "done": false
        }));
        assert_eq!(result.tool_call_starts[0].id, "call_0");
        assert_eq!(result.tool_call_starts[0].initial_input, json!({"path": "a.md"}));
        assert_eq!(result.block_completes, vec![0]);
    }

    #[test]
    fn test_parse_error_line() {
        let mut parser = OllamaParser::default();
        let result = parser.parse(&json!({"error": "model 'nope' not found"}));
        assert_eq!(result.error.as_deref(), Some("model 'nope' not found"));
    }
}
