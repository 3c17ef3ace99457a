//! Google Gemini (Generative Language API) adapter

use serde_json::{Value, json};

use super::{
    DEFAULT_MAX_TOKENS, ProviderAdapter, ProviderCredentials, RequestContext, TurnFormatter,
    WireParser, WireRequest, u32_field,
};
use crate::{
    error::{Error, Result},
    types::{ProviderId, Turn, Usage},
    wire::{ParseResult, ToolCallStart},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct GoogleAdapter;

impl ProviderAdapter for GoogleAdapter {
    fn id(&self) -> ProviderId {
        ProviderId::Google
    }

    fn build_request(
        &self,
        context: &RequestContext<'_>,
        credentials: &ProviderCredentials,
    ) -> Result<WireRequest> {
        let api_key = credentials
            .resolve_api_key(ProviderId::Google)?
            .ok_or(Error::InvalidApiKey("google"))?;
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            credentials.base_url(ProviderId::Google),
            context.model
        );

        let mut generation_config = json!({
            "maxOutputTokens": context.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if context.thinking {
            generation_config["thinkingConfig"] = json!({ "includeThoughts": true });
        }

        let mut body = json!({
            "contents": self.format_turns(context.turns),
            "generationConfig": generation_config,
        });

        if let Some(system_prompt) = context.system_prompt {
            body["systemInstruction"] = json!({ "parts": [{ "text": system_prompt }] });
        }

        if !context.tools.is_empty() {
            let declarations: Vec<Value> = context
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }

        tracing::debug!("Google API URL: {}", url);

        Ok(WireRequest::post(url, body).header("x-goog-api-key", api_key))
    }

    fn parser(&self) -> Box<dyn WireParser> {
        Box::new(GoogleParser::default())
    }
}

impl TurnFormatter for GoogleAdapter {
    fn format_turns(&self, turns: &[Turn]) -> Vec<Value> {
        let mut contents = vec![];

        for turn in turns {
            contents.push(json!({
                "role": "user",
                "parts": [{ "text": turn.user_input.render() }]
            }));

            for step in &turn.steps {
                let calls: Vec<_> = step
                    .tool_calls
                    .iter()
                    .filter(|call| !call.is_server_executed)
                    .collect();
                let mut parts = vec![];

                if let Some(content) = step.content.as_deref().filter(|c| !c.is_empty()) {
                    parts.push(json!({ "text": content }));
                }
                for call in &calls {
                    parts.push(json!({
                        "functionCall": { "name": call.name, "args": call.input }
                    }));
                }
                if parts.is_empty() {
                    continue;
                }

                // The signature rides on the first function call, or on the text part
                if let Some(signature) = &step.signature {
                    let target = parts
                        .iter()
                        .position(|p| p.get("functionCall").is_some())
                        .unwrap_or(0);
                    parts[target]["thoughtSignature"] = json!(signature);
                }
                contents.push(json!({ "role": "model", "parts": parts }));

                if !calls.is_empty() {
                    let responses: Vec<Value> = calls
                        .iter()
                        .map(|call| {
                            let result = call
                                .result
                                .clone()
                                .unwrap_or_else(|| json!({ "error": super::NOT_EXECUTED }));
                            json!({
                                "functionResponse": {
                                    "name": call.name,
                                    "response": { "result": result }
                                }
                            })
                        })
                        .collect();
                    contents.push(json!({ "role": "user", "parts": responses }));
                }
            }
        }

        contents
    }
}

/// Gemini sends function calls whole, so each opens and completes at once
#[derive(Debug, Default)]
struct GoogleParser {
    calls_seen: usize,
}

impl WireParser for GoogleParser {
    fn parse(&mut self, object: &Value) -> ParseResult {
        if let Some(error) = object.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown Google error");
            return ParseResult::failed(message);
        }

        let mut result = ParseResult::default();
        let candidate = object.pointer("/candidates/0");

        let parts = candidate
            .and_then(|c| c.pointer("/content/parts"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut answer = String::new();
        let mut thought = String::new();
        for part in parts {
            if let Some(signature) = part.get("thoughtSignature").and_then(Value::as_str) {
                result.signature = Some(signature.to_string());
            }

            if let Some(call) = part.get("functionCall") {
                let index = self.calls_seen;
                self.calls_seen += 1;
                result.tool_call_starts.push(ToolCallStart {
                    index,
                    id: format!("call_{}", index),
                    name: call
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    initial_input: call.get("args").cloned().unwrap_or_else(|| json!({})),
                    server_executed: false,
                });
                result.block_completes.push(index);
            } else if let Some(text) = part.get("text").and_then(Value::as_str) {
                if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
                    thought.push_str(text);
                } else {
                    answer.push_str(text);
                }
            }
        }

        result.thinking = Some(thought).filter(|t| !t.is_empty());
        result.content = Some(answer).filter(|a| !a.is_empty());

        if let Some(usage) = object.get("usageMetadata") {
            result.usage = Some(Usage {
                input: u32_field(usage, "promptTokenCount"),
                output: u32_field(usage, "candidatesTokenCount")
                    .saturating_add(u32_field(usage, "thoughtsTokenCount")),
                cache_read: u32_field(usage, "cachedContentTokenCount"),
                cache_write: 0,
            });
        }

        if candidate
            .and_then(|c| c.get("finishReason"))
            .is_some_and(|reason| !reason.is_null())
        {
            result.is_complete = true;
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::{in_progress_turn, tool_round_trip_turn};
    use crate::types::ToolDefinition;

    #[test]
    fn test_build_request_shape() {
        let turns = vec![in_progress_turn("Hi")];
        let tools = vec![ToolDefinition::new("read_file", "Read a file", json!({"type": "object"}))];
        let context = RequestContext {
            model: "gemini-2.5-flash",
            system_prompt: Some("Be brief."),
            turns: &turns,
            tools: &tools,
            thinking: true,
            max_tokens: None,
        };
        let request = GoogleAdapter
            .build_request(&context, &ProviderCredentials::with_api_key("g-key"))
            .unwrap();

        assert_eq!(
            request.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse"
        );
        assert_eq!(request.header_value("x-goog-api-key"), Some("g-key"));
        assert_eq!(request.body["systemInstruction"]["parts"][0]["text"], json!("Be brief."));
        assert_eq!(
            request.body["tools"][0]["functionDeclarations"][0]["name"],
            json!("read_file")
        );
        assert_eq!(
            request.body["generationConfig"]["thinkingConfig"]["includeThoughts"],
            json!(true)
        );
    }

    #[test]
    fn test_format_tool_round_trip() {
        let contents = GoogleAdapter.format_turns(&[tool_round_trip_turn()]);
        assert_eq!(contents.len(), 4);

        let model = &contents[1];
        assert_eq!(model["role"], json!("model"));
        assert_eq!(model["parts"][0]["text"], json!("Let me look."));
        assert_eq!(model["parts"][1]["functionCall"]["name"], json!("read_file"));
        assert_eq!(model["parts"][1]["thoughtSignature"], json!("sig-1"));
        assert!(model["parts"][0].get("thoughtSignature").is_none());

        let response = &contents[2]["parts"][0]["functionResponse"];
        assert_eq!(response["name"], json!("read_file"));
        assert_eq!(response["response"]["result"], json!("hello notes"));

        assert_eq!(contents[3]["parts"][0]["text"], json!("It says hello."));
    }

    #[test]
    fn test_parse_text_and_thought_parts() {
        let mut parser = GoogleParser::default();
        let text = parser.parse(&json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "Hello"}]}}]
        }));
        assert_eq!(text.content.as_deref(), Some("Hello"));
        assert!(!text.is_complete);

        let thought = parser.parse(&json!({
            "candidates": [{"content": {"parts": [{"text": "pondering", "thought": true}]}}]
        }));
        assert_eq!(thought.thinking.as_deref(), Some("pondering"));
        assert!(thought.content.is_none());
    }

    #[test]
    fn test_parse_thought_and_answer_in_one_chunk() {
        let mut parser = GoogleParser::default();
        let result = parser.parse(&json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Let me think", "thought": true},
                    {"text": "Answer"}
                ]},
                "finishReason": "STOP"
            }]
        }));
        assert_eq!(result.thinking.as_deref(), Some("Let me think"));
        assert_eq!(result.content.as_deref(), Some("Answer"));
        assert!(result.is_complete);
    }

    #[test]
    fn test_usage_output_saturates() {
        let mut parser = GoogleParser::default();
        let result = parser.parse(&json!({
            "usageMetadata": {
                "promptTokenCount": 1,
                "candidatesTokenCount": u32::MAX,
                "thoughtsTokenCount": 5
            }
        }));
        assert_eq!(result.usage.unwrap().output, u32::MAX);
    }

    #[test]
    fn test_parse_function_calls_complete_immediately() {
        let mut parser = GoogleParser::default();
        let result = parser.parse(&json!({
            "candidates": [{"content": {"parts": [
                {"functionCall": {"name": "read_file", "args": {"path": "a"}}, "thoughtSignature": "sig"},
                {"functionCall": {"name": "ls", "args": {}}}
            ]}}]
        }));
        assert_eq!(result.tool_call_starts.len(), 2);
        assert_eq!(result.tool_call_starts[0].id, "call_0");
        assert_eq!(result.tool_call_starts[1].id, "call_1");
        assert_eq!(result.tool_call_starts[0].initial_input, json!({"path": "a"}));
        assert_eq!(result.block_completes, vec![0, 1]);
        assert_eq!(result.signature.as_deref(), Some("sig"));

        // indices keep counting across objects
        let next = parser.parse(&json!({
            "candidates": [{"content": {"parts": [{"functionCall": {"name": "ls"}}]}}]
        }));
        assert_eq!(next.tool_call_starts[0].id, "call_2");
    }

    #[test]
    fn test_parse_finish_and_usage() {
        let mut parser = GoogleParser::default();
        let result = parser.parse(&json!({
            "candidates": [{"content": {"parts": [{"text": "."}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 2, "thoughtsTokenCount": 5}
        }));
        assert!(result.is_complete);
        let usage = result.usage.unwrap();
        assert_eq!((usage.input, usage.output), (7, 7));
    }

    #[test]
    fn test_parse_error_object() {
        let mut parser = GoogleParser::default();
        let result = parser.parse(&json!({"error": {"code": 400, "message": "API key not valid"}}));
        assert_eq!(result.error.as_deref(), Some("API key not valid"));
    }
}
