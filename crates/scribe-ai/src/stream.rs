//! Normalization engine: raw vendor lines in, canonical events out

use std::sync::Arc;

use async_stream::stream;
use futures::StreamExt;

use crate::{
    assembler::ToolCallAssembler,
    event::{StreamEvent, StreamEventStream, ToolCallResult},
    providers::{ProviderAdapter, WireParser, WireRequest},
    transport::Transport,
    types::Usage,
    wire::{ParseResult, extract_json_object},
};

/// Turns parse results of one stream into canonical events
pub struct Normalizer {
    parser: Box<dyn WireParser>,
    assembler: ToolCallAssembler,
    usage: Option<Usage>,
    finished: bool,
}

impl Normalizer {
    pub fn new(parser: Box<dyn WireParser>) -> Self {
        Self {
            parser,
            assembler: ToolCallAssembler::new(),
            usage: None,
            finished: false,
        }
    }

    /// A terminal event has been produced
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one raw line. Lines without a JSON object, or whose object does
    /// not parse, produce nothing.
    pub fn push_line(&mut self, line: &str) -> Vec<StreamEvent> {
        if self.finished {
            return vec![];
        }
        let Some(raw) = extract_json_object(line) else {
            return vec![];
        };
        let object: serde_json::Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("Skipping unparseable wire object: {} ({})", e, raw);
                return vec![];
            }
        };
        let result = self.parser.parse(&object);
        self.apply(result)
    }

    fn apply(&mut self, result: ParseResult) -> Vec<StreamEvent> {
        if let Some(message) = result.error {
            return vec![self.terminate(StreamEvent::error(message))];
        }

        let mut events = vec![];

        if let Some(thinking) = result.thinking.filter(|t| !t.is_empty()) {
            events.push(StreamEvent::thinking(thinking));
        }
        if let Some(content) = result.content.filter(|c| !c.is_empty()) {
            events.push(StreamEvent::content(content));
        }

        for start in result.tool_call_starts {
            self.assembler.start(start);
        }
        for delta in result.tool_call_deltas {
            self.assembler.delta(delta.index, &delta.fragment);
        }
        for index in result.block_completes {
            match self.assembler.complete(index) {
                Some(Ok(tool_call)) => events.push(StreamEvent::ToolCall { tool_call }),
                Some(Err(e)) => events.push(StreamEvent::tool_error(e.id.clone(), e.to_string())),
                // text and thinking blocks close through the same signal
                None => {}
            }
        }

        for tool_result in result.tool_results {
            events.push(StreamEvent::ToolCallResult {
                tool_call_result: ToolCallResult {
                    id: tool_result.tool_call_id,
                    result: tool_result.result,
                },
            });
        }

        if let Some(signature) = result.signature.filter(|s| !s.is_empty()) {
            events.push(StreamEvent::Signature { content: signature });
        }

        if let Some(usage) = result.usage {
            self.usage.get_or_insert_with(Usage::default).merge(&usage);
        }

        if result.is_complete {
            let done = self.done();
            events.push(done);
        }

        events
    }

    /// End of wire. Yields `done` unless a terminal was already produced.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.finished {
            return None;
        }
        Some(self.done())
    }

    fn done(&mut self) -> StreamEvent {
        let open = self.assembler.open_indices();
        if !open.is_empty() {
            tracing::warn!("Dropping tool calls left open at end of stream: {:?}", open);
        }
        self.terminate(StreamEvent::Done { usage: self.usage })
    }

    fn terminate(&mut self, event: StreamEvent) -> StreamEvent {
        self.finished = true;
        event
    }
}

/// Open `request` on `transport` and normalize the response.
///
/// Never fails: open and read failures become the single terminal `error`
/// event. Dropping the stream drops the connection.
pub fn stream_events(
    adapter: &'static dyn ProviderAdapter,
    transport: Arc<dyn Transport>,
    request: WireRequest,
) -> StreamEventStream {
    Box::pin(stream! {
        let mut lines = match transport.open_stream(request).await {
            Ok(lines) => lines,
            Err(e) => {
                tracing::debug!("Opening {} stream failed: {}", adapter.id(), e);
                yield StreamEvent::error(e.to_string());
                return;
            }
        };

        let mut normalizer = Normalizer::new(adapter.parser());

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    yield StreamEvent::error(e.to_string());
                    return;
                }
            };
            for event in normalizer.push_line(&line) {
                yield event;
            }
            if normalizer.is_finished() {
                return;
            }
        }

        if let Some(done) = normalizer.finish() {
            yield done;
        }
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedTransport;
    use super::*;
    use crate::error::Error;
    use crate::providers::adapter_for;
    use crate::types::ProviderId;
    use serde_json::json;

    async fn run(provider: ProviderId, transport: ScriptedTransport) -> Vec<StreamEvent> {
        let request = WireRequest::post("http://test.invalid", json!({}));
        stream_events(adapter_for(provider).unwrap(), Arc::new(transport), request)
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_anthropic_stream_normalizes() {
        let transport = ScriptedTransport::new(vec![vec![
            "event: message_start",
            r#"data: {"type":"message_start","message":{"usage":{"input_tokens":10,"output_tokens":1}}}"#,
            "",
            r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"thinking","thinking":""}}"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"..."}}"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"signature_delta","signature":"sig"}}"#,
            r#"data: {"type":"content_block_stop","index":0}"#,
            ": ping",
            r#"data: {"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"read_file","input":{}}}"#,
            r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"path\":"}}"#,
            r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"a.md\"}"}}"#,
            r#"data: {"type":"content_block_stop","index":1}"#,
            r#"data: {"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":30}}"#,
            r#"data: {"type":"message_stop"}"#,
        ]]);
        let events = run(ProviderId::Anthropic, transport).await;

        assert_eq!(events[0], StreamEvent::thinking("..."));
        assert_eq!(events[1], StreamEvent::Signature { content: "sig".into() });
        match &events[2] {
            StreamEvent::ToolCall { tool_call } => {
                assert_eq!(tool_call.id, "toolu_1");
                assert_eq!(tool_call.input, json!({"path": "a.md"}));
            }
            other => panic!("expected tool_call, got {:?}", other),
        }
        match &events[3] {
            StreamEvent::Done { usage: Some(usage) } => {
                assert_eq!((usage.input, usage.output), (10, 30));
            }
            other => panic!("expected done with usage, got {:?}", other),
        }
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn test_google_thought_and_answer_in_one_chunk() {
        let transport = ScriptedTransport::new(vec![vec![
            r#"data: {"candidates":[{"content":{"role":"model","parts":[{"text":"Let me think","thought":true},{"text":"Answer"}]},"finishReason":"STOP"}]}"#,
        ]]);
        let events = run(ProviderId::Google, transport).await;

        assert_eq!(
            events,
            vec![
                StreamEvent::thinking("Let me think"),
                StreamEvent::content("Answer"),
                StreamEvent::done(),
            ]
        );
    }

    #[tokio::test]
    async fn test_openai_parallel_tool_calls() {
        let transport = ScriptedTransport::new(vec![vec![
            r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"ls","arguments":""}},{"index":1,"id":"b","function":{"name":"cat","arguments":"{\"p\":"}}]},"finish_reason":null}]}"#,
            r#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":1,"function":{"arguments":"1}"}},{"index":0,"function":{"arguments":"{}"}}]},"finish_reason":null}]}"#,
            r#"data: {"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
            "data: [DONE]",
        ]]);
        let events = run(ProviderId::OpenAI, transport).await;

        let calls: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCall { tool_call } => Some((tool_call.id.as_str(), tool_call.input.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(calls, vec![("a", json!({})), ("b", json!({"p": 1}))]);
        assert_eq!(events.last(), Some(&StreamEvent::done()));
    }

    #[tokio::test]
    async fn test_bad_tool_json_is_scoped_error() {
        let transport = ScriptedTransport::new(vec![vec![
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"x","input":{}}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"a\":"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"still here"}}"#,
            r#"{"type":"message_stop"}"#,
        ]]);
        let events = run(ProviderId::Anthropic, transport).await;

        match &events[0] {
            StreamEvent::Error { tool_call_id, .. } => assert_eq!(tool_call_id.as_deref(), Some("t1")),
            other => panic!("expected scoped error, got {:?}", other),
        }
        assert_eq!(events[1], StreamEvent::content("still here"));
        assert_eq!(events[2], StreamEvent::done());
    }

    #[tokio::test]
    async fn test_noise_and_invalid_json_are_skipped() {
        let transport = ScriptedTransport::new(vec![vec![
            "",
            ": keep-alive",
            "event: ping",
            r#"data: {"type":"content_block_delta", broken}"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"ok"}}"#,
        ]]);
        let events = run(ProviderId::Anthropic, transport).await;
        // end of wire without message_stop still terminates with done
        assert_eq!(events, vec![StreamEvent::content("ok"), StreamEvent::done()]);
    }

    #[tokio::test]
    async fn test_nothing_after_terminal() {
        let transport = ScriptedTransport::new(vec![vec![
            r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#,
            r#"{"message":{"role":"assistant","content":""},"done":true,"prompt_eval_count":3,"eval_count":1}"#,
            r#"{"message":{"role":"assistant","content":"late"},"done":false}"#,
        ]]);
        let events = run(ProviderId::Ollama, transport).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::content("Hi"));
        assert!(events[1].is_terminal());
    }

    #[tokio::test]
    async fn test_vendor_error_ends_stream() {
        let transport = ScriptedTransport::new(vec![vec![
            r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
            r#"data: {"type":"message_stop"}"#,
        ]]);
        let events = run(ProviderId::Anthropic, transport).await;
        assert_eq!(events, vec![StreamEvent::error("Overloaded")]);
    }

    #[tokio::test]
    async fn test_open_failure_is_single_error_event() {
        let events = run(ProviderId::Anthropic, ScriptedTransport::new(vec![])).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Error { tool_call_id: None, content } if content.contains("connection refused")));
    }

    #[tokio::test]
    async fn test_mid_stream_read_failure() {
        let transport = ScriptedTransport::with_body(vec![
            Ok(r#"{"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}"#.to_string()),
            Err(Error::Transport("socket reset".into())),
            Ok(r#"{"candidates":[{"content":{"parts":[{"text":"lo"}]}}]}"#.to_string()),
        ]);
        let events = run(ProviderId::Google, transport).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::content("Hel"));
        assert!(matches!(&events[1], StreamEvent::Error { tool_call_id: None, .. }));
    }

    #[test]
    fn test_open_tool_call_dropped_at_finish() {
        let mut normalizer = Normalizer::new(adapter_for(ProviderId::Anthropic).unwrap().parser());
        let events = normalizer.push_line(
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t","name":"x","input":{}}}"#,
        );
        assert!(events.is_empty());
        assert_eq!(normalizer.finish(), Some(StreamEvent::done()));
        assert_eq!(normalizer.finish(), None);
    }
}
