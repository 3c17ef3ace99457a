//! Canonical, vendor-agnostic stream events

use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

use crate::types::{ToolCall, Usage};

/// Result of a tool call executed on the vendor side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub id: String,
    pub result: serde_json::Value,
}

/// Events emitted by the normalization engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Reasoning text delta
    Thinking { content: String },
    /// Answer text delta
    Content { content: String },
    /// A tool call whose input has been fully reconstructed
    ToolCall {
        #[serde(rename = "toolCall")]
        tool_call: ToolCall,
    },
    /// Result of a server-executed tool call
    ToolCallResult {
        #[serde(rename = "toolCallResult")]
        tool_call_result: ToolCallResult,
    },
    /// Opaque signature over the step's thinking
    Signature { content: String },
    /// Failure. With `tool_call_id` set it only concerns that call and the
    /// stream continues; otherwise it ends the stream.
    Error {
        content: String,
        #[serde(
            rename = "toolCallId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        tool_call_id: Option<String>,
    },
    /// Vendor finished; nothing follows
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl StreamEvent {
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content {
            content: text.into(),
        }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self::Thinking {
            content: text.into(),
        }
    }

    /// Stream-ending error
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            content: message.into(),
            tool_call_id: None,
        }
    }

    /// Error scoped to one tool call
    pub fn tool_error(tool_call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            content: message.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn done() -> Self {
        Self::Done { usage: None }
    }

    /// Check if this event ends the stream
    pub fn is_terminal(&self) -> bool {
        match self {
            StreamEvent::Done { .. } => true,
            StreamEvent::Error { tool_call_id, .. } => tool_call_id.is_none(),
            _ => false,
        }
    }
}

/// A stream of canonical events
pub type StreamEventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;
