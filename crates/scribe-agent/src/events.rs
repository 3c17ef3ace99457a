//! UI-facing events republished by the orchestrator

use scribe_ai::{ToolCall, Turn, Usage};
use serde::{Deserialize, Serialize};

/// Events emitted while a round runs, in order:
/// `turn_start`, then per step `step_start`, deltas and tool events,
/// `step_complete`, and finally exactly one of `turn_complete` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TurnEvent {
    TurnStart {
        turn_id: String,
    },

    StepStart {
        turn_id: String,
        step_index: usize,
    },

    Thinking {
        turn_id: String,
        content: String,
    },

    Content {
        turn_id: String,
        content: String,
    },

    /// A tool call finished streaming
    ToolCall {
        turn_id: String,
        tool_call: ToolCall,
    },

    /// A tool produced its result, on either side of the wire
    ToolCallResult {
        turn_id: String,
        id: String,
        result: serde_json::Value,
    },

    StepComplete {
        turn_id: String,
        step_index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// Snapshot of the finished Turn
    TurnComplete {
        turn: Turn,
    },

    /// The round ended with an error or was cancelled
    Error {
        turn_id: String,
        message: String,
    },
}

impl TurnEvent {
    /// Check if this event ends a round
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::TurnComplete { .. } | TurnEvent::Error { .. })
    }
}
