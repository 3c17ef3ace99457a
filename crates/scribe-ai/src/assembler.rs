//! Reconstruction of tool-call input that arrives as JSON fragments

use std::collections::HashMap;
use thiserror::Error;

use crate::types::ToolCall;
use crate::wire::ToolCallStart;

/// Concatenated fragments of one tool call did not parse as JSON
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid input for tool '{name}' ({id}): {message}")]
pub struct ToolParseError {
    pub id: String,
    pub name: String,
    pub message: String,
}

#[derive(Debug)]
struct PendingToolCall {
    id: String,
    name: String,
    initial_input: serde_json::Value,
    server_executed: bool,
    buffer: String,
}

/// Open tool calls of one step, keyed by the vendor's block index.
///
/// Indices are opaque: nothing assumes index 0 opens before index 1, only
/// that each index sees start, deltas, complete in that order.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    pending: HashMap<usize, PendingToolCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool call with an empty fragment buffer
    pub fn start(&mut self, start: ToolCallStart) {
        let entry = PendingToolCall {
            id: start.id,
            name: start.name,
            initial_input: start.initial_input,
            server_executed: start.server_executed,
            buffer: String::new(),
        };
        if let Some(previous) = self.pending.insert(start.index, entry) {
            tracing::debug!(
                "Tool call index {} reopened, discarding '{}' ({})",
                start.index,
                previous.name,
                previous.id
            );
        }
    }

    /// Append a fragment. Unknown indices are ignored.
    pub fn delta(&mut self, index: usize, fragment: &str) {
        match self.pending.get_mut(&index) {
            Some(entry) => entry.buffer.push_str(fragment),
            None => tracing::debug!("Ignoring fragment for unknown tool index {}", index),
        }
    }

    /// Finalize and remove the entry at `index`.
    ///
    /// Returns `None` for an unknown index. With no fragments buffered the
    /// vendor's initial input is used as-is.
    pub fn complete(&mut self, index: usize) -> Option<Result<ToolCall, ToolParseError>> {
        let entry = self.pending.remove(&index)?;

        let input = if entry.buffer.trim().is_empty() {
            entry.initial_input
        } else {
            match serde_json::from_str(&entry.buffer) {
                Ok(value) => value,
                Err(e) => {
                    return Some(Err(ToolParseError {
                        id: entry.id,
                        name: entry.name,
                        message: e.to_string(),
                    }));
                }
            }
        };

        Some(Ok(ToolCall {
            id: entry.id,
            name: entry.name,
            input,
            result: None,
            is_server_executed: entry.server_executed,
        }))
    }

    /// Indices still open, ascending
    pub fn open_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.pending.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
