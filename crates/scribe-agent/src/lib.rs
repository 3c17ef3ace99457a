//! scribe-agent: Turn orchestration with tool execution
//!
//! The [`Orchestrator`] owns the Conversation, drives each round through up
//! to [`MAX_STEPS`] inference passes, executes requested tools between them
//! and republishes progress as [`TurnEvent`]s.

pub mod error;
pub mod events;
pub mod history;
pub mod orchestrator;
pub mod tool;

pub use error::{Error, Result};
pub use events::TurnEvent;
pub use history::HistoryStore;
pub use orchestrator::{
    CANCELLED_MESSAGE, INTERRUPTED_MESSAGE, MAX_STEPS, Orchestrator, OrchestratorConfig,
    RerunOverrides, RoundHandle,
};
pub use tool::{BoxedTool, Tool, ToolError, ToolExecutor, ToolRegistry};
