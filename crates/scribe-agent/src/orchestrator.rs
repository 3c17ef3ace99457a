//! Turn orchestration: the bounded multi-step loop with cooperative cancellation

use futures::StreamExt;
use parking_lot::Mutex;
use scribe_ai::{
    AttachedFile, Conversation, ModelSpec, ProviderCredentials, RequestContext, Step, StreamEvent,
    Transport, Turn, UserInput, adapter_for, stream_events,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    events::TurnEvent,
    history::HistoryStore,
    tool::ToolExecutor,
};

/// Upper bound on inference passes per Turn
pub const MAX_STEPS: usize = 10;

/// `turn.error` of a cancelled Turn
pub const CANCELLED_MESSAGE: &str = "Request cancelled";

/// `turn.error` of a Turn found unfinished when history was loaded
pub const INTERRUPTED_MESSAGE: &str = "Interrupted";

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Provider and vendor model id
    pub model: ModelSpec,
    /// System prompt
    pub system_prompt: Option<String>,
    /// Ask the vendor for reasoning output
    pub thinking: bool,
    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
    /// Step budget per Turn, at most [`MAX_STEPS`]
    pub max_steps: usize,
    /// API key and endpoint for the model's provider
    pub credentials: ProviderCredentials,
}

impl OrchestratorConfig {
    pub fn new(model: ModelSpec) -> Self {
        Self {
            model,
            system_prompt: None,
            thinking: false,
            max_tokens: None,
            max_steps: MAX_STEPS,
            credentials: ProviderCredentials::default(),
        }
    }
}

/// Returned when a round is accepted
#[derive(Debug, Clone)]
pub struct RoundHandle {
    pub turn_id: String,
    /// Cancels this round only
    pub cancel: CancellationToken,
}

/// Replacements applied to the rerun Turn's input
#[derive(Debug, Clone, Default)]
pub struct RerunOverrides {
    pub prompt: Option<String>,
    pub files: Option<Vec<AttachedFile>>,
}

enum RoundEnd {
    Complete,
    Failed(String),
    Cancelled,
}

enum StepEnd {
    Done,
    Failed(String),
}

/// Owns the Conversation and drives rounds against one model
pub struct Orchestrator {
    config: OrchestratorConfig,
    conversation: Conversation,
    transport: Arc<dyn Transport>,
    tools: Arc<dyn ToolExecutor>,
    event_tx: broadcast::Sender<TurnEvent>,
    cancel_tokens: Mutex<HashMap<String, CancellationToken>>,
    store: Option<Arc<dyn HistoryStore>>,
    history_id: Option<String>,
    title: Option<String>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        transport: Arc<dyn Transport>,
        tools: Arc<dyn ToolExecutor>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            conversation: vec![],
            transport,
            tools,
            event_tx,
            cancel_tokens: Mutex::new(HashMap::new()),
            store: None,
            history_id: None,
            title: None,
        }
    }

    /// Persist the conversation under `id` after every round
    pub fn with_history_store(mut self, store: Arc<dyn HistoryStore>, id: impl Into<String>) -> Self {
        self.store = Some(store);
        self.history_id = Some(id.into());
        self
    }

    /// Subscribe to UI events
    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.event_tx.subscribe()
    }

    /// Snapshot of the conversation
    pub fn history(&self) -> Conversation {
        self.conversation.clone()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.conversation
    }

    /// Replace the conversation. Unfinished Turns are closed as interrupted.
    pub fn set_history(&mut self, mut turns: Conversation) {
        for turn in turns.iter_mut().filter(|t| !t.is_complete) {
            turn.is_complete = true;
            turn.error.get_or_insert_with(|| INTERRUPTED_MESSAGE.to_string());
        }
        self.cancel_tokens.lock().clear();
        self.conversation = turns;
    }

    /// Load the conversation from the history store, if one is attached
    pub fn load(&mut self) -> Result<()> {
        let (Some(store), Some(id)) = (&self.store, &self.history_id) else {
            return Ok(());
        };
        let turns = store.load_history(id)?;
        tracing::debug!("Loaded {} turns from history {}", turns.len(), id);
        self.set_history(turns);
        Ok(())
    }

    /// Title returned by the last successful save
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// A Turn is still in progress
    pub fn is_running(&self) -> bool {
        self.conversation.iter().any(|t| !t.is_complete)
    }

    /// Cancel the round for `turn_id`. Returns false if it is not running.
    pub fn cancel(&self, turn_id: &str) -> bool {
        match self.cancel_tokens.lock().get(turn_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Accept a new round: append its Turn and allocate its cancellation token
    pub fn begin_round(&mut self, input: UserInput) -> Result<RoundHandle> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }

        let turn = Turn::new(input);
        let turn_id = turn.id.clone();
        let cancel = CancellationToken::new();
        self.cancel_tokens
            .lock()
            .insert(turn_id.clone(), cancel.clone());
        self.conversation.push(turn);

        Ok(RoundHandle { turn_id, cancel })
    }

    /// Drive an accepted round to a terminal state.
    ///
    /// Vendor failures and cancellation are recorded on the Turn, not returned.
    pub async fn run(&mut self, turn_id: &str) -> Result<()> {
        let index = self.turn_index(turn_id)?;
        if self.conversation[index].is_complete {
            return Err(Error::Other(format!("Turn {} already finished", turn_id)));
        }
        let cancel = self
            .cancel_tokens
            .lock()
            .get(turn_id)
            .cloned()
            .unwrap_or_default();

        self.emit(TurnEvent::TurnStart {
            turn_id: turn_id.to_string(),
        });

        let end = self.drive(index, &cancel).await;
        self.cancel_tokens.lock().remove(turn_id);
        self.finish(index, end);
        self.save();

        Ok(())
    }

    /// Start a round and run it. Returns the new Turn's id.
    pub async fn prompt(&mut self, input: UserInput) -> Result<String> {
        let handle = self.begin_round(input)?;
        self.run(&handle.turn_id).await?;
        Ok(handle.turn_id)
    }

    /// Discard `turn_id` and every later Turn, then run its input again
    pub async fn rerun(&mut self, turn_id: &str, overrides: RerunOverrides) -> Result<String> {
        let handle = self.begin_rerun(turn_id, overrides)?;
        self.run(&handle.turn_id).await?;
        Ok(handle.turn_id)
    }

    /// Accept a rerun of `turn_id` without driving it
    pub fn begin_rerun(&mut self, turn_id: &str, overrides: RerunOverrides) -> Result<RoundHandle> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        let index = self.turn_index(turn_id)?;
        let input = self.conversation[index]
            .user_input
            .with_overrides(overrides.prompt.as_deref(), overrides.files);
        self.conversation.truncate(index);
        self.begin_round(input)
    }

    fn turn_index(&self, turn_id: &str) -> Result<usize> {
        self.conversation
            .iter()
            .position(|t| t.id == turn_id)
            .ok_or_else(|| Error::TurnNotFound(turn_id.to_string()))
    }

    fn emit(&self, event: TurnEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn drive(&mut self, index: usize, cancel: &CancellationToken) -> RoundEnd {
        let adapter = match adapter_for(self.config.model.provider) {
            Ok(adapter) => adapter,
            Err(e) => return RoundEnd::Failed(e.to_string()),
        };
        let definitions = self.tools.definitions();
        let max_steps = self.config.max_steps.clamp(1, MAX_STEPS);
        let turn_id = self.conversation[index].id.clone();

        loop {
            self.conversation[index].steps.push(Step::default());
            let step_index = self.conversation[index].steps.len() - 1;
            self.emit(TurnEvent::StepStart {
                turn_id: turn_id.clone(),
                step_index,
            });

            let context = RequestContext {
                model: &self.config.model.model,
                system_prompt: self.config.system_prompt.as_deref(),
                turns: &self.conversation[..=index],
                tools: &definitions,
                thinking: self.config.thinking,
                max_tokens: self.config.max_tokens,
            };
            let request = match adapter.build_request(&context, &self.config.credentials) {
                Ok(request) => request,
                Err(e) => return RoundEnd::Failed(e.to_string()),
            };

            let mut events = stream_events(adapter, self.transport.clone(), request);
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return RoundEnd::Cancelled,
                    event = events.next() => event,
                };
                let Some(event) = event else { break };
                match self.apply_event(index, &turn_id, event) {
                    Some(StepEnd::Done) => break,
                    Some(StepEnd::Failed(message)) => return RoundEnd::Failed(message),
                    None => {}
                }
            }
            drop(events);

            let step = &self.conversation[index].steps[step_index];
            let pending = step.pending_tool_calls();
            self.emit(TurnEvent::StepComplete {
                turn_id: turn_id.clone(),
                step_index,
                usage: step.usage,
            });

            if pending.is_empty() {
                return RoundEnd::Complete;
            }
            if step_index + 1 >= max_steps {
                tracing::warn!(
                    "Step limit {} reached with {} tool calls pending",
                    max_steps,
                    pending.len()
                );
                return RoundEnd::Complete;
            }

            for call in pending {
                tracing::debug!("Dispatching tool '{}' ({})", call.name, call.id);
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return RoundEnd::Cancelled,
                    outcome = self.tools.execute(&call.name, call.input.clone()) => outcome,
                };
                let result = outcome.unwrap_or_else(|e| {
                    tracing::debug!("Tool '{}' failed: {}", call.name, e);
                    e.to_result()
                });

                self.conversation[index].steps[step_index].set_tool_result(&call.id, result.clone());
                self.emit(TurnEvent::ToolCallResult {
                    turn_id: turn_id.clone(),
                    id: call.id,
                    result,
                });
            }
        }
    }

    /// Fold one canonical event into the current Step and republish it
    fn apply_event(&mut self, index: usize, turn_id: &str, event: StreamEvent) -> Option<StepEnd> {
        let event_tx = &self.event_tx;
        let emit = |event: TurnEvent| {
            let _ = event_tx.send(event);
        };
        let step = self.conversation[index].current_step_mut()?;
        let turn_id = turn_id.to_string();

        match event {
            StreamEvent::Thinking { content } => {
                step.append_thinking(&content);
                emit(TurnEvent::Thinking { turn_id, content });
            }
            StreamEvent::Content { content } => {
                step.append_content(&content);
                emit(TurnEvent::Content { turn_id, content });
            }
            StreamEvent::ToolCall { tool_call } => {
                step.upsert_tool_call(tool_call.clone());
                emit(TurnEvent::ToolCall { turn_id, tool_call });
            }
            StreamEvent::ToolCallResult { tool_call_result } => {
                if !step.set_tool_result(&tool_call_result.id, tool_call_result.result.clone()) {
                    tracing::debug!("Result for unknown tool call {}", tool_call_result.id);
                }
                emit(TurnEvent::ToolCallResult {
                    turn_id,
                    id: tool_call_result.id,
                    result: tool_call_result.result,
                });
            }
            StreamEvent::Signature { content } => {
                step.signature = Some(content);
            }
            StreamEvent::Error {
                content,
                tool_call_id: Some(id),
            } => {
                tracing::warn!("Dropping tool call {}: {}", id, content);
            }
            StreamEvent::Error {
                content,
                tool_call_id: None,
            } => return Some(StepEnd::Failed(content)),
            StreamEvent::Done { usage } => {
                if usage.is_some() {
                    step.usage = usage;
                }
                return Some(StepEnd::Done);
            }
        }
        None
    }

    fn finish(&mut self, index: usize, end: RoundEnd) {
        let turn_id = self.conversation[index].id.clone();
        match end {
            RoundEnd::Complete => {
                let turn = &mut self.conversation[index];
                turn.is_complete = true;
                let turn = turn.clone();
                self.emit(TurnEvent::TurnComplete { turn });
            }
            RoundEnd::Failed(message) => {
                tracing::warn!("Turn {} failed: {}", turn_id, message);
                let turn = &mut self.conversation[index];
                turn.error = Some(message.clone());
                turn.is_complete = true;
                self.emit(TurnEvent::Error { turn_id, message });
            }
            RoundEnd::Cancelled => {
                tracing::debug!("Turn {} cancelled", turn_id);
                let turn = &mut self.conversation[index];
                turn.error = Some(CANCELLED_MESSAGE.to_string());
                turn.is_complete = true;
                if turn.steps.last().is_some_and(Step::is_empty) {
                    turn.steps.pop();
                }
                if turn.steps.is_empty() {
                    self.conversation.remove(index);
                }
                self.emit(TurnEvent::Error {
                    turn_id,
                    message: CANCELLED_MESSAGE.to_string(),
                });
            }
        }
    }

    fn save(&mut self) {
        let (Some(store), Some(id)) = (&self.store, &self.history_id) else {
            return;
        };
        match store.save_history(id, &self.conversation) {
            Ok(title) => self.title = Some(title),
            Err(e) => tracing::warn!("Failed to save history {}: {}", id, e),
        }
    }
}
