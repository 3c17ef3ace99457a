//! Core types shared by adapters and the orchestrator

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Known LLM vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Anthropic,
    OpenAI,
    Google,
    Ollama,
    OpenRouter,
    Groq,
}

impl ProviderId {
    /// All providers, in lookup-table order
    pub const ALL: [ProviderId; 6] = [
        ProviderId::Anthropic,
        ProviderId::OpenAI,
        ProviderId::Google,
        ProviderId::Ollama,
        ProviderId::OpenRouter,
        ProviderId::Groq,
    ];

    /// Identifier used in model strings and config files
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Anthropic => "anthropic",
            ProviderId::OpenAI => "openai",
            ProviderId::Google => "google",
            ProviderId::Ollama => "ollama",
            ProviderId::OpenRouter => "openrouter",
            ProviderId::Groq => "groq",
        }
    }

    /// Environment variables consulted for this provider's API key, in order
    pub fn api_key_env_vars(&self) -> &'static [&'static str] {
        match self {
            ProviderId::Anthropic => &["ANTHROPIC_API_KEY"],
            ProviderId::OpenAI => &["OPENAI_API_KEY"],
            ProviderId::Google => &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
            ProviderId::Ollama => &[],
            ProviderId::OpenRouter => &["OPENROUTER_API_KEY"],
            ProviderId::Groq => &["GROQ_API_KEY"],
        }
    }

    /// Base URL used when the configuration does not override it
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderId::Anthropic => "https://api.anthropic.com",
            ProviderId::OpenAI => "https://api.openai.com/v1",
            ProviderId::Google => "https://generativelanguage.googleapis.com/v1beta",
            ProviderId::Ollama => "http://localhost:11434",
            ProviderId::OpenRouter => "https://openrouter.ai/api/v1",
            ProviderId::Groq => "https://api.groq.com/openai/v1",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        ProviderId::ALL
            .into_iter()
            .find(|p| p.as_str() == lower)
            .ok_or_else(|| Error::UnsupportedProvider(s.to_string()))
    }
}

/// A configured model string split into provider and vendor model id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: ProviderId,
    pub model: String,
}

impl ModelSpec {
    /// Parse `<provider>/<model-id>`. Only the first `/` separates, so
    /// `openrouter/anthropic/claude-sonnet-4` keeps the vendor's own slashes.
    pub fn parse(spec: &str) -> Result<Self> {
        let (provider, model) = spec
            .trim()
            .split_once('/')
            .ok_or_else(|| Error::InvalidModel(spec.to_string()))?;
        if model.is_empty() {
            return Err(Error::InvalidModel(spec.to_string()));
        }
        let provider = provider
            .parse::<ProviderId>()
            .map_err(|_| Error::InvalidModel(spec.to_string()))?;
        Ok(Self {
            provider,
            model: model.to_string(),
        })
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// Token usage reported by the vendor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input: u32,
    pub output: u32,
    #[serde(default)]
    pub cache_read: u32,
    #[serde(default)]
    pub cache_write: u32,
}

impl Usage {
    /// Overwrite the fields a vendor reported as non-zero.
    ///
    /// Vendors send usage incrementally (Anthropic reports input on
    /// `message_start` and output on `message_delta`).
    pub fn merge(&mut self, other: &Usage) {
        if other.input > 0 {
            self.input = other.input;
        }
        if other.output > 0 {
            self.output = other.output;
        }
        if other.cache_read > 0 {
            self.cache_read = other.cache_read;
        }
        if other.cache_write > 0 {
            self.cache_write = other.cache_write;
        }
    }

    pub fn total(&self) -> u32 {
        self.input + self.output
    }
}

/// Tool definition sent to the vendor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (used in API calls)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for the input object
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A file attached to a user request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedFile {
    pub path: String,
    pub content: String,
}

impl AttachedFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// What the user asked for in a Turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UserInput {
    /// Plain chat message
    Chat {
        prompt: String,
        #[serde(default)]
        files: Vec<AttachedFile>,
    },
    /// Feedback requested on a change to a specific file
    FileChangeFeedback {
        path: String,
        prompt: String,
        #[serde(default)]
        files: Vec<AttachedFile>,
    },
    /// Feedback requested explicitly by the user
    ManualFeedback {
        prompt: String,
        #[serde(default)]
        files: Vec<AttachedFile>,
    },
}

/// Trim surrounding whitespace and normalize line endings
fn normalize_prompt(prompt: &str) -> String {
    prompt.replace("\r\n", "\n").trim().to_string()
}

impl UserInput {
    pub fn chat(prompt: &str) -> Self {
        Self::Chat {
            prompt: normalize_prompt(prompt),
            files: vec![],
        }
    }

    pub fn chat_with_files(prompt: &str, files: Vec<AttachedFile>) -> Self {
        Self::Chat {
            prompt: normalize_prompt(prompt),
            files,
        }
    }

    pub fn file_change_feedback(path: impl Into<String>, prompt: &str) -> Self {
        Self::FileChangeFeedback {
            path: path.into(),
            prompt: normalize_prompt(prompt),
            files: vec![],
        }
    }

    pub fn manual_feedback(prompt: &str) -> Self {
        Self::ManualFeedback {
            prompt: normalize_prompt(prompt),
            files: vec![],
        }
    }

    pub fn prompt(&self) -> &str {
        match self {
            Self::Chat { prompt, .. }
            | Self::FileChangeFeedback { prompt, .. }
            | Self::ManualFeedback { prompt, .. } => prompt,
        }
    }

    pub fn files(&self) -> &[AttachedFile] {
        match self {
            Self::Chat { files, .. }
            | Self::FileChangeFeedback { files, .. }
            | Self::ManualFeedback { files, .. } => files,
        }
    }

    /// Build a new input of the same kind with the prompt and/or files replaced
    pub fn with_overrides(&self, prompt: Option<&str>, files: Option<Vec<AttachedFile>>) -> Self {
        let mut next = self.clone();
        match &mut next {
            Self::Chat {
                prompt: p,
                files: f,
            }
            | Self::FileChangeFeedback {
                prompt: p,
                files: f,
                ..
            }
            | Self::ManualFeedback {
                prompt: p,
                files: f,
            } => {
                if let Some(prompt) = prompt {
                    *p = normalize_prompt(prompt);
                }
                if let Some(files) = files {
                    *f = files;
                }
            }
        }
        next
    }

    /// Prompt text with attached files appended, as sent to the vendor
    pub fn render(&self) -> String {
        let mut text = match self {
            Self::FileChangeFeedback { path, prompt, .. } => {
                format!("Changes were made to `{}`.\n\n{}", path, prompt)
            }
            _ => self.prompt().to_string(),
        };
        for file in self.files() {
            text.push_str(&format!(
                "\n\n<file path=\"{}\">\n{}\n</file>",
                file.path, file.content
            ));
        }
        text
    }
}

/// A structured invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Executed by the vendor (e.g. web search); never sent to the Tool Executor
    #[serde(default)]
    pub is_server_executed: bool,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            result: None,
            is_server_executed: false,
        }
    }
}

/// One inference pass within a Turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Keyed by id, kept in arrival order
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Step {
    pub fn append_thinking(&mut self, delta: &str) {
        self.thinking.get_or_insert_with(String::new).push_str(delta);
    }

    pub fn append_content(&mut self, delta: &str) {
        self.content.get_or_insert_with(String::new).push_str(delta);
    }

    /// Insert a tool call, or replace the one with the same id
    pub fn upsert_tool_call(&mut self, call: ToolCall) {
        match self.tool_calls.iter_mut().find(|c| c.id == call.id) {
            Some(existing) => *existing = call,
            None => self.tool_calls.push(call),
        }
    }

    /// Attach a result to the call with `id`. Returns false if no such call exists.
    pub fn set_tool_result(&mut self, id: &str, result: serde_json::Value) -> bool {
        match self.tool_calls.iter_mut().find(|c| c.id == id) {
            Some(call) => {
                call.result = Some(result);
                true
            }
            None => false,
        }
    }

    /// Client-side calls still waiting for the Tool Executor
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        self.tool_calls
            .iter()
            .filter(|c| !c.is_server_executed && c.result.is_none())
            .cloned()
            .collect()
    }

    /// No content, no thinking, no tool calls
    pub fn is_empty(&self) -> bool {
        self.content.as_deref().is_none_or(str::is_empty)
            && self.thinking.as_deref().is_none_or(str::is_empty)
            && self.tool_calls.is_empty()
    }
}

/// One user-request/assistant-response exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: String,
    /// Creation time in unix milliseconds
    pub timestamp: i64,
    pub user_input: UserInput,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Turn {
    pub fn new(user_input: UserInput) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            user_input,
            steps: vec![],
            is_complete: false,
            error: None,
        }
    }

    pub fn current_step_mut(&mut self) -> Option<&mut Step> {
        self.steps.last_mut()
    }
}

/// Ordered Turn history, oldest first
pub type Conversation = Vec<Turn>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_model_spec_parse() {
        let spec = ModelSpec::parse("anthropic/claude-sonnet-4-5").unwrap();
        assert_eq!(spec.provider, ProviderId::Anthropic);
        assert_eq!(spec.model, "claude-sonnet-4-5");
        assert_eq!(spec.to_string(), "anthropic/claude-sonnet-4-5");
    }

    #[test]
    fn test_model_spec_keeps_vendor_slashes() {
        let spec = ModelSpec::parse("openrouter/anthropic/claude-sonnet-4").unwrap();
        assert_eq!(spec.provider, ProviderId::OpenRouter);
        assert_eq!(spec.model, "anthropic/claude-sonnet-4");
    }

    #[test]
    fn test_model_spec_rejects_bare_or_unknown() {
        assert!(matches!(
            ModelSpec::parse("gpt-4o"),
            Err(Error::InvalidModel(_))
        ));
        assert!(matches!(
            ModelSpec::parse("acme/model"),
            Err(Error::InvalidModel(_))
        ));
        assert!(ModelSpec::parse("openai/").is_err());
    }

    #[test]
    fn test_user_input_normalizes_prompt() {
        let input = UserInput::chat("  hello\r\nworld \n");
        assert_eq!(input.prompt(), "hello\nworld");
    }

    #[test]
    fn test_user_input_overrides_keep_kind() {
        let input = UserInput::file_change_feedback("src/lib.rs", "review");
        let next = input.with_overrides(Some(" again "), None);
        match next {
            UserInput::FileChangeFeedback { path, prompt, .. } => {
                assert_eq!(path, "src/lib.rs");
                assert_eq!(prompt, "again");
            }
            other => panic!("expected FileChangeFeedback, got {:?}", other),
        }
        assert_eq!(input.prompt(), "review");
    }

    #[test]
    fn test_user_input_render_appends_files() {
        let input =
            UserInput::chat_with_files("Summarize", vec![AttachedFile::new("a.md", "# A")]);
        assert_eq!(
            input.render(),
            "Summarize\n\n<file path=\"a.md\">\n# A\n</file>"
        );
    }

    #[test]
    fn test_manual_feedback_round_trip_and_render() {
        let input = UserInput::manual_feedback("  Does this read well?\r\n")
            .with_overrides(None, Some(vec![AttachedFile::new("draft.md", "Hi")]));

        let value = serde_json::to_value(&input).unwrap();
        assert_eq!(value["kind"], json!("manual_feedback"));
        assert_eq!(value["prompt"], json!("Does this read well?"));
        let back: UserInput = serde_json::from_value(value).unwrap();
        assert_eq!(back, input);

        assert_eq!(
            input.render(),
            "Does this read well?\n\n<file path=\"draft.md\">\nHi\n</file>"
        );
    }

    #[test]
    fn test_step_empty_predicate() {
        let mut step = Step::default();
        assert!(step.is_empty());
        step.content = Some(String::new());
        assert!(step.is_empty());
        step.append_thinking("hmm");
        assert!(!step.is_empty());

        let mut step = Step::default();
        step.upsert_tool_call(ToolCall::new("c1", "read", json!({})));
        assert!(!step.is_empty());
    }

    #[test]
    fn test_step_upsert_and_pending() {
        let mut step = Step::default();
        step.upsert_tool_call(ToolCall::new("c1", "a", json!({})));
        step.upsert_tool_call(ToolCall::new("c2", "b", json!({})));
        step.upsert_tool_call(ToolCall::new("c1", "a", json!({"x": 1})));
        assert_eq!(step.tool_calls.len(), 2);
        assert_eq!(step.tool_calls[0].input, json!({"x": 1}));

        let mut server = ToolCall::new("s1", "web_search", json!({}));
        server.is_server_executed = true;
        step.upsert_tool_call(server);

        assert!(step.set_tool_result("c2", json!("ok")));
        assert!(!step.set_tool_result("missing", json!("ok")));

        let pending: Vec<String> = step.pending_tool_calls().into_iter().map(|c| c.id).collect();
        assert_eq!(pending, vec!["c1".to_string()]);
    }

    #[test]
    fn test_turn_serializes_camel_case() {
        let mut turn = Turn::new(UserInput::chat("Hi"));
        turn.steps.push(Step::default());
        turn.is_complete = true;
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["isComplete"], json!(true));
        assert_eq!(value["userInput"]["kind"], json!("chat"));
        assert!(value.get("error").is_none());

        let back: Turn = serde_json::from_value(value).unwrap();
        assert_eq!(back, turn);
    }

    #[test]
    fn test_usage_merge() {
        let mut usage = Usage {
            input: 10,
            ..Default::default()
        };
        usage.merge(&Usage {
            output: 5,
            ..Default::default()
        });
        assert_eq!(usage.input, 10);
        assert_eq!(usage.output, 5);
        assert_eq!(usage.total(), 15);
    }
}
