//! Tool trait, executor seam and schema-validating registry

use async_trait::async_trait;
use scribe_ai::ToolDefinition;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Why a tool call produced no result
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid input for '{tool}': {message}")]
    InvalidInput { tool: String, message: String },

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Result payload recorded on the ToolCall
    pub fn to_result(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }
}

/// Executes completed tool calls for the orchestrator
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tools advertised to the model
    fn definitions(&self) -> Vec<ToolDefinition>;

    async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError>;
}

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls)
    fn name(&self) -> &str;

    /// Tool description for the LLM
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with already-validated input
    async fn execute(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError>;
}

/// Type alias for a boxed tool
pub type BoxedTool = Arc<dyn Tool>;

struct RegisteredTool {
    tool: BoxedTool,
    validator: Option<Arc<jsonschema::Validator>>,
}

/// Tools by name, in registration order
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, compiling its schema once. A tool registered under
    /// an existing name replaces it.
    pub fn register(&mut self, tool: BoxedTool) {
        let schema = tool.parameters_schema();
        let validator = match jsonschema::validator_for(&schema) {
            Ok(validator) => Some(Arc::new(validator)),
            Err(e) => {
                tracing::warn!(
                    "Invalid tool parameter schema for '{}', skipping validation: {}",
                    tool.name(),
                    e
                );
                None
            }
        };

        let name = tool.name().to_string();
        let entry = RegisteredTool { tool, validator };
        match self.by_name.get(&name) {
            Some(&index) => self.tools[index] = entry,
            None => {
                self.by_name.insert(name, self.tools.len());
                self.tools.push(entry);
            }
        }
    }

    pub fn with_tool(mut self, tool: BoxedTool) -> Self {
        self.register(tool);
        self
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.tool.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| {
                ToolDefinition::new(t.tool.name(), t.tool.description(), t.tool.parameters_schema())
            })
            .collect()
    }

    async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let registered = self
            .by_name
            .get(name)
            .map(|&index| &self.tools[index])
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        if let Some(message) = registered
            .validator
            .as_deref()
            .and_then(|validator| validate_with_validator(&input, validator))
        {
            return Err(ToolError::InvalidInput {
                tool: name.to_string(),
                message,
            });
        }

        tracing::debug!("Executing tool '{}'", name);
        registered.tool.execute(input).await
    }
}

/// Validate tool input using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_with_validator(
    input: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(input)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(errors.join("; "))
    }
}
