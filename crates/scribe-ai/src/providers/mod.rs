//! Provider adapters: one outbound request builder and one wire parser per vendor

pub mod anthropic;
pub mod google;
pub mod ollama;
pub mod openai;

use crate::{
    error::{Error, Result},
    types::{ProviderId, ToolCall, ToolDefinition, Turn},
    wire::ParseResult,
};

pub use anthropic::AnthropicAdapter;
pub use google::GoogleAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAIAdapter;

/// Default output budget when the caller sets none
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Result text echoed for a tool call that was never executed
pub const NOT_EXECUTED: &str = "Tool call was not executed";

/// Everything needed to build one inference request
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    /// Vendor model id (without the provider prefix)
    pub model: &'a str,
    pub system_prompt: Option<&'a str>,
    /// Full history including the in-progress Turn
    pub turns: &'a [Turn],
    pub tools: &'a [ToolDefinition],
    pub thinking: bool,
    pub max_tokens: Option<u32>,
}

/// API key and endpoint overrides for one provider
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl ProviderCredentials {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            base_url: None,
        }
    }

    /// Explicit key first, then the provider's environment variables.
    /// Providers without environment variables (Ollama) need no key.
    pub fn resolve_api_key(&self, provider: ProviderId) -> Result<Option<String>> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Ok(Some(key.clone()));
        }
        let vars = provider.api_key_env_vars();
        if vars.is_empty() {
            return Ok(None);
        }
        vars.iter()
            .find_map(|var| std::env::var(var).ok().filter(|k| !k.is_empty()))
            .map(Some)
            .ok_or(Error::InvalidApiKey(provider.as_str()))
    }

    pub fn base_url(&self, provider: ProviderId) -> String {
        self.base_url
            .as_deref()
            .unwrap_or(provider.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }
}

/// An outbound HTTP request, vendor shape already applied
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub url: String,
    pub method: reqwest::Method,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

impl WireRequest {
    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            url: url.into(),
            method: reqwest::Method::POST,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Renders Conversation history in a vendor's transcript shape
pub trait TurnFormatter {
    fn format_turns(&self, turns: &[Turn]) -> Vec<serde_json::Value>;
}

/// Per-stream parser; holds the bookkeeping for open blocks
pub trait WireParser: Send {
    fn parse(&mut self, object: &serde_json::Value) -> ParseResult;
}

/// One vendor's protocol
pub trait ProviderAdapter: TurnFormatter + Send + Sync {
    fn id(&self) -> ProviderId;

    fn build_request(
        &self,
        context: &RequestContext<'_>,
        credentials: &ProviderCredentials,
    ) -> Result<WireRequest>;

    /// Fresh parser for one response stream
    fn parser(&self) -> Box<dyn WireParser>;
}

static ADAPTERS: [&dyn ProviderAdapter; 6] = [
    &AnthropicAdapter,
    &OpenAIAdapter::new(ProviderId::OpenAI),
    &GoogleAdapter,
    &OllamaAdapter,
    &OpenAIAdapter::new(ProviderId::OpenRouter),
    &OpenAIAdapter::new(ProviderId::Groq),
];

/// Look up the adapter for a provider
pub fn adapter_for(provider: ProviderId) -> Result<&'static dyn ProviderAdapter> {
    ADAPTERS
        .iter()
        .copied()
        .find(|adapter| adapter.id() == provider)
        .ok_or_else(|| Error::UnsupportedProvider(provider.to_string()))
}

/// Tool result as plain text for vendors that take string tool output
pub(crate) fn result_text(call: &ToolCall) -> String {
    match &call.result {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(value) => value.to_string(),
        None => NOT_EXECUTED.to_string(),
    }
}

/// Whether the result payload is the executor's error shape
pub(crate) fn result_is_error(call: &ToolCall) -> bool {
    match &call.result {
        Some(serde_json::Value::Object(map)) => map.len() == 1 && map.contains_key("error"),
        Some(_) => false,
        None => true,
    }
}

/// Read a `u32` field, tolerating absence
pub(crate) fn u32_field(value: &serde_json::Value, key: &str) -> u32 {
    value
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v.min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_provider_has_an_adapter() {
        for provider in ProviderId::ALL {
            let adapter = adapter_for(provider).unwrap();
            assert_eq!(adapter.id(), provider);
        }
    }

    #[test]
    fn test_credentials_explicit_key_wins() {
        let creds = ProviderCredentials::with_api_key("sk-test");
        assert_eq!(
            creds.resolve_api_key(ProviderId::Anthropic).unwrap(),
            Some("sk-test".to_string())
        );
    }

    #[test]
    fn test_credentials_ollama_needs_no_key() {
        let creds = ProviderCredentials::default();
        assert_eq!(creds.resolve_api_key(ProviderId::Ollama).unwrap(), None);
    }

    #[test]
    fn test_base_url_override_trims_slash() {
        let creds = ProviderCredentials {
            api_key: None,
            base_url: Some("http://localhost:8080/".into()),
        };
        assert_eq!(creds.base_url(ProviderId::OpenAI), "http://localhost:8080");
        assert_eq!(
            ProviderCredentials::default().base_url(ProviderId::Anthropic),
            "https://api.anthropic.com"
        );
    }

    #[test]
    fn test_result_helpers() {
        let mut call = ToolCall::new("c", "t", json!({}));
        assert_eq!(result_text(&call), NOT_EXECUTED);
        assert!(result_is_error(&call));

        call.result = Some(json!({"error": "boom"}));
        assert!(result_is_error(&call));
        assert_eq!(result_text(&call), r#"{"error":"boom"}"#);

        call.result = Some(json!("plain"));
        assert!(!result_is_error(&call));
        assert_eq!(result_text(&call), "plain");
    }
}
