//! scribe-ai: vendor stream normalization
//!
//! Converts the streaming wire formats of Anthropic, OpenAI-compatible,
//! Google and Ollama endpoints into one canonical [`StreamEvent`] stream,
//! reassembling fragmented tool-call input on the way.

pub mod assembler;
pub mod error;
pub mod event;
pub mod providers;
pub mod stream;
pub mod transport;
pub mod types;
pub mod wire;

pub use assembler::{ToolCallAssembler, ToolParseError};
pub use error::{Error, Result};
pub use event::{StreamEvent, StreamEventStream, ToolCallResult};
pub use providers::{
    ProviderAdapter, ProviderCredentials, RequestContext, TurnFormatter, WireParser, WireRequest,
    adapter_for,
};
pub use stream::stream_events;
pub use transport::{HttpTransport, LineStream, RetryConfig, Transport};
pub use types::*;
