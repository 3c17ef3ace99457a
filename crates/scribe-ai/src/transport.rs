//! Opening a vendor stream and splitting its body into lines

use std::{pin::Pin, time::Duration};

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use tokio_stream::Stream;

use crate::error::{Error, Result};
use crate::providers::WireRequest;

/// Raw text lines of one response body, CR stripped
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Retry configuration for opening a stream
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Sends a request and yields the response body line by line
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the response stream. Fails on connection errors and non-2xx statuses.
    /// Dropping the returned stream closes the connection.
    async fn open_stream(&self, request: WireRequest) -> Result<LineStream>;
}

/// Transport over a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn open_once(&self, request: &WireRequest) -> Result<LineStream> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .body(request.body.to_string());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), error_message(&body)));
        }

        Ok(split_lines(response.bytes_stream()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open_stream(&self, request: WireRequest) -> Result<LineStream> {
        let mut attempt = 0;
        loop {
            match self.open_once(&request).await {
                Ok(lines) => return Ok(lines),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Opening stream failed (attempt {}/{}): {}. Retrying in {:?}",
                        attempt + 1,
                        self.retry.max_retries,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Vendor error bodies are usually `{"error": {"message": ...}}`
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            let error = v.get("error")?;
            error
                .get("message")
                .and_then(|m| m.as_str())
                .or_else(|| error.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Split a byte stream on `\n`. A trailing line without a newline is
/// flushed at end of body. Splitting happens on bytes so multi-byte
/// characters cut across chunks survive.
pub fn split_lines<S, B, E>(bytes: S) -> LineStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    Box::pin(stream! {
        let mut buffer: Vec<u8> = Vec::new();
        futures::pin_mut!(bytes);

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    let error: Error = e.into();
                    yield Err(error);
                    return;
                }
            };
            buffer.extend_from_slice(chunk.as_ref());

            while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=line_end).collect();
                yield Ok(decode_line(&line[..line_end]));
            }
        }

        if !buffer.is_empty() {
            yield Ok(decode_line(&buffer));
        }
    })
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn collect(lines: LineStream) -> Vec<String> {
        lines.map(|l| l.unwrap()).collect().await
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_retry_delay_calculation() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_split_lines_across_chunks() {
        let chunks = vec![
            Ok::<_, Error>(b"data: {\"a\"".to_vec()),
            Ok(b":1}\r\n\r\nevent: x\n".to_vec()),
            Ok("data: \u{e9}".as_bytes()[..7].to_vec()),
            Ok("data: \u{e9}".as_bytes()[7..].to_vec()),
        ];
        let lines = collect(split_lines(futures::stream::iter(chunks))).await;
        assert_eq!(
            lines,
            vec!["data: {\"a\":1}", "", "event: x", "data: \u{e9}"]
        );
    }

    #[tokio::test]
    async fn test_split_lines_surfaces_body_error() {
        let chunks = vec![
            Ok(b"line one\n".to_vec()),
            Err(Error::Transport("connection reset".into())),
        ];
        let mut lines = split_lines(futures::stream::iter(chunks));
        assert_eq!(lines.next().await.unwrap().unwrap(), "line one");
        assert!(matches!(lines.next().await, Some(Err(Error::Transport(_)))));
        assert!(lines.next().await.is_none());
    }

    #[tokio::test]
    async fn test_http_transport_streams_body_lines() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("data: {\"type\":\"ping\"}\n\ndata: {\"type\":\"message_stop\"}"),
            )
            .mount(&server)
            .await;

        let request = WireRequest::post(format!("{}/v1/messages", server.uri()), json!({}))
            .header("x-api-key", "sk-test");
        let lines = HttpTransport::new().open_stream(request).await.unwrap();
        assert_eq!(
            collect(lines).await,
            vec![
                "data: {\"type\":\"ping\"}",
                "",
                "data: {\"type\":\"message_stop\"}"
            ]
        );
    }

    #[tokio::test]
    async fn test_http_transport_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(
                json!({"error": {"type": "authentication_error", "message": "invalid x-api-key"}}),
            ))
            .mount(&server)
            .await;

        let request = WireRequest::post(server.uri(), json!({}));
        let result = HttpTransport::new()
            .with_retry(fast_retry(2))
            .open_stream(request)
            .await;
        match result {
            Err(Error::Api { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "invalid x-api-key");
            }
            Err(other) => panic!("expected Api error, got {:?}", other),
            Ok(_) => panic!("expected Api error, got a stream"),
        }
    }

    #[tokio::test]
    async fn test_http_transport_retries_overloaded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"done\":true}\n"))
            .with_priority(2)
            .mount(&server)
            .await;

        let request = WireRequest::post(server.uri(), json!({}));
        let lines = HttpTransport::new()
            .with_retry(fast_retry(1))
            .open_stream(request)
            .await
            .unwrap();
        assert_eq!(collect(lines).await, vec!["{\"done\":true}"]);
    }
}
