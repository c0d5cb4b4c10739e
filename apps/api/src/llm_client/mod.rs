/// LLM Client — the single point of entry for all model calls in the service.
///
/// ARCHITECTURAL RULE: No other module may call the provider API directly.
/// All LLM interactions MUST go through the `ExtractionClient` trait.
///
/// TLS certificate validation is always on. A certificate failure surfaces as
/// `ExtractionError::Certificate` and is never retried.
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ExtractionClientConfig;

pub mod retry;

pub use retry::{invoke_with_retry, RetryPolicy};

const MAX_TOKENS: u32 = 4096;
const TEMPERATURE: f32 = 0.1;
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("TLS certificate validation failed: {reason}")]
    Certificate { reason: String },

    #[error("transport error: {reason}")]
    Transport { reason: String },

    #[error("provider error (status {status}): {message}")]
    Provider { status: u16, message: String },
}

impl ExtractionError {
    /// Only transport failures may be retried, and only by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExtractionError::Transport { .. })
    }
}

/// The provider's response body, untouched. Parsing belongs to the validator.
#[derive(Debug, Clone)]
pub struct RawModelResponse {
    pub body: String,
    pub requested_model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    error: ProviderErrorBody,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    message: String,
}

/// Seam between the pipeline and the model provider.
/// Carried in the pipeline as `Arc<dyn ExtractionClient>`.
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    /// Model identifier requests are sent with.
    fn model(&self) -> &str;

    /// One outbound call per invocation. No caching, no internal retry.
    async fn invoke(&self, prompt: &str) -> Result<RawModelResponse, ExtractionError>;
}

/// OpenAI-compatible chat-completions client.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(config: &ExtractionClientConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout_secs));
        if let Some(path) = &config.ca_bundle {
            let pem = std::fs::read(path)
                .with_context(|| format!("Failed to read CA bundle {}", path.display()))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .with_context(|| format!("Invalid PEM certificate in {}", path.display()))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl ExtractionClient for LlmClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, prompt: &str) -> Result<RawModelResponse, ExtractionError> {
        let request_body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport_error)?;

        if !status.is_success() {
            let message = serde_json::from_str::<ProviderError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            let message = truncate_chars(&message, MAX_ERROR_BODY_CHARS);
            warn!("LLM provider returned {status}: {message}");
            return Err(ExtractionError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        debug!(
            "LLM call succeeded: prompt_chars={}, body_bytes={}",
            prompt.chars().count(),
            body.len()
        );

        Ok(RawModelResponse {
            body,
            requested_model: self.model.clone(),
        })
    }
}

/// Splits a reqwest failure into certificate vs. transport.
fn classify_transport_error(err: reqwest::Error) -> ExtractionError {
    let reason = error_chain(&err);
    if mentions_certificate(&reason) {
        ExtractionError::Certificate { reason }
    } else {
        ExtractionError::Transport { reason }
    }
}

/// Joins an error with its causes, skipping causes the text already contains.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut reason = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !reason.contains(&text) {
            reason.push_str(": ");
            reason.push_str(&text);
        }
        source = cause.source();
    }
    reason
}

fn mentions_certificate(reason: &str) -> bool {
    let lower = reason.to_lowercase();
    ["certificate", "unknownissuer", "self signed", "self-signed", "cert verify"]
        .iter()
        .any(|needle| lower.contains(needle))
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> LlmClient {
        let config = ExtractionClientConfig::new("test-key", server.uri(), "test-model");
        LlmClient::new(&config).unwrap_or_else(|e| panic!("client build failed: {e}"))
    }

    #[test]
    fn test_certificate_reasons_detected() {
        assert!(mentions_certificate(
            "error sending request: error trying to connect: certificate verify failed"
        ));
        assert!(mentions_certificate("invalid peer certificate: UnknownIssuer"));
        assert!(!mentions_certificate("operation timed out"));
    }

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(ExtractionError::Transport { reason: "reset".into() }.is_retryable());
        assert!(!ExtractionError::Certificate { reason: "bad".into() }.is_retryable());
        assert!(!ExtractionError::Provider { status: 500, message: "x".into() }.is_retryable());
    }

    #[derive(Debug)]
    struct Wrapped {
        label: &'static str,
        inline_source: bool,
        source: std::io::Error,
    }

    impl std::fmt::Display for Wrapped {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            if self.inline_source {
                write!(f, "{}: {}", self.label, self.source)
            } else {
                f.write_str(self.label)
            }
        }
    }

    impl std::error::Error for Wrapped {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.source)
        }
    }

    #[test]
    fn test_error_chain_does_not_repeat_inlined_causes() {
        let err = Wrapped {
            label: "error sending request",
            inline_source: true,
            source: std::io::Error::other("certificate verify failed"),
        };
        assert_eq!(error_chain(&err), "error sending request: certificate verify failed");

        let err = Wrapped {
            label: "error sending request",
            inline_source: false,
            source: std::io::Error::other("connection refused"),
        };
        assert_eq!(error_chain(&err), "error sending request: connection refused");
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("éàü", 2), "éà");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_non_https_remote_endpoint_refused() {
        let config = ExtractionClientConfig::new("k", "http://llm.example.com", "m");
        assert!(LlmClient::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_invoke_returns_raw_body() {
        let server = MockServer::start().await;
        let body = r#"{"model":"test-model","choices":[{"message":{"content":"{}"}}]}"#;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "test-model",
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let raw = client_for(&server)
            .invoke("hello")
            .await
            .unwrap_or_else(|e| panic!("Expected Ok, got Err: {e}"));
        assert_eq!(raw.body, body);
        assert_eq!(raw.requested_model, "test-model");
    }

    #[tokio::test]
    async fn test_invoke_maps_non_2xx_to_provider_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_string(r#"{"error":{"message":"invalid api key"}}"#),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).invoke("hello").await.err();
        match err {
            Some(ExtractionError::Provider { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "invalid api key");
            }
            other => panic!("Expected Provider error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_long_provider_message_is_truncated() {
        let server = MockServer::start().await;
        let long_message = "x".repeat(MAX_ERROR_BODY_CHARS * 3);

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": long_message}
            })))
            .mount(&server)
            .await;

        match client_for(&server).invoke("hello").await.err() {
            Some(ExtractionError::Provider { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message.chars().count(), MAX_ERROR_BODY_CHARS);
            }
            other => panic!("Expected Provider error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invoke_unreachable_host_is_transport_error() {
        // Port 9 (discard) on loopback is not expected to be listening.
        let config = ExtractionClientConfig::new("k", "http://127.0.0.1:9", "m");
        let client = LlmClient::new(&config).unwrap_or_else(|e| panic!("{e}"));
        let err = client.invoke("hello").await.err();
        assert!(
            matches!(err, Some(ExtractionError::Transport { .. })),
            "Expected Transport, got: {err:?}"
        );
    }
}
