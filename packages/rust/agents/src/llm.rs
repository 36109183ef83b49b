//! Text-generation service client.
//!
//! Agents talk to the model through the [`TextGenerator`] trait. The shipped
//! implementation speaks the OpenAI-compatible `/chat/completions` protocol
//! (Groq by default).

use std::time::Duration;

use async_trait::async_trait;
use heritix_shared::{AgentError, HeritixError, LlmConfig};
use reqwest::{Client, StatusCode, header::HeaderMap};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// User-Agent string for service requests.
const USER_AGENT: &str = concat!("Heritix/", env!("CARGO_PKG_VERSION"));

/// One prompt sent to the text-generation service.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            prompt: prompt.into(),
            temperature,
        }
    }
}

/// External text-generation capability.
///
/// Returns the raw completion text. Interpreting it is the agent's job.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AgentError>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible client
// ---------------------------------------------------------------------------

/// `/chat/completions` client with bearer authentication.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    api_key: String,
    base_url: String,
    model: String,
    http: Client,
}

impl OpenAiCompatibleClient {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> heritix_shared::Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            http: build_client(timeout)?,
        })
    }

    /// Build from the `[llm]` config section and a resolved API key.
    pub fn from_config(config: &LlmConfig, api_key: impl Into<String>) -> heritix_shared::Result<Self> {
        Self::new(
            api_key,
            config.base_url.clone(),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleClient {
    #[instrument(skip_all, fields(model = %self.model, temperature = request.temperature))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String, AgentError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
        };

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, &text));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| AgentError::transient(format!("unreadable completion: {e}")))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        debug!(chars = content.len(), "completion received");
        Ok(content)
    }
}

// ---------------------------------------------------------------------------
// Helpers (shared with the speech-to-text client)
// ---------------------------------------------------------------------------

/// Build a reqwest client with appropriate settings.
pub(crate) fn build_client(timeout: Duration) -> heritix_shared::Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| HeritixError::Network(format!("failed to build HTTP client: {e}")))
}

/// Classify a non-success HTTP status.
///
/// 429 and 5xx are retryable; every other status is not.
pub(crate) fn status_error(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> AgentError {
    let message = format!("HTTP {status}: {}", truncate(body, 200));
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AgentError::Transient {
            message,
            retry_after,
        }
    } else {
        AgentError::fatal(message)
    }
}

/// Classify a failure before any response arrived.
pub(crate) fn transport_error(e: reqwest::Error) -> AgentError {
    if e.is_builder() {
        AgentError::fatal(format!("invalid request: {e}"))
    } else {
        AgentError::transient(format!("request failed: {e}"))
    }
}

/// `Retry-After` in delta-seconds form.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heritix_shared::RetryPolicy;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OpenAiCompatibleClient {
        OpenAiCompatibleClient::new("test-key", server.uri(), "llama-test", Duration::from_secs(5))
            .expect("build client")
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"model": "llama-test", "temperature": 0.0})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"category\": \"Agriculture\"}"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let out = client(&server)
            .generate(&GenerationRequest::new("categorize", 0.0))
            .await
            .expect("generate");
        assert_eq!(out, r#"{"category": "Agriculture"}"#);
    }

    #[tokio::test]
    async fn empty_choices_yield_empty_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let out = client(&server)
            .generate(&GenerationRequest::new("x", 0.3))
            .await
            .expect("generate");
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn rate_limit_is_retryable_with_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_string("slow down"),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .generate(&GenerationRequest::new("x", 0.0))
            .await
            .unwrap_err();
        assert_eq!(
            err.retry_policy(),
            RetryPolicy::Retryable {
                after: Some(Duration::from_secs(7))
            }
        );
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server)
            .generate(&GenerationRequest::new("x", 0.0))
            .await
            .unwrap_err();
        assert_eq!(err.retry_policy(), RetryPolicy::Retryable { after: None });
    }

    #[tokio::test]
    async fn auth_failure_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = client(&server)
            .generate(&GenerationRequest::new("x", 0.0))
            .await
            .unwrap_err();
        assert_eq!(err.retry_policy(), RetryPolicy::NonRetryable);
        assert!(err.to_string().contains("invalid api key"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
