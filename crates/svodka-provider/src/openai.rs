use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{LlmProvider, LlmRequest, ProviderError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(600);
const TRANSPORT_RETRIES: u32 = 3;
const BACKOFF_BASE_MS: u64 = 250;

/// Known upstream TLS-handshake failure signatures that sometimes arrive
/// inside an HTTP 200 body instead of as a connection error. Retryable.
const TLS_FAILURE_SIGNATURES: &[&str] = &[
    "sslv3 alert handshake failure",
    "ssl_error_syscall",
    "error:0a000410",
];

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .timeout(TOTAL_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    fn to_api_request(&self, request: &LlmRequest) -> ApiRequest {
        ApiRequest {
            model: self.model.clone(),
            messages: vec![
                ApiMessage {
                    role: "system".to_string(),
                    content: request.system.clone(),
                },
                ApiMessage {
                    role: "user".to_string(),
                    content: request.user.clone(),
                },
            ],
            temperature: request.temperature,
            response_format: request.json_mode.then(|| ApiResponseFormat {
                format_type: "json_object".to_string(),
            }),
        }
    }

    async fn send_once(&self, payload: &ApiRequest) -> Result<String, SendFailure> {
        let url = format!("{}/chat/completions", self.api_base);
        let resp = match self
            .client
            .post(url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Err(SendFailure::Retryable(format!("request timed out: {e}")));
            }
            Err(e) if e.is_connect() => {
                return Err(SendFailure::Retryable(format!("connect error: {e}")));
            }
            Err(e) => return Err(SendFailure::Fatal(ProviderError::Transport(e.to_string()))),
        };

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SendFailure::Retryable(format!("body read error: {e}")))?;

        if status != StatusCode::OK {
            return Err(classify_status(status, body));
        }

        let lowered = body.to_lowercase();
        if TLS_FAILURE_SIGNATURES
            .iter()
            .any(|sig| lowered.contains(sig))
        {
            return Err(SendFailure::Retryable(
                "tls handshake failure signature in response body".to_string(),
            ));
        }

        extract_content(&body)
            .map_err(|e| SendFailure::Fatal(ProviderError::Transport(e)))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(&self, request: LlmRequest) -> Result<String, ProviderError> {
        let payload = self.to_api_request(&request);
        let mut backoff_ms = BACKOFF_BASE_MS;
        let mut last_retryable = String::new();

        for attempt in 0..TRANSPORT_RETRIES {
            match self.send_once(&payload).await {
                Ok(content) => return Ok(content),
                Err(SendFailure::Fatal(err)) => return Err(err),
                Err(SendFailure::Retryable(reason)) => {
                    tracing::warn!(attempt, %reason, "llm transport retry");
                    last_retryable = reason;
                    if attempt + 1 < TRANSPORT_RETRIES {
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        backoff_ms *= 2;
                    }
                }
            }
        }

        Err(ProviderError::Transport(last_retryable))
    }
}

enum SendFailure {
    Retryable(String),
    Fatal(ProviderError),
}

fn classify_status(status: StatusCode, body: String) -> SendFailure {
    match status.as_u16() {
        429 | 500..=599 => SendFailure::Retryable(format!("http {status}: {body}")),
        400 | 422 => SendFailure::Fatal(ProviderError::Rejected(format!("http {status}: {body}"))),
        _ => SendFailure::Fatal(ProviderError::Transport(format!("http {status}: {body}"))),
    }
}

/// Pulls the completion text out of a raw response body: a single JSON
/// envelope with `choices[0].message.content`, or a server-sent-event
/// stream whose `choices[0].delta.content` fragments are concatenated.
pub fn extract_content(body: &str) -> Result<String, String> {
    if let Ok(envelope) = serde_json::from_str::<ApiResponse>(body) {
        if let Some(choice) = envelope.choices.first() {
            if let Some(content) = &choice.message.content {
                return Ok(content.clone());
            }
        }
    }

    let mut assembled = String::new();
    let mut saw_event = false;
    for line in body.lines() {
        let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
            continue;
        };
        if data == "[DONE]" {
            continue;
        }
        let Ok(event) = serde_json::from_str::<ApiStreamChunk>(data) else {
            continue;
        };
        saw_event = true;
        if let Some(delta) = event
            .choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
        {
            assembled.push_str(delta);
        }
    }

    if saw_event {
        Ok(assembled)
    } else {
        Err("unrecognized response body".to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ApiResponseFormat>,
}

#[derive(Debug, Clone, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ApiResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiChoice {
    message: ApiAssistantMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiAssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiStreamChunk {
    #[serde(default)]
    choices: Vec<ApiStreamChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiStreamChoice {
    #[serde(default)]
    delta: ApiStreamDelta,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ApiStreamDelta {
    #[serde(default)]
    content: Option<String>,
}
