//! The strict-call protocol: prompt + JSON payload in, schema-valid typed
//! value out. Tolerates transient transport failures and malformed
//! completions via one repair sub-call per attempt, and degrades to a
//! caller-supplied skeleton instead of erroring.

use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde_json::Value;

use svodka_schema::validate::ReportShape;

use crate::{LlmProvider, LlmRequest, PromptSet, ProviderError};

const JSON_GUARD: &str =
    "Ответь строго одним JSON-объектом. Без пояснений, без markdown, только json.";
const REPAIR_PROMPT_KEY: &str = "json_repair";
const REPAIR_INPUT_LIMIT: usize = 3000;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const CALL_TEMPERATURE: f32 = 0.1;

/// Markers of an upstream rejection that can surface inside the content
/// itself. No repair can help: the request was rejected, not its output.
const REJECTION_MARKERS: &[&str] = &[
    "invalid_request_error",
    "prompt must contain the word 'json'",
];

pub struct StrictCaller {
    provider: Arc<dyn LlmProvider>,
    prompts: PromptSet,
    max_attempts: u32,
}

enum AttemptFailure {
    /// Transport gave up; there is no content to repair.
    Transport(String),
    /// Upstream rejected the request shape; repair is pointless.
    Rejected(String),
    /// We got content but it did not survive parse/validate/decode.
    BadContent { reason: String, content: String },
}

impl StrictCaller {
    pub fn new(provider: Arc<dyn LlmProvider>, prompts: PromptSet) -> Self {
        Self {
            provider,
            prompts,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Never fails on LLM misbehavior: the only error path is an unknown
    /// prompt key, which is a programmer error.
    pub async fn strict_call<T>(
        &self,
        prompt_key: &str,
        payload: &Value,
        shape: ReportShape,
        fallback: T,
    ) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let system = self.prompts.lookup(prompt_key)?.to_string();

        for attempt in 1..=self.max_attempts {
            match self.attempt::<T>(&system, payload, shape).await {
                Ok(value) => return Ok(value),
                Err(AttemptFailure::Transport(reason)) => {
                    tracing::warn!(prompt_key, attempt, %reason, "strict call transport failure");
                }
                Err(AttemptFailure::Rejected(reason)) => {
                    tracing::warn!(prompt_key, attempt, %reason, "strict call rejected upstream");
                }
                Err(AttemptFailure::BadContent { reason, content }) => {
                    tracing::warn!(prompt_key, attempt, %reason, "strict call got bad content");
                    if let Some(repaired) = self.repair::<T>(&content, shape).await {
                        return Ok(repaired);
                    }
                }
            }
        }

        tracing::warn!(
            prompt_key,
            shape = shape.name(),
            "all strict attempts exhausted, degrading to skeleton"
        );
        Ok(fallback)
    }

    async fn attempt<T>(
        &self,
        system: &str,
        payload: &Value,
        shape: ReportShape,
    ) -> Result<T, AttemptFailure>
    where
        T: DeserializeOwned,
    {
        let request = LlmRequest {
            system: format!("{system}\n\n{JSON_GUARD}"),
            user: payload.to_string(),
            temperature: CALL_TEMPERATURE,
            json_mode: true,
        };

        let content = match self.provider.complete(request).await {
            Ok(content) => content,
            Err(ProviderError::Transport(reason)) => {
                return Err(AttemptFailure::Transport(reason))
            }
            Err(ProviderError::Rejected(reason)) => return Err(AttemptFailure::Rejected(reason)),
        };

        let lowered = content.to_lowercase();
        if let Some(marker) = REJECTION_MARKERS.iter().find(|m| lowered.contains(**m)) {
            return Err(AttemptFailure::Rejected(format!(
                "rejection marker in content: {marker}"
            )));
        }

        coerce::<T>(&content, shape).map_err(|reason| AttemptFailure::BadContent { reason, content })
    }

    /// One repair sub-call: ask the model to coerce the broken content into
    /// the exact target key set, temperature 0.
    async fn repair<T>(&self, content: &str, shape: ReportShape) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let system = match self.prompts.lookup(REPAIR_PROMPT_KEY) {
            Ok(prompt) => prompt.to_string(),
            Err(err) => {
                tracing::error!(%err, "repair prompt missing");
                return None;
            }
        };
        let payload = serde_json::json!({
            "target_keys": shape.required_keys(),
            "content": truncate_chars(content, REPAIR_INPUT_LIMIT),
        });
        let request = LlmRequest {
            system: format!("{system}\n\n{JSON_GUARD}"),
            user: payload.to_string(),
            temperature: 0.0,
            json_mode: true,
        };

        let repaired = match self.provider.complete(request).await {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(%err, "repair call failed");
                return None;
            }
        };

        match coerce::<T>(&repaired, shape) {
            Ok(value) => {
                tracing::info!(shape = shape.name(), "repair call produced valid object");
                Some(value)
            }
            Err(reason) => {
                tracing::warn!(%reason, "repair output still invalid");
                None
            }
        }
    }
}

/// Raw text -> validated typed value. The explicit boundary between the
/// duck-typed LLM output and the typed report records.
fn coerce<T>(content: &str, shape: ReportShape) -> Result<T, String>
where
    T: DeserializeOwned,
{
    let value: Value =
        serde_json::from_str(content).map_err(|e| format!("content is not JSON: {e}"))?;
    shape.validate(&value).map_err(|e| e.to_string())?;
    serde_json::from_value(value).map_err(|e| format!("typed decode failed: {e}"))
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
