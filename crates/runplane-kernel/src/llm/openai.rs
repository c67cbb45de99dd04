use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use runplane_model_router::{is_quota_message, ThinkingMode};

use crate::config::{non_empty, ProviderConfig};
use crate::errors::{ControlPlaneError, ControlPlaneResult};

use super::provider::{ChatMessage, ModelProvider, ModelRequest, ModelResponse, ProviderError};

/// Provider speaking the OpenAI-compatible `chat/completions` protocol.
pub struct OpenAiCompatProvider {
    client: Client,
    api_base: String,
    api_key: String,
    temperature: f32,
}

impl OpenAiCompatProvider {
    pub fn new(config: &ProviderConfig) -> ControlPlaneResult<Self> {
        let api_base = non_empty(config.api_base.as_deref())
            .ok_or_else(|| ControlPlaneError::Config("model api base is not configured".into()))?;
        let api_key = non_empty(config.api_key.as_deref())
            .ok_or_else(|| ControlPlaneError::Config("model api key is not configured".into()))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|err| {
                ControlPlaneError::Config(format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            temperature: config.temperature,
        })
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.api_base);
        let reasoning_effort = match request.model.thinking_mode {
            ThinkingMode::Dynamic => Some("medium"),
            ThinkingMode::Off => None,
        };
        let body = ChatCompletionRequest {
            model: &request.model.provider_model_id,
            temperature: self.temperature,
            messages: &request.messages,
            reasoning_effort,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() || err.is_connect() {
                    ProviderError::Unavailable(err.without_url().to_string())
                } else {
                    ProviderError::Other(err.without_url().to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            warn!(
                target: "provider",
                model = %request.model.provider_model_id,
                status = status.as_u16(),
                "model provider returned an error"
            );
            return Err(classify_status(status, text));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Other(format!("invalid provider response: {err}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::Other("provider returned no choices".into()))?;
        debug!(
            target: "provider",
            model = %request.model.provider_model_id,
            chars = content.len(),
            "model call completed"
        );
        Ok(ModelResponse {
            content,
            usage: parsed.usage,
        })
    }
}

fn classify_status(status: StatusCode, body: String) -> ProviderError {
    let message = format!("{}: {}", status.as_u16(), body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(message),
        _ if is_quota_message(&body) => ProviderError::QuotaExhausted(message),
        status if status.is_server_error() => ProviderError::Unavailable(message),
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => {
            ProviderError::Rejected(message)
        }
        _ => ProviderError::Other(message),
    }
}
