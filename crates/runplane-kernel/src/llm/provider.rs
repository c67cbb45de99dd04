use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use runplane_core_types::StepKind;
use runplane_model_router::{is_quota_message, ModelDescriptor};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ModelRequest {
    pub model: ModelDescriptor,
    pub step: StepKind,
    pub messages: Vec<ChatMessage>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelResponse {
    pub content: String,
    pub usage: Option<serde_json::Value>,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }
}

/// Failure reported by a model provider.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Whether the failure means the model is temporarily unusable for this run.
    ///
    /// Untyped errors fall back to matching the message text, which can
    /// misclassify when a provider changes its wording.
    pub fn is_quota(&self) -> bool {
        match self {
            ProviderError::RateLimited(_) | ProviderError::QuotaExhausted(_) => true,
            ProviderError::Other(message) => is_quota_message(message),
            ProviderError::Unavailable(_) | ProviderError::Rejected(_) => false,
        }
    }
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_quota_errors_and_string_fallback() {
        assert!(ProviderError::RateLimited("slow down".into()).is_quota());
        assert!(ProviderError::QuotaExhausted("daily cap".into()).is_quota());
        assert!(ProviderError::Other("HTTP 429 Too Many Requests".into()).is_quota());
        assert!(ProviderError::Other("RESOURCE_EXHAUSTED".into()).is_quota());
        assert!(!ProviderError::Other("connection reset".into()).is_quota());
        assert!(!ProviderError::Unavailable("quota service down".into()).is_quota());
        assert!(!ProviderError::Rejected("invalid prompt".into()).is_quota());
    }
}
