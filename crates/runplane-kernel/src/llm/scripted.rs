use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::provider::{ModelProvider, ModelRequest, ModelResponse, ProviderError};

/// In-memory provider replaying queued outcomes.
///
/// With an empty queue it echoes the last user message, which lets `serve`
/// run end to end without a model backend.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ModelResponse, ProviderError>>>,
    requests: Mutex<Vec<ModelRequest>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_ok(&self, content: impl Into<String>) -> &Self {
        self.script.lock().push_back(Ok(ModelResponse::text(content)));
        self
    }

    pub fn push_err(&self, err: ProviderError) -> &Self {
        self.script.lock().push_back(Err(err));
        self
    }

    /// Model ids of every call received, in order.
    pub fn calls(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|request| request.model.id.clone())
            .collect()
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ProviderError> {
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => {
                let prompt = request
                    .messages
                    .iter()
                    .rev()
                    .find(|message| message.role == "user")
                    .map(|message| message.content.as_str())
                    .unwrap_or_default();
                Ok(ModelResponse::text(format!(
                    "[{}] {}",
                    request.model.id, prompt
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;
    use runplane_core_types::StepKind;
    use runplane_model_router::ModelCatalog;

    fn request(prompt: &str) -> ModelRequest {
        ModelRequest {
            model: ModelCatalog::builtin().models()[0].clone(),
            step: StepKind::Synthesis,
            messages: vec![ChatMessage::system("sys"), ChatMessage::user(prompt)],
        }
    }

    #[tokio::test]
    async fn replays_script_then_echoes() {
        let provider = ScriptedProvider::new();
        provider
            .push_err(ProviderError::RateLimited("429".into()))
            .push_ok("scripted answer");

        assert!(provider.complete(&request("hi")).await.is_err());
        assert_eq!(
            provider.complete(&request("hi")).await.unwrap().content,
            "scripted answer"
        );
        let echoed = provider.complete(&request("hello")).await.unwrap();
        assert!(echoed.content.ends_with("hello"));
        assert_eq!(provider.calls().len(), 3);
    }
}
