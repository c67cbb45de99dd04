use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use runplane_core_types::{OwnerId, RunId, StepKind};
use runplane_event_store::RunEventLog;
use runplane_model_router::{ModelRouter, QuotaState};

use crate::llm::{ChatMessage, ModelProvider, ModelRequest, ModelResponse, ProviderError};
use crate::metrics::{record_model_selection, record_quota_exhaustion};

use super::tools::{ToolError, ToolRegistry};

/// Failure of one step inside a run strategy.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StepError {
    #[error("{step} step failed on model {model}: {message}")]
    Model {
        step: StepKind,
        model: String,
        message: String,
    },
    #[error("tool {tool} failed: {message}")]
    Tool { tool: String, message: String },
    #[error("event log unavailable: {0}")]
    Log(String),
}

impl StepError {
    /// Fatal errors end the run; the rest may be absorbed by the strategy.
    pub fn is_fatal(&self) -> bool {
        match self {
            StepError::Model { step, .. } => *step == StepKind::Synthesis,
            StepError::Tool { .. } => false,
            StepError::Log(_) => true,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            StepError::Model { .. } => "model_error",
            StepError::Tool { .. } => "tool_error",
            StepError::Log(_) => "log_error",
        }
    }
}

/// Per-run execution state handed to a strategy.
///
/// Owns the run's quota state, so exhaustion never leaks across runs. Every
/// model and tool invocation is written to the log before its result is
/// returned to the strategy.
pub struct RunContext {
    run_id: RunId,
    owner: OwnerId,
    log: Arc<dyn RunEventLog>,
    router: ModelRouter,
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    quota: QuotaState,
    last_model: Option<String>,
}

impl RunContext {
    pub(crate) fn new(
        run_id: RunId,
        owner: OwnerId,
        log: Arc<dyn RunEventLog>,
        router: ModelRouter,
        provider: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            run_id,
            owner,
            log,
            router,
            provider,
            tools,
            quota: QuotaState::new(),
            last_model: None,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn quota(&self) -> &QuotaState {
        &self.quota
    }

    /// Id of the model that answered the most recent successful call.
    pub fn last_model(&self) -> Option<&str> {
        self.last_model.as_deref()
    }

    pub async fn emit(&self, kind: &str, payload: Value) -> Result<u64, StepError> {
        self.log
            .append(&self.run_id, kind, payload)
            .await
            .map_err(|err| StepError::Log(err.to_string()))
    }

    /// Calls the routed model for `step`.
    ///
    /// A quota-shaped failure marks the model exhausted and retries once with
    /// the router's next choice; any other failure is logged as `step_error`.
    pub async fn call_model(
        &mut self,
        step: StepKind,
        messages: Vec<ChatMessage>,
    ) -> Result<ModelResponse, StepError> {
        let mut retried = false;
        loop {
            let selection = self.router.select(step, &self.quota);
            let model = selection.model;
            record_model_selection(&model.id, step.as_str(), selection.fallback);
            self.emit(
                "model_call",
                json!({
                    "step": step.as_str(),
                    "model": model.id,
                    "provider_model": model.provider_model_id,
                    "fallback": selection.fallback,
                }),
            )
            .await?;

            let request = ModelRequest {
                model: model.clone(),
                step,
                messages: messages.clone(),
            };
            let err = match self.provider.complete(&request).await {
                Ok(response) => {
                    debug!(run_id = %self.run_id, model = %model.id, step = %step, "model call succeeded");
                    self.last_model = Some(model.id);
                    return Ok(response);
                }
                Err(err) => err,
            };

            if err.is_quota() {
                self.note_exhausted(step, &model.id, &err).await?;
                if !retried {
                    retried = true;
                    continue;
                }
            }

            warn!(run_id = %self.run_id, model = %model.id, step = %step, error = %err, "model call failed");
            self.emit(
                "step_error",
                json!({
                    "step": step.as_str(),
                    "model": model.id,
                    "error": err.to_string(),
                    "recoverable": step == StepKind::Tool,
                }),
            )
            .await?;
            return Err(StepError::Model {
                step,
                model: model.id,
                message: err.to_string(),
            });
        }
    }

    async fn note_exhausted(
        &mut self,
        step: StepKind,
        model_id: &str,
        err: &ProviderError,
    ) -> Result<(), StepError> {
        if self.router.mark_exhausted(&mut self.quota, model_id) {
            record_quota_exhaustion(model_id);
        }
        self.emit(
            "model_rate_limited",
            json!({
                "step": step.as_str(),
                "model": model_id,
                "error": err.to_string(),
            }),
        )
        .await?;
        Ok(())
    }

    pub fn tool_description(&self, name: &str) -> Option<String> {
        self.tools.describe(name)
    }

    /// Invokes a registered tool on behalf of the run owner.
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value, StepError> {
        self.emit("tool_call", json!({ "tool": name, "args": args.clone() }))
            .await?;
        let outcome = match self.tools.get(name) {
            Some(tool) => tool
                .invoke(&self.owner, args)
                .await
                .map_err(|err| err.to_string()),
            None => Err(ToolError::NotFound(name.to_string()).to_string()),
        };
        match outcome {
            Ok(result) => {
                self.emit("tool_result", json!({ "tool": name, "result": result.clone() }))
                    .await?;
                Ok(result)
            }
            Err(message) => {
                warn!(run_id = %self.run_id, tool = name, error = %message, "tool invocation failed");
                self.emit(
                    "tool_error",
                    json!({ "tool": name, "error": message, "recoverable": true }),
                )
                .await?;
                Err(StepError::Tool {
                    tool: name.to_string(),
                    message,
                })
            }
        }
    }
}
