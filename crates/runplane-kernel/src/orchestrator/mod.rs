//! Run execution: strategy dispatch, model routing with quota fallback, tool
//! invocation and terminal status bookkeeping.

mod context;
mod strategy;
mod tools;

pub use context::{RunContext, StepError};
pub use strategy::{
    RunOutput, RunStrategy, SingleShotStrategy, StrategyRegistry, ToolThenSynthesizeStrategy,
    DEFAULT_STRATEGY,
};
pub use tools::{BrowserTaskTool, RunTool, ToolError, ToolRegistry, BROWSER_TASK_TOOL};

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use runplane_core_types::{OwnerId, RunId};
use runplane_event_store::{RunEventLog, RunStatus};
use runplane_model_router::ModelRouter;

use crate::errors::{ControlPlaneError, ControlPlaneResult};
use crate::llm::ModelProvider;
use crate::metrics::record_run_finished;

/// Body of `POST /api/runs`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RunRequest {
    pub prompt: String,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Clone)]
pub struct Orchestrator {
    log: Arc<dyn RunEventLog>,
    router: ModelRouter,
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    strategies: Arc<StrategyRegistry>,
    run_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        log: Arc<dyn RunEventLog>,
        router: ModelRouter,
        provider: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        strategies: StrategyRegistry,
        run_timeout: Duration,
    ) -> Self {
        Self {
            log,
            router,
            provider,
            tools,
            strategies: Arc::new(strategies),
            run_timeout,
        }
    }

    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }

    /// Creates the run and drives it in the background; returns once the
    /// `run_started` event is in the log.
    pub async fn start_run(&self, owner: &OwnerId, request: RunRequest) -> ControlPlaneResult<RunId> {
        let (run_id, strategy) = self.prepare(owner, &request).await?;
        let this = self.clone();
        let owner = owner.clone();
        let spawned = run_id.clone();
        tokio::spawn(async move {
            this.drive(spawned, owner, strategy, request).await;
        });
        Ok(run_id)
    }

    /// Creates and drives the run on the current task, returning its terminal status.
    pub async fn execute(
        &self,
        owner: &OwnerId,
        request: RunRequest,
    ) -> ControlPlaneResult<(RunId, RunStatus)> {
        let (run_id, strategy) = self.prepare(owner, &request).await?;
        let status = self
            .drive(run_id.clone(), owner.clone(), strategy, request)
            .await;
        Ok((run_id, status))
    }

    async fn prepare(
        &self,
        owner: &OwnerId,
        request: &RunRequest,
    ) -> ControlPlaneResult<(RunId, Arc<dyn RunStrategy>)> {
        if request.prompt.trim().is_empty() {
            return Err(ControlPlaneError::invalid("prompt must not be empty"));
        }
        let name = request.strategy.as_deref().unwrap_or(DEFAULT_STRATEGY);
        let strategy = self
            .strategies
            .get(name)
            .ok_or_else(|| ControlPlaneError::invalid(format!("unknown strategy {name}")))?;

        let run_id = RunId::new();
        self.log.create_run(&run_id, owner).await?;
        self.log
            .append(&run_id, "run_started", json!({ "strategy": strategy.name() }))
            .await?;
        info!(run_id = %run_id, owner = %owner, strategy = strategy.name(), "run started");
        Ok((run_id, strategy))
    }

    #[instrument(name = "runplane.orchestrator.drive", skip_all, fields(run_id = %run_id))]
    async fn drive(
        &self,
        run_id: RunId,
        owner: OwnerId,
        strategy: Arc<dyn RunStrategy>,
        request: RunRequest,
    ) -> RunStatus {
        let mut ctx = RunContext::new(
            run_id.clone(),
            owner,
            Arc::clone(&self.log),
            self.router.clone(),
            Arc::clone(&self.provider),
            Arc::clone(&self.tools),
        );
        let outcome = tokio::time::timeout(self.run_timeout, strategy.run(&mut ctx, &request)).await;
        let (status, payload) = match outcome {
            Ok(Ok(output)) => (
                RunStatus::Completed,
                json!({ "output": output.output, "model": output.model }),
            ),
            Ok(Err(err)) => (
                RunStatus::Error,
                json!({ "error": err.to_string(), "reason": err.reason() }),
            ),
            Err(_) => (
                RunStatus::Timeout,
                json!({
                    "error": format!("run exceeded {}s", self.run_timeout.as_secs()),
                    "reason": "timeout",
                }),
            ),
        };
        if let Err(err) = self.log.finish(&run_id, status, payload).await {
            warn!(run_id = %run_id, ?err, "failed to record terminal run status");
        }
        record_run_finished(status.as_str());
        status
    }
}
