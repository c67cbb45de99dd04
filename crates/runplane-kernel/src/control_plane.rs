//! Service instance owning every piece of shared control plane state.
//!
//! Token table, session store and event log live here rather than in process
//! globals, so several instances can coexist and tests stay isolated.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, Uri};
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use runplane_core_types::{OwnerId, RunId};
use runplane_event_store::{
    InMemoryRunEventLog, LogLimits, PublisherCfg, RunEventLog, RunStreamPublisher, RunSummary,
};
use runplane_model_router::ModelRouter;

use crate::auth::{self, Authenticator, Caller, StaticTokenAuthenticator};
use crate::config::Config;
use crate::errors::{ControlPlaneError, ControlPlaneResult};
use crate::llm::{ModelProvider, OpenAiCompatProvider, ScriptedProvider};
use crate::orchestrator::{
    BrowserTaskTool, Orchestrator, RunStrategy, RunTool, StrategyRegistry, ToolRegistry,
};
use crate::sessions::{InMemorySessionStore, SessionStore};
use crate::tokens::ProxyTokenIssuer;
use crate::worker::WorkerProxy;

pub struct ControlPlane {
    config: Config,
    log: Arc<InMemoryRunEventLog>,
    publisher: RunStreamPublisher,
    tokens: ProxyTokenIssuer,
    worker: Arc<WorkerProxy>,
    orchestrator: Orchestrator,
    authenticator: Arc<dyn Authenticator>,
}

impl ControlPlane {
    pub fn builder(config: Config) -> ControlPlaneBuilder {
        ControlPlaneBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn log(&self) -> &Arc<InMemoryRunEventLog> {
        &self.log
    }

    pub fn publisher(&self) -> &RunStreamPublisher {
        &self.publisher
    }

    pub fn tokens(&self) -> &ProxyTokenIssuer {
        &self.tokens
    }

    pub fn worker(&self) -> &WorkerProxy {
        &self.worker
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn router(&self) -> &ModelRouter {
        self.orchestrator.router()
    }

    pub async fn resolve_caller(&self, headers: &HeaderMap, uri: &Uri) -> ControlPlaneResult<Caller> {
        auth::resolve_caller(headers, uri, &self.tokens, self.authenticator.as_ref()).await
    }

    pub async fn resolve_full_caller(&self, headers: &HeaderMap) -> ControlPlaneResult<Caller> {
        auth::resolve_full_caller(headers, self.authenticator.as_ref()).await
    }

    /// Summary of `run_id`, hidden from everyone but its owner.
    pub async fn owned_run(&self, owner: &OwnerId, run_id: &RunId) -> ControlPlaneResult<RunSummary> {
        let summary = self.log.summary(run_id).await?;
        if &summary.owner != owner {
            debug!(run_id = %run_id, caller = %owner, "run requested by a different owner");
            return Err(ControlPlaneError::not_found("run"));
        }
        Ok(summary)
    }

    /// Ends the instance lifecycle: every outstanding proxy token is dropped.
    pub fn shutdown(&self) {
        self.tokens.clear();
        info!(runs = self.log.run_count(), "control plane shut down");
    }

    /// Periodically prunes finished runs and sweeps expired proxy tokens.
    pub fn spawn_maintenance(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let plane = Arc::clone(self);
        let retain = Duration::from_secs(plane.config.runs.retain_finished_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let pruned = plane.log.prune_finished(retain);
                let swept = plane.tokens.sweep_expired_at(Utc::now());
                if pruned > 0 || swept > 0 {
                    debug!(pruned, swept, "maintenance pass");
                }
            }
        })
    }
}

/// Assembles a [`ControlPlane`] from configuration plus optional collaborators.
pub struct ControlPlaneBuilder {
    config: Config,
    provider: Option<Arc<dyn ModelProvider>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    sessions: Option<Arc<dyn SessionStore>>,
    strategies: Vec<Arc<dyn RunStrategy>>,
    tools: Vec<Arc<dyn RunTool>>,
}

impl ControlPlaneBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            provider: None,
            authenticator: None,
            sessions: None,
            strategies: Vec::new(),
            tools: Vec::new(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn RunStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn tool(mut self, tool: Arc<dyn RunTool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn build(self) -> ControlPlaneResult<ControlPlane> {
        let config = self.config;
        let catalog = config.model_catalog()?;
        let router = ModelRouter::new(catalog);

        let provider = match self.provider {
            Some(provider) => provider,
            None if config.provider.is_configured() => {
                Arc::new(OpenAiCompatProvider::new(&config.provider)?) as Arc<dyn ModelProvider>
            }
            None => {
                warn!("no model provider configured; runs will use the scripted echo provider");
                Arc::new(ScriptedProvider::new()) as Arc<dyn ModelProvider>
            }
        };

        let authenticator = match self.authenticator {
            Some(authenticator) => authenticator,
            None => {
                let table = StaticTokenAuthenticator::from_config(&config.auth);
                if table.is_empty() {
                    warn!("no api tokens configured; every request will be rejected");
                }
                Arc::new(table) as Arc<dyn Authenticator>
            }
        };

        let sessions = self
            .sessions
            .unwrap_or_else(|| Arc::new(InMemorySessionStore::new()));
        let worker = Arc::new(WorkerProxy::new(&config, sessions));

        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(BrowserTaskTool::new(Arc::clone(&worker))));
        for tool in self.tools {
            tools.register(tool);
        }

        let mut strategies = StrategyRegistry::builtin();
        for strategy in self.strategies {
            strategies.register(strategy);
        }

        let log = InMemoryRunEventLog::new(LogLimits::default());
        let publisher = RunStreamPublisher::new(
            Arc::clone(&log) as Arc<dyn RunEventLog>,
            &PublisherCfg {
                poll_interval_ms: config.runs.poll_interval_ms,
            },
        );
        let orchestrator = Orchestrator::new(
            Arc::clone(&log) as Arc<dyn RunEventLog>,
            router,
            provider,
            tools,
            strategies,
            config.runs.run_timeout(),
        );
        let tokens = ProxyTokenIssuer::new(&config.tokens);

        info!(
            automation = worker.is_enabled(),
            models = orchestrator.router().catalog().models().len(),
            "control plane ready"
        );
        Ok(ControlPlane {
            config,
            log,
            publisher,
            tokens,
            worker,
            orchestrator,
            authenticator,
        })
    }
}
