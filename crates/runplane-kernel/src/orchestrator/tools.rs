use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use runplane_core_types::{OwnerId, Platform};

use crate::worker::{TaskRequest, WorkerProxy};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ToolError {
    #[error("invalid tool arguments: {0}")]
    InvalidArgs(String),
    #[error("tool execution failed: {0}")]
    Failed(String),
    #[error("tool {0} is not registered")]
    NotFound(String),
}

/// A capability a run strategy can invoke mid-run.
#[async_trait]
pub trait RunTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn invoke(&self, owner: &OwnerId, args: Value) -> Result<Value, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    entries: RwLock<HashMap<String, Arc<dyn RunTool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tool`, replacing any tool with the same name.
    pub fn register(&self, tool: Arc<dyn RunTool>) {
        self.entries.write().insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RunTool>> {
        self.entries.read().get(name).cloned()
    }

    /// Description of `name`, when registered.
    pub fn describe(&self, name: &str) -> Option<String> {
        self.entries
            .read()
            .get(name)
            .map(|tool| tool.description().to_string())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }
}

pub const BROWSER_TASK_TOOL: &str = "browser.task";

#[derive(Deserialize)]
struct BrowserTaskArgs {
    instruction: String,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    args: Value,
}

/// Runs a browser automation task on the worker, restoring the platform
/// session first when one is named.
pub struct BrowserTaskTool {
    proxy: Arc<WorkerProxy>,
}

impl BrowserTaskTool {
    pub fn new(proxy: Arc<WorkerProxy>) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl RunTool for BrowserTaskTool {
    fn name(&self) -> &str {
        BROWSER_TASK_TOOL
    }

    fn description(&self) -> &str {
        "Drive the remote browser worker with a natural-language instruction"
    }

    async fn invoke(&self, owner: &OwnerId, args: Value) -> Result<Value, ToolError> {
        let parsed: BrowserTaskArgs =
            serde_json::from_value(args).map_err(|err| ToolError::InvalidArgs(err.to_string()))?;
        if parsed.instruction.trim().is_empty() {
            return Err(ToolError::InvalidArgs("instruction must not be empty".into()));
        }
        let platform = parsed
            .platform
            .as_deref()
            .map(Platform::parse)
            .transpose()
            .map_err(|err| ToolError::InvalidArgs(err.to_string()))?;
        let task = TaskRequest {
            owner_id: owner.clone(),
            platform,
            instruction: parsed.instruction,
            args: parsed.args,
        };
        self.proxy
            .submit_task(&task)
            .await
            .map_err(|err| ToolError::Failed(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sessions::InMemorySessionStore;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl RunTool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "returns its arguments"
        }

        async fn invoke(&self, _owner: &OwnerId, args: Value) -> Result<Value, ToolError> {
            Ok(args)
        }
    }

    fn browser_tool() -> BrowserTaskTool {
        let proxy = WorkerProxy::new(&Config::default(), Arc::new(InMemorySessionStore::new()));
        BrowserTaskTool::new(Arc::new(proxy))
    }

    #[tokio::test]
    async fn registry_resolves_by_name() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        registry.register(Arc::new(browser_tool()));
        assert_eq!(registry.names(), vec!["browser.task", "echo"]);

        let echo = registry.get("echo").unwrap();
        let out = echo
            .invoke(&OwnerId::from("a"), json!({"k": 1}))
            .await
            .unwrap();
        assert_eq!(out, json!({"k": 1}));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.describe("echo").as_deref(), Some("returns its arguments"));
        assert_eq!(registry.describe("missing"), None);
    }

    #[tokio::test]
    async fn browser_task_validates_arguments_before_the_worker() {
        let tool = browser_tool();
        let owner = OwnerId::from("a");
        let err = tool.invoke(&owner, json!({"platform": "x"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
        let err = tool
            .invoke(&owner, json!({"instruction": "go", "platform": "  "}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }

    #[tokio::test]
    async fn browser_task_surfaces_disabled_automation() {
        let err = browser_tool()
            .invoke(&OwnerId::from("a"), json!({"instruction": "open inbox"}))
            .await
            .unwrap_err();
        match err {
            ToolError::Failed(message) => assert!(message.contains("disabled")),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
