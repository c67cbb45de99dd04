use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use runplane_core_types::StepKind;

use crate::llm::ChatMessage;

use super::context::{RunContext, StepError};
use super::tools::BROWSER_TASK_TOOL;
use super::RunRequest;

pub const DEFAULT_STRATEGY: &str = "single_shot";

const ASSISTANT_PROMPT: &str =
    "You are a capable assistant working on behalf of the user. Answer precisely.";
const TOOL_PLANNER_PROMPT: &str =
    "Decide how the tool should be used for the request. Reply with one short instruction.";

/// Final answer of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunOutput {
    pub output: String,
    pub model: Option<String>,
}

/// Reasoning strategy driving one run through the context's model and tool calls.
#[async_trait]
pub trait RunStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut RunContext, request: &RunRequest)
        -> Result<RunOutput, StepError>;
}

pub struct StrategyRegistry {
    entries: HashMap<String, Arc<dyn RunStrategy>>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(SingleShotStrategy));
        registry.register(Arc::new(ToolThenSynthesizeStrategy));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn RunStrategy>) {
        self.entries.insert(strategy.name().to_string(), strategy);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RunStrategy>> {
        self.entries.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// One synthesis call answering the prompt directly.
pub struct SingleShotStrategy;

#[async_trait]
impl RunStrategy for SingleShotStrategy {
    fn name(&self) -> &'static str {
        DEFAULT_STRATEGY
    }

    async fn run(
        &self,
        ctx: &mut RunContext,
        request: &RunRequest,
    ) -> Result<RunOutput, StepError> {
        let messages = vec![
            ChatMessage::system(ASSISTANT_PROMPT),
            ChatMessage::user(request.prompt.clone()),
        ];
        let response = ctx.call_model(StepKind::Synthesis, messages).await?;
        ctx.emit(
            "message",
            json!({ "role": "assistant", "content": response.content }),
        )
        .await?;
        Ok(RunOutput {
            output: response.content,
            model: ctx.last_model().map(str::to_string),
        })
    }
}

/// Plans with a tool-tier model, invokes one tool, then synthesizes.
///
/// `metadata.tool` names the tool (default `browser.task`) and
/// `metadata.tool_args` its arguments; without arguments the planner's
/// instruction is passed. Tool-step failures are folded into the synthesis
/// prompt instead of ending the run.
pub struct ToolThenSynthesizeStrategy;

#[async_trait]
impl RunStrategy for ToolThenSynthesizeStrategy {
    fn name(&self) -> &'static str {
        "tool_then_synthesize"
    }

    async fn run(
        &self,
        ctx: &mut RunContext,
        request: &RunRequest,
    ) -> Result<RunOutput, StepError> {
        let tool = request
            .metadata
            .get("tool")
            .and_then(Value::as_str)
            .unwrap_or(BROWSER_TASK_TOOL);
        let planner_prompt = match ctx.tool_description(tool) {
            Some(description) => format!("{TOOL_PLANNER_PROMPT}\n\nTool {tool}: {description}"),
            None => TOOL_PLANNER_PROMPT.to_string(),
        };
        let plan = ctx
            .call_model(
                StepKind::Tool,
                vec![
                    ChatMessage::system(planner_prompt),
                    ChatMessage::user(request.prompt.clone()),
                ],
            )
            .await;
        let instruction = match plan {
            Ok(response) => response.content,
            Err(err) if !err.is_fatal() => request.prompt.clone(),
            Err(err) => return Err(err),
        };

        let args = request
            .metadata
            .get("tool_args")
            .cloned()
            .unwrap_or_else(|| json!({ "instruction": instruction }));
        let observation = match ctx.call_tool(tool, args).await {
            Ok(result) => format!("Tool {tool} returned: {result}"),
            Err(err) if !err.is_fatal() => format!("Tool {tool} was unavailable: {err}"),
            Err(err) => return Err(err),
        };

        let response = ctx
            .call_model(
                StepKind::Synthesis,
                vec![
                    ChatMessage::system(ASSISTANT_PROMPT),
                    ChatMessage::user(format!("{}\n\n{}", request.prompt, observation)),
                ],
            )
            .await?;
        ctx.emit(
            "message",
            json!({ "role": "assistant", "content": response.content }),
        )
        .await?;
        Ok(RunOutput {
            output: response.content,
            model: ctx.last_model().map(str::to_string),
        })
    }
}
