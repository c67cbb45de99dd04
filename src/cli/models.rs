use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serde::Serialize;

use runplane_core_types::StepKind;
use runplane_model_router::{ModelDescriptor, ModelRouter, QuotaState};

use super::context::CliContext;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum StepArg {
    Tool,
    Synthesis,
}

impl From<StepArg> for StepKind {
    fn from(value: StepArg) -> Self {
        match value {
            StepArg::Tool => StepKind::Tool,
            StepArg::Synthesis => StepKind::Synthesis,
        }
    }
}

#[derive(Args, Clone)]
pub struct ModelsArgs {
    /// Only show the decision for this step kind
    #[arg(long, value_enum)]
    pub step: Option<StepArg>,

    /// Model ids to treat as exhausted (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub exhausted: Vec<String>,
}

#[derive(Serialize)]
struct RoutingReport {
    catalog: Vec<ModelDescriptor>,
    exhausted: Vec<String>,
    decisions: Vec<Decision>,
}

#[derive(Serialize)]
struct Decision {
    step: &'static str,
    model: String,
    provider_model: String,
    fallback: bool,
    candidates: Vec<String>,
}

pub fn cmd_models(args: ModelsArgs, ctx: &CliContext) -> Result<()> {
    let catalog = ctx
        .config()
        .model_catalog()
        .context("invalid model catalogue in configuration")?;
    let router = ModelRouter::new(catalog);

    let quota: QuotaState = args
        .exhausted
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .collect();
    let steps: Vec<StepKind> = match args.step {
        Some(step) => vec![step.into()],
        None => vec![StepKind::Tool, StepKind::Synthesis],
    };

    let decisions = steps
        .into_iter()
        .map(|step| {
            let selection = router.select(step, &quota);
            Decision {
                step: step.as_str(),
                model: selection.model.id.clone(),
                provider_model: selection.model.provider_model_id.clone(),
                fallback: selection.fallback,
                candidates: router.candidates(step).map(|m| m.id.clone()).collect(),
            }
        })
        .collect();
    let mut exhausted: Vec<String> = quota.exhausted().map(str::to_string).collect();
    exhausted.sort();
    let report = RoutingReport {
        catalog: router.catalog().models().to_vec(),
        exhausted,
        decisions,
    };

    ctx.output().emit(&report, || render_human(&report))
}

fn render_human(report: &RoutingReport) -> String {
    let mut lines = vec!["Catalogue (priority order):".to_string()];
    for model in &report.catalog {
        let marker = if report.exhausted.contains(&model.id) {
            " [exhausted]"
        } else {
            ""
        };
        lines.push(format!(
            "  {:<16} {:<28} tier={:<14} cost={}{}",
            model.id, model.provider_model_id, model.tier, model.relative_cost, marker
        ));
    }
    lines.push(String::new());
    for decision in &report.decisions {
        let fallback = if decision.fallback { " (fallback)" } else { "" };
        lines.push(format!(
            "{:<10} -> {}{}",
            decision.step, decision.model, fallback
        ));
    }
    lines.join("\n")
}
