use std::sync::Arc;

use runplane_core_types::StepKind;
use tracing::{debug, warn};

use crate::catalog::{ModelCatalog, ModelDescriptor};
use crate::quota::QuotaState;

/// Outcome of one routing decision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    pub model: ModelDescriptor,
    /// Every permitted candidate was exhausted and the last-resort model was returned.
    pub fallback: bool,
}

/// Stateless, deterministic model selection over a shared catalogue.
#[derive(Clone, Debug)]
pub struct ModelRouter {
    catalog: Arc<ModelCatalog>,
}

impl ModelRouter {
    pub fn new(catalog: ModelCatalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Candidates permitted for `step`, in priority order.
    pub fn candidates(&self, step: StepKind) -> impl Iterator<Item = &ModelDescriptor> {
        self.catalog
            .models()
            .iter()
            .filter(move |model| match step {
                StepKind::Tool => model.tier.is_tool_eligible(),
                StepKind::Synthesis => true,
            })
    }

    pub fn select_model(&self, step: StepKind, quota: &QuotaState) -> ModelDescriptor {
        self.select(step, quota).model
    }

    /// Returns the cheapest permitted model not in `quota`; when every candidate is
    /// exhausted, the most capable catalogue model is returned instead of failing.
    pub fn select(&self, step: StepKind, quota: &QuotaState) -> Selection {
        if let Some(model) = self
            .candidates(step)
            .find(|model| !quota.is_exhausted(&model.id))
        {
            debug!(step = %step, model = %model.id, "model selected");
            return Selection {
                model: model.clone(),
                fallback: false,
            };
        }
        let model = self.catalog.most_capable().clone();
        warn!(
            step = %step,
            model = %model.id,
            exhausted = quota.len(),
            "all candidate models exhausted; using last-resort model"
        );
        Selection {
            model,
            fallback: true,
        }
    }

    /// Marks `model_id` exhausted in this run's quota state.
    pub fn mark_exhausted(&self, quota: &mut QuotaState, model_id: &str) -> bool {
        let newly = quota.mark_exhausted(model_id);
        if newly {
            warn!(model = %model_id, "model marked exhausted for run");
        }
        newly
    }
}

impl Default for ModelRouter {
    fn default() -> Self {
        Self::new(ModelCatalog::builtin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> ModelRouter {
        ModelRouter::default()
    }

    fn all_subsets(ids: &[String]) -> Vec<QuotaState> {
        (0..(1u32 << ids.len()))
            .map(|mask| {
                ids.iter()
                    .enumerate()
                    .filter(|(idx, _)| mask & (1 << idx) != 0)
                    .map(|(_, id)| id.as_str())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn empty_quota_tool_step_picks_cheapest_lite() {
        let selection = router().select(StepKind::Tool, &QuotaState::new());
        assert_eq!(selection.model.id, "flash-lite");
        assert!(!selection.fallback);
    }

    #[test]
    fn exhausted_lite_moves_to_next_tool_model() {
        let quota: QuotaState = ["flash-lite"].into_iter().collect();
        let selection = router().select(StepKind::Tool, &quota);
        assert_eq!(selection.model.id, "flash");
    }

    #[test]
    fn all_tool_models_exhausted_falls_back_to_most_capable() {
        let quota: QuotaState = ["flash-lite", "flash"].into_iter().collect();
        let selection = router().select(StepKind::Tool, &quota);
        assert_eq!(selection.model.id, "frontier-pro");
        assert!(selection.fallback);
    }

    #[test]
    fn synthesis_considers_every_tier() {
        let quota: QuotaState = ["flash-lite", "flash"].into_iter().collect();
        let selection = router().select(StepKind::Synthesis, &quota);
        assert_eq!(selection.model.id, "frontier-flash");
        assert!(!selection.fallback);
    }

    #[test]
    fn never_returns_exhausted_model_unless_all_candidates_are() {
        let router = router();
        let ids: Vec<String> = router
            .catalog()
            .models()
            .iter()
            .map(|m| m.id.clone())
            .collect();
        for quota in all_subsets(&ids) {
            for step in [StepKind::Tool, StepKind::Synthesis] {
                let selection = router.select(step, &quota);
                let all_exhausted = router
                    .candidates(step)
                    .all(|model| quota.is_exhausted(&model.id));
                if !all_exhausted {
                    assert!(!quota.is_exhausted(&selection.model.id));
                    assert!(!selection.fallback);
                } else {
                    assert!(selection.fallback);
                }
                // deterministic
                assert_eq!(router.select(step, &quota), selection);
            }
        }
    }

    #[test]
    fn tool_steps_only_use_cheap_tiers_when_available() {
        let router = router();
        let quota: QuotaState = ["flash-lite"].into_iter().collect();
        let selection = router.select(StepKind::Tool, &quota);
        assert!(selection.model.tier.is_tool_eligible());
    }

    #[test]
    fn mark_exhausted_reports_new_entries_only() {
        let router = router();
        let mut quota = QuotaState::new();
        assert!(router.mark_exhausted(&mut quota, "flash"));
        assert!(!router.mark_exhausted(&mut quota, "flash"));
        assert_eq!(quota.len(), 1);
    }
}
