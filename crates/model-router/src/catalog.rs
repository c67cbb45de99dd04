use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::RouterError;

/// Capability tier, ordered from least to most capable.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelTier {
    Lite,
    Standard,
    Pro,
    FrontierLite,
    FrontierPro,
}

impl ModelTier {
    /// Tiers cheap enough for mechanical tool steps.
    pub const fn is_tool_eligible(self) -> bool {
        matches!(self, ModelTier::Lite | ModelTier::Standard)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ModelTier::Lite => "lite",
            ModelTier::Standard => "standard",
            ModelTier::Pro => "pro",
            ModelTier::FrontierLite => "frontier-lite",
            ModelTier::FrontierPro => "frontier-pro",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingMode {
    #[default]
    Off,
    Dynamic,
}

/// Immutable description of one model offered by the provider.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Short internal key, used in quota state and logs.
    pub id: String,
    pub provider_model_id: String,
    pub tier: ModelTier,
    #[serde(default)]
    pub thinking_mode: ThinkingMode,
    /// Ordinal cost, only used for ordering and logging.
    pub relative_cost: u32,
}

impl ModelDescriptor {
    pub fn new(
        id: &str,
        provider_model_id: &str,
        tier: ModelTier,
        thinking_mode: ThinkingMode,
        relative_cost: u32,
    ) -> Self {
        Self {
            id: id.to_string(),
            provider_model_id: provider_model_id.to_string(),
            tier,
            thinking_mode,
            relative_cost,
        }
    }
}

/// Fixed catalogue, sorted by ascending cost once at construction.
#[derive(Clone, Debug)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    pub fn new(mut models: Vec<ModelDescriptor>) -> Result<Self, RouterError> {
        if models.is_empty() {
            return Err(RouterError::EmptyCatalog);
        }
        let mut seen = HashSet::new();
        for model in &models {
            if !seen.insert(model.id.as_str()) {
                return Err(RouterError::DuplicateModel(model.id.clone()));
            }
        }
        if !models.iter().any(|model| model.tier.is_tool_eligible()) {
            return Err(RouterError::NoToolModel);
        }
        models.sort_by(|a, b| {
            a.relative_cost
                .cmp(&b.relative_cost)
                .then_with(|| a.tier.cmp(&b.tier))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(Self { models })
    }

    /// Built-in catalogue used when the configuration does not override it.
    pub fn builtin() -> Self {
        Self::new(vec![
            ModelDescriptor::new(
                "flash-lite",
                "gemini-2.5-flash-lite",
                ModelTier::Lite,
                ThinkingMode::Off,
                1,
            ),
            ModelDescriptor::new(
                "flash",
                "gemini-2.5-flash",
                ModelTier::Standard,
                ThinkingMode::Off,
                2,
            ),
            ModelDescriptor::new(
                "frontier-flash",
                "gemini-3-flash-preview",
                ModelTier::FrontierLite,
                ThinkingMode::Dynamic,
                3,
            ),
            ModelDescriptor::new(
                "pro",
                "gemini-2.5-pro",
                ModelTier::Pro,
                ThinkingMode::Dynamic,
                4,
            ),
            ModelDescriptor::new(
                "frontier-pro",
                "gemini-3-pro-preview",
                ModelTier::FrontierPro,
                ThinkingMode::Dynamic,
                6,
            ),
        ])
        .unwrap_or_else(|_| unreachable!("builtin catalogue is valid"))
    }

    /// Models in priority order (ascending cost).
    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|model| model.id == id)
    }

    /// The single most capable model: highest tier, then highest cost.
    pub fn most_capable(&self) -> &ModelDescriptor {
        self.models
            .iter()
            .max_by(|a, b| {
                a.tier
                    .cmp(&b.tier)
                    .then_with(|| a.relative_cost.cmp(&b.relative_cost))
                    .then_with(|| b.id.cmp(&a.id))
            })
            .unwrap_or(&self.models[0])
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_is_sorted_by_cost() {
        let catalog = ModelCatalog::builtin();
        let costs: Vec<u32> = catalog.models().iter().map(|m| m.relative_cost).collect();
        let mut sorted = costs.clone();
        sorted.sort();
        assert_eq!(costs, sorted);
        assert_eq!(catalog.most_capable().id, "frontier-pro");
    }

    #[test]
    fn rejects_invalid_catalogues() {
        assert_eq!(
            ModelCatalog::new(vec![]).unwrap_err(),
            RouterError::EmptyCatalog
        );
        let dup = vec![
            ModelDescriptor::new("a", "a-1", ModelTier::Lite, ThinkingMode::Off, 1),
            ModelDescriptor::new("a", "a-2", ModelTier::Pro, ThinkingMode::Off, 2),
        ];
        assert_eq!(
            ModelCatalog::new(dup).unwrap_err(),
            RouterError::DuplicateModel("a".into())
        );
        let no_tool = vec![ModelDescriptor::new(
            "p",
            "p-1",
            ModelTier::Pro,
            ThinkingMode::Dynamic,
            1,
        )];
        assert_eq!(
            ModelCatalog::new(no_tool).unwrap_err(),
            RouterError::NoToolModel
        );
    }

    #[test]
    fn descriptors_deserialize_from_yaml() {
        let raw = "- id: mini\n  provider_model_id: vendor-mini\n  tier: lite\n  relative_cost: 1\n- id: big\n  provider_model_id: vendor-big\n  tier: frontier-pro\n  thinking_mode: dynamic\n  relative_cost: 9\n";
        let models: Vec<ModelDescriptor> = serde_yaml::from_str(raw).unwrap();
        let catalog = ModelCatalog::new(models).unwrap();
        assert_eq!(catalog.models()[0].thinking_mode, ThinkingMode::Off);
        assert_eq!(catalog.most_capable().id, "big");
    }
}
