//! Model catalogue, per-run quota tracking and step-aware model selection.

pub mod catalog;
pub mod classify;
pub mod errors;
pub mod quota;
pub mod router;

pub use catalog::{ModelCatalog, ModelDescriptor, ModelTier, ThinkingMode};
pub use classify::is_quota_message;
pub use errors::RouterError;
pub use quota::QuotaState;
pub use router::{ModelRouter, Selection};
pub use runplane_core_types::StepKind;
