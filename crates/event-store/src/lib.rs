//! Append-only per-run event log and the resumable stream publisher built on it.

pub mod api;
pub mod config;
pub mod errors;
pub mod model;
pub mod read;

pub use api::{EventStoreResult, InMemoryRunEventLog, RunEventLog};
pub use config::{LogLimits, PublisherCfg};
pub use errors::{EsError, EsErrorKind};
pub use model::{RunEvent, RunStatus, RunSummary, TERMINAL_EVENT_COMPLETE, TERMINAL_EVENT_ERROR};
pub use read::stream::{RunStreamPublisher, StreamItem};
