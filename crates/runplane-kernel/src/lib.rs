//! Control plane for agent runs: model routing, run event streaming and the
//! authenticated proxy in front of the remote browser worker.

pub mod auth;
pub mod config;
pub mod control_plane;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod orchestrator;
pub mod server;
pub mod sessions;
pub mod tokens;
pub mod worker;

pub use auth::{Authenticator, Caller, CallerVia, StaticTokenAuthenticator};
pub use config::Config;
pub use control_plane::{ControlPlane, ControlPlaneBuilder};
pub use errors::{ControlPlaneError, ControlPlaneResult};
pub use server::{build_router, ServeHealth, ServeState};
pub use tokens::{ProxyToken, ProxyTokenIssuer};
