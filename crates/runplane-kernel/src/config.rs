use std::collections::HashMap;
use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use runplane_model_router::{ModelCatalog, ModelDescriptor, RouterError};

pub const WORKER_URL_ENV: &str = "RUNPLANE_WORKER_URL";
pub const WORKER_SECRET_ENV: &str = "RUNPLANE_WORKER_SECRET";
pub const BROWSER_AUTOMATION_ENV: &str = "RUNPLANE_BROWSER_AUTOMATION";
pub const SESSION_SECRET_ENV: &str = "RUNPLANE_SESSION_SECRET";
pub const MODEL_API_BASE_ENV: &str = "RUNPLANE_MODEL_API_BASE";
pub const MODEL_API_KEY_ENV: &str = "RUNPLANE_MODEL_API_KEY";

/// Application configuration. Every section is defaulted so a partial YAML
/// file (or none at all) yields a runnable process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub worker: WorkerConfig,
    pub vault: VaultConfig,
    pub tokens: TokenConfig,
    pub runs: RunConfig,
    pub auth: AuthConfig,
    pub provider: ProviderConfig,
    /// Replaces the built-in model catalogue when present.
    pub models: Option<Vec<ModelDescriptor>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub base_url: Option<String>,
    pub secret: Option<String>,
    /// Platform-wide switch for every browser automation call.
    pub enabled: bool,
    pub request_timeout_secs: u64,
    pub stream_path_suffix: String,
}

impl WorkerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            secret: None,
            enabled: false,
            request_timeout_secs: 10,
            stream_path_suffix: "/stream".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub ttl_secs: u64,
    /// Table size at which issuance sweeps expired entries.
    pub sweep_threshold: usize,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            sweep_threshold: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub poll_interval_ms: u64,
    pub run_timeout_secs: u64,
    pub keep_alive_secs: u64,
    /// Finished runs older than this are dropped by the maintenance loop; 0 keeps them.
    pub retain_finished_secs: u64,
}

impl RunConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs.max(1))
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            run_timeout_secs: 900,
            keep_alive_secs: 15,
            retain_finished_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// API token to owner id.
    pub api_tokens: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub temperature: f32,
}

impl ProviderConfig {
    pub fn is_configured(&self) -> bool {
        non_empty(self.api_base.as_deref()).is_some()
            && non_empty(self.api_key.as_deref()).is_some()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            api_key: None,
            request_timeout_secs: 60,
            temperature: 0.2,
        }
    }
}

impl Config {
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| env::var(key).ok());
    }

    /// Applies overrides from `lookup`; blank values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key).and_then(|value| non_empty(Some(&value)).map(str::to_string))
        };

        if let Some(url) = get(WORKER_URL_ENV) {
            self.worker.base_url = Some(url);
        }
        if let Some(secret) = get(WORKER_SECRET_ENV) {
            self.worker.secret = Some(secret);
        }
        if let Some(flag) = get(BROWSER_AUTOMATION_ENV) {
            match parse_flag(&flag) {
                Some(enabled) => {
                    self.worker.enabled = enabled;
                    info!(enabled, "browser automation flag set from environment");
                }
                None => warn!(
                    value = %flag,
                    env = BROWSER_AUTOMATION_ENV,
                    "invalid automation flag; ignoring"
                ),
            }
        }
        if let Some(secret) = get(SESSION_SECRET_ENV) {
            self.vault.secret = Some(secret);
        }
        if let Some(base) = get(MODEL_API_BASE_ENV) {
            self.provider.api_base = Some(base);
        }
        if let Some(key) = get(MODEL_API_KEY_ENV) {
            self.provider.api_key = Some(key);
        }
    }

    /// Builds the model catalogue, validating any configured override.
    pub fn model_catalog(&self) -> Result<ModelCatalog, RouterError> {
        match &self.models {
            Some(models) => ModelCatalog::new(models.clone()),
            None => Ok(ModelCatalog::builtin()),
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
