use std::env;
use std::fs as stdfs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use runplane_kernel::Config;
use tokio::fs;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOCAL_ENV_PATH: &str = "config/local.env";
const LOCAL_CONFIG_PATH: &str = "config/runplane.yaml";

/// Exports `KEY=VALUE` lines from `config/local.env` that are not already set.
pub fn load_local_env_overrides() {
    let path = Path::new(LOCAL_ENV_PATH);
    if !path.exists() {
        return;
    }

    match stdfs::read_to_string(path) {
        Ok(contents) => {
            for (key, value) in parse_env_lines(&contents) {
                if env::var(&key).is_ok() {
                    continue;
                }
                env::set_var(key, value);
            }
            info!(path = %path.display(), "Loaded environment overrides from local.env");
        }
        Err(err) => {
            warn!(path = %path.display(), ?err, "failed to read local.env overrides");
        }
    }
}

fn parse_env_lines(contents: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            warn!(line = idx + 1, "invalid local.env entry; skipping");
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        pairs.push((key.to_string(), unescape_value(value.trim())));
    }
    pairs
}

pub fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

pub struct LoadedConfig {
    pub config: Config,
    pub path: Option<PathBuf>,
}

/// Loads the YAML configuration, then applies `RUNPLANE_*` environment overrides.
///
/// Priority: `--config` > `./config/runplane.yaml` > `<config dir>/runplane/config.yaml`.
/// A missing file means defaults; an explicit `--config` that does not exist is an error.
pub async fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let candidate = match config_path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("config file {} does not exist", path.display());
            }
            Some(path.clone())
        }
        None => default_config_path(),
    };

    let mut loaded = match candidate {
        Some(path) if path.exists() => {
            let content = fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config = Config::from_yaml(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            info!("Loaded configuration from: {}", path.display());
            LoadedConfig {
                config,
                path: Some(path),
            }
        }
        other => {
            if let Some(path) = &other {
                info!("Config file not found, using defaults: {}", path.display());
            }
            LoadedConfig {
                config: Config::default(),
                path: None,
            }
        }
    };
    loaded.config.apply_env_overrides();
    Ok(loaded)
}

fn default_config_path() -> Option<PathBuf> {
    let local_config = PathBuf::from(LOCAL_CONFIG_PATH);
    if local_config.exists() {
        return Some(local_config);
    }
    let mut path = dirs::config_dir()?;
    path.push("runplane");
    path.push("config.yaml");
    Some(path)
}

fn unescape_value(value: &str) -> String {
    if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
        let inner = &value[1..value.len() - 1];
        inner
            .replace("\\\"", "\"")
            .replace("\\n", "\n")
            .replace("\\r", "\r")
            .replace("\\t", "\t")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn env_lines_skip_comments_and_unquote_values() {
        let parsed = parse_env_lines(
            "# comment\nRUNPLANE_WORKER_URL=http://worker:9000\n\nbroken line\nRUNPLANE_SESSION_SECRET=\"two\\nlines\"\n=orphan\n",
        );
        assert_eq!(
            parsed,
            vec![
                (
                    "RUNPLANE_WORKER_URL".to_string(),
                    "http://worker:9000".to_string()
                ),
                (
                    "RUNPLANE_SESSION_SECRET".to_string(),
                    "two\nlines".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn explicit_config_file_is_parsed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  port: 9911\nworker:\n  request_timeout_secs: 3\ntokens:\n  ttl_secs: 120"
        )
        .unwrap();
        let loaded = load_config(Some(&file.path().to_path_buf())).await.unwrap();
        assert_eq!(loaded.path.as_deref(), Some(file.path()));
        assert_eq!(loaded.config.server.port, 9911);
        assert_eq!(loaded.config.worker.request_timeout_secs, 3);
        assert_eq!(loaded.config.tokens.ttl_secs, 120);
        assert_eq!(loaded.config.runs.poll_interval_ms, 500);
    }

    #[tokio::test]
    async fn missing_explicit_config_is_an_error() {
        let missing = PathBuf::from("/definitely/not/here/runplane.yaml");
        assert!(load_config(Some(&missing)).await.is_err());
    }
}
