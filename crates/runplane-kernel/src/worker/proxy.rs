use std::sync::Arc;

use axum::body::Bytes;
use axum::http::Method;
use reqwest::Response;
use serde_json::Value;
use tracing::{info, instrument, warn};

use runplane_core_types::{OwnerId, Platform};
use runplane_session_vault::SessionVault;

use crate::config::Config;
use crate::errors::{ControlPlaneError, ControlPlaneResult};
use crate::metrics::record_proxy_request;
use crate::sessions::{SessionState, SessionStore, SessionSummary};

use super::client::{is_stream_path, TaskRequest, WorkerClient, WorkerReply};

/// Gatekeeper for everything that reaches the browser worker.
///
/// Configuration problems are kept until a call needs the missing piece, so
/// the process starts even when automation is not set up.
pub struct WorkerProxy {
    enabled: bool,
    stream_suffix: String,
    client: Result<WorkerClient, String>,
    vault: Option<SessionVault>,
    store: Arc<dyn SessionStore>,
}

impl WorkerProxy {
    pub fn new(config: &Config, store: Arc<dyn SessionStore>) -> Self {
        let client = WorkerClient::from_config(&config.worker).map_err(|err| err.to_string());
        if let Err(reason) = &client {
            if config.worker.enabled {
                warn!(%reason, "browser automation enabled but worker client unavailable");
            }
        }
        let vault = SessionVault::from_config(config.vault.secret.as_deref()).ok();
        Self {
            enabled: config.worker.enabled,
            stream_suffix: config.worker.stream_path_suffix.clone(),
            client,
            vault,
            store,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Rejects the call before any network hop when automation is switched off.
    pub fn ensure_enabled(&self) -> ControlPlaneResult<()> {
        if self.enabled {
            Ok(())
        } else {
            record_proxy_request("any", "disabled");
            Err(ControlPlaneError::AutomationDisabled)
        }
    }

    pub fn is_stream_path(&self, path: &str) -> bool {
        is_stream_path(path, &self.stream_suffix)
    }

    fn client(&self) -> ControlPlaneResult<&WorkerClient> {
        self.client
            .as_ref()
            .map_err(|reason| ControlPlaneError::Config(reason.clone()))
    }

    fn vault(&self) -> ControlPlaneResult<&SessionVault> {
        self.vault.as_ref().ok_or_else(|| {
            ControlPlaneError::Config("session encryption secret is not configured".into())
        })
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    #[instrument(name = "runplane.proxy.forward", skip_all, fields(owner = %owner))]
    pub async fn forward(
        &self,
        owner: &OwnerId,
        method: Method,
        path: &str,
        query: Option<&str>,
        body: Bytes,
        content_type: Option<&str>,
    ) -> ControlPlaneResult<WorkerReply> {
        self.ensure_enabled()?;
        let client = self.client()?;
        let result = client
            .forward(owner, method, path, query, body, content_type)
            .await;
        observe("forward", &result);
        result
    }

    #[instrument(name = "runplane.proxy.stream", skip_all, fields(owner = %owner))]
    pub async fn open_stream(
        &self,
        owner: &OwnerId,
        method: Method,
        path: &str,
        query: Option<&str>,
        body: Bytes,
        content_type: Option<&str>,
    ) -> ControlPlaneResult<Response> {
        self.ensure_enabled()?;
        let client = self.client()?;
        let result = client
            .open_stream(owner, method, path, query, body, content_type)
            .await;
        observe("stream", &result);
        result
    }

    /// Decrypts the stored state for `platform` and hands it to the worker.
    #[instrument(name = "runplane.proxy.restore", skip_all, fields(owner = %owner, platform = %platform))]
    pub async fn restore_session(
        &self,
        owner: &OwnerId,
        platform: &Platform,
    ) -> ControlPlaneResult<SessionSummary> {
        self.ensure_enabled()?;
        let result = self.restore_inner(owner, platform).await;
        observe("restore", &result);
        result
    }

    async fn restore_inner(
        &self,
        owner: &OwnerId,
        platform: &Platform,
    ) -> ControlPlaneResult<SessionSummary> {
        let client = self.client()?;
        let vault = self.vault()?;
        let stored = self.store.load(owner, platform).await?.ok_or_else(|| {
            ControlPlaneError::not_found(format!("stored session for platform {platform}"))
        })?;
        let state: SessionState = vault.decrypt(&stored.blob).map_err(|err| {
            warn!(%owner, %platform, %err, "stored session could not be decrypted");
            ControlPlaneError::from(err)
        })?;
        client.restore_session(owner, platform, &state).await?;
        self.store.touch(owner, platform).await?;
        info!(%owner, %platform, "browser session restored on worker");
        let refreshed = self.store.load(owner, platform).await?.unwrap_or(stored);
        Ok(refreshed.summary())
    }

    /// Captures the live worker state for `platform`, encrypts and stores it.
    #[instrument(name = "runplane.proxy.connect", skip_all, fields(owner = %owner, platform = %platform))]
    pub async fn connect_session(
        &self,
        owner: &OwnerId,
        platform: &Platform,
    ) -> ControlPlaneResult<SessionSummary> {
        self.ensure_enabled()?;
        let result = self.connect_inner(owner, platform).await;
        observe("connect", &result);
        result
    }

    async fn connect_inner(
        &self,
        owner: &OwnerId,
        platform: &Platform,
    ) -> ControlPlaneResult<SessionSummary> {
        let client = self.client()?;
        let vault = self.vault()?;
        let state = client.fetch_session_state(owner, platform).await?;
        if !state.has_credentials() {
            warn!(%owner, %platform, "session state holds no cookies; login not completed");
            return Err(ControlPlaneError::LoginNotCompleted);
        }
        let blob = vault.encrypt(&state)?;
        let summary = self.store.upsert(owner, platform, blob).await?;
        info!(%owner, %platform, cookies = state.cookies.len(), "browser session stored");
        Ok(summary)
    }

    pub async fn disconnect_session(
        &self,
        owner: &OwnerId,
        platform: &Platform,
    ) -> ControlPlaneResult<()> {
        self.ensure_enabled()?;
        if self.store.remove(owner, platform).await? {
            info!(%owner, %platform, "browser session disconnected");
            Ok(())
        } else {
            Err(ControlPlaneError::not_found(format!(
                "stored session for platform {platform}"
            )))
        }
    }

    pub async fn list_sessions(&self, owner: &OwnerId) -> ControlPlaneResult<Vec<SessionSummary>> {
        self.ensure_enabled()?;
        self.store.list(owner).await
    }

    /// Runs an automation task, restoring the platform session first when one is named.
    #[instrument(name = "runplane.proxy.task", skip_all, fields(owner = %task.owner_id))]
    pub async fn submit_task(&self, task: &TaskRequest) -> ControlPlaneResult<Value> {
        self.ensure_enabled()?;
        if let Some(platform) = &task.platform {
            self.restore_session(&task.owner_id, platform).await?;
        }
        let client = self.client()?;
        let result = client.submit_task(task).await;
        observe("task", &result);
        result
    }
}

fn observe<T>(kind: &str, result: &ControlPlaneResult<T>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(ControlPlaneError::WorkerTimeout(_)) => "timeout",
        Err(ControlPlaneError::ReconnectRequired(_)) => "reconnect_required",
        Err(ControlPlaneError::LoginNotCompleted) => "login_not_completed",
        Err(_) => "error",
    };
    record_proxy_request(kind, outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::InMemorySessionStore;

    fn proxy(enabled: bool, base_url: Option<&str>, secret: Option<&str>) -> WorkerProxy {
        let mut config = Config::default();
        config.worker.enabled = enabled;
        config.worker.base_url = base_url.map(str::to_string);
        config.worker.secret = Some("worker-secret".into());
        config.vault.secret = secret.map(str::to_string);
        WorkerProxy::new(&config, Arc::new(InMemorySessionStore::new()))
    }

    #[tokio::test]
    async fn disabled_flag_rejects_before_anything_else() {
        let proxy = proxy(false, Some("http://127.0.0.1:9"), Some("k"));
        let owner = OwnerId::from("a");
        let platform = Platform::parse("x").unwrap();
        let err = proxy.connect_session(&owner, &platform).await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::AutomationDisabled));
        let err = proxy
            .forward(&owner, Method::GET, "/anything", None, Bytes::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::AutomationDisabled));
        assert!(matches!(
            proxy.list_sessions(&owner).await,
            Err(ControlPlaneError::AutomationDisabled)
        ));
    }

    #[tokio::test]
    async fn missing_configuration_fails_at_the_call_site() {
        let owner = OwnerId::from("a");
        let platform = Platform::parse("x").unwrap();

        let no_url = proxy(true, None, Some("k"));
        let err = no_url.restore_session(&owner, &platform).await.unwrap_err();
        assert_eq!(err.code(), "config_error");

        let no_secret = proxy(true, Some("http://127.0.0.1:9"), None);
        let err = no_secret.connect_session(&owner, &platform).await.unwrap_err();
        assert_eq!(err.code(), "config_error");
        assert!(err.to_string().contains("encryption secret"));
    }

    #[tokio::test]
    async fn restoring_an_unknown_platform_is_not_found() {
        let proxy = proxy(true, Some("http://127.0.0.1:9"), Some("k"));
        let err = proxy
            .restore_session(&OwnerId::from("a"), &Platform::parse("x").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn corrupt_blob_requires_reconnect() {
        let proxy = proxy(true, Some("http://127.0.0.1:9"), Some("k"));
        let owner = OwnerId::from("a");
        let platform = Platform::parse("x").unwrap();
        proxy
            .store()
            .upsert(&owner, &platform, "00ff:zz".into())
            .await
            .unwrap();
        let err = proxy.restore_session(&owner, &platform).await.unwrap_err();
        assert_eq!(err.code(), "reconnect_required");
    }
}
