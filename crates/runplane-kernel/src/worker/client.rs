use std::time::Duration;

use axum::body::Bytes;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{Method, StatusCode};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::{form_urlencoded, Url};

use runplane_core_types::{OwnerId, Platform};

use crate::config::{non_empty, WorkerConfig};
use crate::errors::{ControlPlaneError, ControlPlaneResult};
use crate::sessions::SessionState;

pub const OWNER_HEADER: &str = "x-runplane-owner";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw worker answer, relayed to the caller unchanged.
#[derive(Clone, Debug)]
pub struct WorkerReply {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Automation task handed to the worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRequest {
    pub owner_id: OwnerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    pub instruction: String,
    #[serde(default)]
    pub args: Value,
}

/// HTTP client for the remote browser worker.
///
/// Every call carries the shared worker secret and the caller's owner id.
#[derive(Clone, Debug)]
pub struct WorkerClient {
    http: Client,
    base_url: Url,
    secret: String,
    timeout: Duration,
    stream_suffix: String,
}

impl WorkerClient {
    pub fn from_config(cfg: &WorkerConfig) -> ControlPlaneResult<Self> {
        let base = non_empty(cfg.base_url.as_deref()).ok_or_else(|| {
            ControlPlaneError::Config("worker base url is not configured".into())
        })?;
        let secret = non_empty(cfg.secret.as_deref()).ok_or_else(|| {
            ControlPlaneError::Config("worker secret is not configured".into())
        })?;
        let base_url = Url::parse(base)
            .map_err(|err| ControlPlaneError::Config(format!("invalid worker url '{base}': {err}")))?;
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|err| {
                ControlPlaneError::Config(format!("failed to build worker HTTP client: {err}"))
            })?;
        Ok(Self {
            http,
            base_url,
            secret: secret.to_string(),
            timeout: cfg.request_timeout(),
            stream_suffix: cfg.stream_path_suffix.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn is_stream_path(&self, path: &str) -> bool {
        is_stream_path(path, &self.stream_suffix)
    }

    /// Joins `path` under the configured base url. Dot segments are refused so
    /// a caller can never climb out of the base path.
    fn endpoint(&self, path: &str, query: Option<&str>) -> ControlPlaneResult<Url> {
        let relative = path.trim_start_matches('/');
        if relative.split(['/', '\\']).any(is_dot_segment) {
            return Err(ControlPlaneError::invalid(
                "worker path must not contain dot segments",
            ));
        }
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            relative
        );
        let mut url = Url::parse(&joined)
            .map_err(|err| ControlPlaneError::invalid(format!("invalid worker path: {err}")))?;
        if !url
            .path()
            .starts_with(self.base_url.path().trim_end_matches('/'))
        {
            return Err(ControlPlaneError::invalid(
                "worker path escapes the configured base path",
            ));
        }
        if let Some(query) = query.filter(|query| !query.is_empty()) {
            url.set_query(Some(query));
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder, owner: &OwnerId) -> RequestBuilder {
        request
            .bearer_auth(&self.secret)
            .header(OWNER_HEADER, owner.as_str())
    }

    fn transport_error(&self, err: reqwest::Error) -> ControlPlaneError {
        if err.is_timeout() {
            ControlPlaneError::WorkerTimeout(self.timeout.as_secs())
        } else {
            ControlPlaneError::WorkerUnavailable(err.without_url().to_string())
        }
    }

    /// Relays a bounded call; any status the worker answers with is returned as-is.
    pub async fn forward(
        &self,
        owner: &OwnerId,
        method: Method,
        path: &str,
        query: Option<&str>,
        body: Bytes,
        content_type: Option<&str>,
    ) -> ControlPlaneResult<WorkerReply> {
        let url = self.endpoint(path, query)?;
        let mut request = self
            .authorize(self.http.request(method, url), owner)
            .timeout(self.timeout);
        if let Some(content_type) = content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|err| self.transport_error(err))?;
        Ok(WorkerReply {
            status,
            content_type,
            body,
        })
    }

    /// Opens a live stream with the caller's method and body; no request
    /// timeout applies.
    pub async fn open_stream(
        &self,
        owner: &OwnerId,
        method: Method,
        path: &str,
        query: Option<&str>,
        body: Bytes,
        content_type: Option<&str>,
    ) -> ControlPlaneResult<Response> {
        let url = self.endpoint(path, query)?;
        let mut request = self
            .authorize(self.http.request(method, url), owner)
            .header(ACCEPT, "text/event-stream");
        if let Some(content_type) = content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        if !body.is_empty() {
            request = request.body(body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| ControlPlaneError::WorkerUnavailable(err.without_url().to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ControlPlaneError::WorkerRejected { status, body });
        }
        Ok(response)
    }

    pub async fn restore_session(
        &self,
        owner: &OwnerId,
        platform: &Platform,
        state: &SessionState,
    ) -> ControlPlaneResult<Value> {
        let payload = json!({
            "owner_id": owner,
            "platform": platform,
            "state": state,
        });
        self.send_json(owner, Method::POST, "/session/restore", None, Some(&payload))
            .await
    }

    pub async fn fetch_session_state(
        &self,
        owner: &OwnerId,
        platform: &Platform,
    ) -> ControlPlaneResult<SessionState> {
        let query: String = form_urlencoded::Serializer::new(String::new())
            .append_pair("owner_id", owner.as_str())
            .append_pair("platform", platform.as_str())
            .finish();
        let value = self
            .send_json(owner, Method::GET, "/session/state", Some(&query), None)
            .await?;
        serde_json::from_value(value).map_err(|err| {
            ControlPlaneError::WorkerUnavailable(format!("worker returned invalid session state: {err}"))
        })
    }

    pub async fn submit_task(&self, task: &TaskRequest) -> ControlPlaneResult<Value> {
        let payload = serde_json::to_value(task)
            .map_err(|err| ControlPlaneError::Internal(err.to_string()))?;
        self.send_json(&task.owner_id, Method::POST, "/tasks", None, Some(&payload))
            .await
    }

    async fn send_json(
        &self,
        owner: &OwnerId,
        method: Method,
        path: &str,
        query: Option<&str>,
        payload: Option<&Value>,
    ) -> ControlPlaneResult<Value> {
        let url = self.endpoint(path, query)?;
        let mut request = self
            .authorize(self.http.request(method, url), owner)
            .timeout(self.timeout);
        if let Some(payload) = payload {
            request = request.json(payload);
        }
        let response = request
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| self.transport_error(err))?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&body).into_owned();
            warn!(%path, status = status.as_u16(), "worker rejected call");
            return Err(ControlPlaneError::WorkerRejected {
                status: status.as_u16(),
                body,
            });
        }
        if body.is_empty() {
            return Ok(Value::Null);
        }
        debug!(%path, bytes = body.len(), "worker call succeeded");
        serde_json::from_slice(&body).map_err(|err| {
            ControlPlaneError::WorkerUnavailable(format!("worker returned invalid JSON: {err}"))
        })
    }
}

/// `.` and `..`, including their `%2e` spellings, which url parsing resolves.
fn is_dot_segment(segment: &str) -> bool {
    let normalized = segment.to_ascii_lowercase().replace("%2e", ".");
    normalized == "." || normalized == ".."
}

pub(crate) fn is_stream_path(path: &str, suffix: &str) -> bool {
    let path = path.trim_end_matches('/');
    !suffix.is_empty() && path.ends_with(suffix.trim_end_matches('/'))
}

/// Removes every `key` pair from a raw query string.
pub fn strip_query_param(query: Option<&str>, key: &str) -> Option<String> {
    let query = query?;
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut kept = 0;
    for (name, value) in form_urlencoded::parse(query.as_bytes()) {
        if name != key {
            serializer.append_pair(&name, &value);
            kept += 1;
        }
    }
    (kept > 0).then(|| serializer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: Option<&str>, secret: Option<&str>) -> WorkerConfig {
        WorkerConfig {
            base_url: base_url.map(str::to_string),
            secret: secret.map(str::to_string),
            enabled: true,
            ..WorkerConfig::default()
        }
    }

    #[test]
    fn missing_settings_fail_with_config_errors() {
        let err = WorkerClient::from_config(&config(None, Some("s"))).unwrap_err();
        assert!(err.to_string().contains("base url"));
        let err = WorkerClient::from_config(&config(Some("http://w"), Some(" "))).unwrap_err();
        assert!(err.to_string().contains("secret"));
        let err = WorkerClient::from_config(&config(Some("not a url"), Some("s"))).unwrap_err();
        assert_eq!(err.code(), "config_error");
    }

    #[test]
    fn endpoints_join_base_and_path() {
        let client = WorkerClient::from_config(&config(Some("http://worker:9000/api/"), Some("s")))
            .unwrap();
        let url = client.endpoint("/session/state", Some("a=1")).unwrap();
        assert_eq!(url.as_str(), "http://worker:9000/api/session/state?a=1");
        let url = client.endpoint("tasks", None).unwrap();
        assert_eq!(url.as_str(), "http://worker:9000/api/tasks");
    }

    #[test]
    fn dot_segments_cannot_leave_the_base_path() {
        let client =
            WorkerClient::from_config(&config(Some("http://worker:9000/api"), Some("s"))).unwrap();
        for path in [
            "../admin",
            "/live/../../admin",
            "%2e%2E/admin",
            ".%2e/admin",
            "..\\admin",
            "./tasks",
        ] {
            let err = client.endpoint(path, None).unwrap_err();
            assert_eq!(err.code(), "invalid_request", "{path}");
        }
        let url = client.endpoint("files/..hidden/x", None).unwrap();
        assert_eq!(url.as_str(), "http://worker:9000/api/files/..hidden/x");
    }

    #[test]
    fn task_platforms_are_normalized_when_deserialized() {
        let task: TaskRequest = serde_json::from_value(json!({
            "owner_id": "alice",
            "platform": " LinkedIn ",
            "instruction": "open feed"
        }))
        .unwrap();
        assert_eq!(task.platform.as_ref().map(Platform::as_str), Some("linkedin"));
        assert_eq!(serde_json::to_value(&task).unwrap()["platform"], json!("linkedin"));

        let bad = serde_json::from_value::<TaskRequest>(json!({
            "owner_id": "alice",
            "platform": "../etc",
            "instruction": "x"
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn stream_paths_are_detected_by_suffix() {
        assert!(is_stream_path("/browser/abc/stream", "/stream"));
        assert!(is_stream_path("browser/abc/stream/", "/stream"));
        assert!(!is_stream_path("/browser/abc/streams", "/stream"));
        assert!(!is_stream_path("/browser/abc/stream", ""));
    }

    #[test]
    fn browser_token_is_stripped_from_forwarded_query() {
        assert_eq!(
            strip_query_param(Some("token=abc&page=2"), "token").as_deref(),
            Some("page=2")
        );
        assert_eq!(strip_query_param(Some("token=abc"), "token"), None);
        assert_eq!(strip_query_param(None, "token"), None);
    }
}
