use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use runplane_event_store::EsError;
use runplane_model_router::RouterError;
use runplane_session_vault::VaultError;

pub type ControlPlaneResult<T> = Result<T, ControlPlaneError>;

/// Every failure the control plane surfaces to a caller.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("browser automation is disabled")]
    AutomationDisabled,
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("login not completed: the browser session holds no stored credentials")]
    LoginNotCompleted,
    #[error("reconnect required: {0}")]
    ReconnectRequired(String),
    #[error("worker did not answer within {0}s")]
    WorkerTimeout(u64),
    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),
    #[error("worker returned {status}: {body}")]
    WorkerRejected { status: u16, body: String },
    #[error("store error: {0}")]
    Store(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlPlaneError {
    pub fn status(&self) -> StatusCode {
        match self {
            ControlPlaneError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ControlPlaneError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ControlPlaneError::AutomationDisabled => StatusCode::FORBIDDEN,
            ControlPlaneError::NotFound(_) => StatusCode::NOT_FOUND,
            ControlPlaneError::InvalidRequest(_) | ControlPlaneError::LoginNotCompleted => {
                StatusCode::BAD_REQUEST
            }
            ControlPlaneError::ReconnectRequired(_) => StatusCode::CONFLICT,
            ControlPlaneError::WorkerTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ControlPlaneError::WorkerUnavailable(_) | ControlPlaneError::WorkerRejected { .. } => {
                StatusCode::BAD_GATEWAY
            }
            ControlPlaneError::Store(_) | ControlPlaneError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code carried next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            ControlPlaneError::Config(_) => "config_error",
            ControlPlaneError::Unauthorized(_) => "unauthorized",
            ControlPlaneError::AutomationDisabled => "automation_disabled",
            ControlPlaneError::NotFound(_) => "not_found",
            ControlPlaneError::InvalidRequest(_) => "invalid_request",
            ControlPlaneError::LoginNotCompleted => "login_not_completed",
            ControlPlaneError::ReconnectRequired(_) => "reconnect_required",
            ControlPlaneError::WorkerTimeout(_) => "worker_timeout",
            ControlPlaneError::WorkerUnavailable(_) => "worker_unavailable",
            ControlPlaneError::WorkerRejected { .. } => "worker_error",
            ControlPlaneError::Store(_) => "store_error",
            ControlPlaneError::Internal(_) => "internal_error",
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ControlPlaneError::NotFound(what.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ControlPlaneError::InvalidRequest(message.into())
    }
}

impl IntoResponse for ControlPlaneError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(json!({
                "success": false,
                "error": self.to_string(),
                "code": self.code(),
            })),
        )
            .into_response()
    }
}

impl From<EsError> for ControlPlaneError {
    fn from(err: EsError) -> Self {
        if err.is_not_found() {
            ControlPlaneError::NotFound("run".into())
        } else {
            ControlPlaneError::Store(err.to_string())
        }
    }
}

impl From<VaultError> for ControlPlaneError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::MissingSecret => ControlPlaneError::Config(err.to_string()),
            err if err.is_unreadable() => ControlPlaneError::ReconnectRequired(err.to_string()),
            err => ControlPlaneError::Internal(err.to_string()),
        }
    }
}

impl From<RouterError> for ControlPlaneError {
    fn from(err: RouterError) -> Self {
        ControlPlaneError::Config(format!("invalid model catalogue: {err}"))
    }
}
