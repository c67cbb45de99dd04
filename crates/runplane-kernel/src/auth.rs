use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, Uri};
use tracing::debug;
use url::form_urlencoded;

use runplane_core_types::OwnerId;

use crate::config::AuthConfig;
use crate::errors::{ControlPlaneError, ControlPlaneResult};
use crate::tokens::ProxyTokenIssuer;

pub const BROWSER_TOKEN_HEADER: &str = "x-browser-token";
pub const BROWSER_TOKEN_QUERY: &str = "token";

/// Full (slow path) authentication of an API credential.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credential: &str) -> ControlPlaneResult<OwnerId>;
}

/// Authenticates against the `auth.api_tokens` table from configuration.
#[derive(Clone, Debug, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, OwnerId>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: HashMap<String, OwnerId>) -> Self {
        Self { tokens }
    }

    pub fn from_config(cfg: &AuthConfig) -> Self {
        Self::new(
            cfg.api_tokens
                .iter()
                .map(|(token, owner)| (token.clone(), OwnerId(owner.clone())))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, credential: &str) -> ControlPlaneResult<OwnerId> {
        self.tokens
            .get(credential)
            .cloned()
            .ok_or_else(|| ControlPlaneError::Unauthorized("invalid api token".into()))
    }
}

/// How a caller's identity was established.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallerVia {
    ProxyToken,
    Full,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub owner: OwnerId,
    pub via: CallerVia,
}

/// Resolves the caller: a browser token is tried against the token table
/// first, then the bearer credential goes through full authentication.
pub async fn resolve_caller(
    headers: &HeaderMap,
    uri: &Uri,
    tokens: &ProxyTokenIssuer,
    authenticator: &dyn Authenticator,
) -> ControlPlaneResult<Caller> {
    let browser_token = extract_browser_token(headers, uri);
    if let Some(token) = browser_token.as_deref() {
        if let Some(owner) = tokens.validate(token) {
            return Ok(Caller {
                owner,
                via: CallerVia::ProxyToken,
            });
        }
        debug!("browser token rejected; falling back to full authentication");
    }

    match extract_bearer(headers) {
        Some(credential) => authenticate_full(&credential, authenticator).await,
        None if browser_token.is_some() => Err(ControlPlaneError::Unauthorized(
            "invalid or expired browser token".into(),
        )),
        None => Err(ControlPlaneError::Unauthorized(
            "missing credentials".into(),
        )),
    }
}

/// Full authentication only; proxy tokens are not accepted.
pub async fn resolve_full_caller(
    headers: &HeaderMap,
    authenticator: &dyn Authenticator,
) -> ControlPlaneResult<Caller> {
    let credential = extract_bearer(headers)
        .ok_or_else(|| ControlPlaneError::Unauthorized("missing bearer credential".into()))?;
    authenticate_full(&credential, authenticator).await
}

async fn authenticate_full(
    credential: &str,
    authenticator: &dyn Authenticator,
) -> ControlPlaneResult<Caller> {
    let owner = authenticator.authenticate(credential).await?;
    Ok(Caller {
        owner,
        via: CallerVia::Full,
    })
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Browser token from the `X-Browser-Token` header, else the `token` query
/// parameter (streaming clients cannot set headers).
pub fn extract_browser_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(value) = headers.get(BROWSER_TOKEN_HEADER) {
        if let Ok(raw) = value.to_str() {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    if let Some(query) = uri.query() {
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            if key == BROWSER_TOKEN_QUERY {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }

    None
}
