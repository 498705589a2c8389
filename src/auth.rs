//! Token exchange and account helpers over HTTP.
//!
//! DESIGN
//! ======
//! `acquire_token` is a single request/response call: credentials go out as
//! JSON, an `authToken` string comes back. There is no retry here; whether
//! and when to try again is the caller's decision. Every failure mode
//! (network, non-2xx, missing token) is an [`AuthError`], and callers must
//! treat it as "no token available".
//!
//! `register`, `logout`, `user_info` and `check_health` talk to the same
//! server family and exist for the CLI; the connection lifecycle never calls
//! them. `logout` and `user_info` authenticate with the token as a bearer
//! credential.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

// =============================================================================
// ERRORS
// =============================================================================

/// Error returned by the HTTP auth helpers.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A required input was empty; no request was sent.
    #[error("invalid auth request: {0}")]
    InvalidRequest(&'static str),
    /// The HTTP exchange itself failed (connect, TLS, body read, JSON parse).
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("server rejected request with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    /// The response body lacked a required string field.
    #[error("missing expected field `{0}`")]
    MissingField(&'static str),
}

// =============================================================================
// TYPES
// =============================================================================

/// Username/password pair supplied per connect attempt. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    fn validate(&self) -> Result<(), AuthError> {
        if self.username.is_empty() {
            return Err(AuthError::InvalidRequest("username is empty"));
        }
        if self.password.is_empty() {
            return Err(AuthError::InvalidRequest("password is empty"));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Opaque, non-empty bearer token for one connection attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a raw token. Returns `None` for an empty string.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.is_empty() { None } else { Some(Self(raw)) }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthToken(<{} bytes>)", self.0.len())
    }
}

/// Parsed health endpoint response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthReport {
    /// `true` only for a 2xx response reporting `"healthy"`.
    pub healthy: bool,
    pub http_status: u16,
    pub status: String,
    pub redis: Option<String>,
}

#[derive(Serialize)]
struct CredentialsBody<'a> {
    username: &'a str,
    password: &'a str,
}

impl<'a> From<&'a Credentials> for CredentialsBody<'a> {
    fn from(credentials: &'a Credentials) -> Self {
        Self {
            username: &credentials.username,
            password: &credentials.password,
        }
    }
}

#[derive(Deserialize)]
struct HealthBody {
    status: String,
    #[serde(default)]
    redis: Option<String>,
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Exchange credentials for a token via `POST <auth_endpoint>`.
///
/// # Errors
///
/// Returns [`AuthError::InvalidRequest`] for empty inputs (no request is
/// sent), [`AuthError::Http`] for network or body failures,
/// [`AuthError::Rejected`] for non-2xx responses, and
/// [`AuthError::MissingField`] when `authToken` is absent or empty.
pub async fn acquire_token(
    http: &reqwest::Client,
    auth_endpoint: &str,
    credentials: &Credentials,
) -> Result<AuthToken, AuthError> {
    if auth_endpoint.trim().is_empty() {
        return Err(AuthError::InvalidRequest("auth endpoint is empty"));
    }
    credentials.validate()?;

    let body = post_credentials(http, auth_endpoint, credentials).await?;
    let token = body
        .get("authToken")
        .and_then(Value::as_str)
        .and_then(AuthToken::new)
        .ok_or(AuthError::MissingField("authToken"))?;

    debug!(username = %credentials.username, "auth: token acquired");
    Ok(token)
}

/// Create an account via `POST <register_endpoint>`; returns the username
/// echoed back by the server.
///
/// # Errors
///
/// Same failure modes as [`acquire_token`], with `username` as the required
/// response field.
pub async fn register(
    http: &reqwest::Client,
    register_endpoint: &str,
    credentials: &Credentials,
) -> Result<String, AuthError> {
    if register_endpoint.trim().is_empty() {
        return Err(AuthError::InvalidRequest("register endpoint is empty"));
    }
    credentials.validate()?;

    let body = post_credentials(http, register_endpoint, credentials).await?;
    body.get("username")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or(AuthError::MissingField("username"))
}

/// Invalidate `token` server-side via `POST <logout_endpoint>`.
///
/// # Errors
///
/// Returns [`AuthError::InvalidRequest`] for an empty endpoint,
/// [`AuthError::Http`] for network failures and [`AuthError::Rejected`] for
/// non-2xx responses (an already invalid token is a 401).
pub async fn logout(
    http: &reqwest::Client,
    logout_endpoint: &str,
    token: &AuthToken,
) -> Result<(), AuthError> {
    if logout_endpoint.trim().is_empty() {
        return Err(AuthError::InvalidRequest("logout endpoint is empty"));
    }

    let response = http
        .post(logout_endpoint)
        .bearer_auth(token.as_str())
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(rejected(response).await);
    }

    debug!("auth: token invalidated");
    Ok(())
}

/// Look up the account that owns `token` via `GET <user_endpoint>`; returns
/// its username.
///
/// # Errors
///
/// Same failure modes as [`logout`], plus [`AuthError::MissingField`] when
/// the body has no `username`.
pub async fn user_info(
    http: &reqwest::Client,
    user_endpoint: &str,
    token: &AuthToken,
) -> Result<String, AuthError> {
    if user_endpoint.trim().is_empty() {
        return Err(AuthError::InvalidRequest("user endpoint is empty"));
    }

    let response = http
        .get(user_endpoint)
        .bearer_auth(token.as_str())
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(rejected(response).await);
    }

    let body = response.json::<Value>().await?;
    body.get("username")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or(AuthError::MissingField("username"))
}

/// Query the server health endpoint.
///
/// A `503` carries a structured body and is returned as an unhealthy report
/// rather than an error.
///
/// # Errors
///
/// Returns [`AuthError::Http`] for network failures or unparsable bodies and
/// [`AuthError::Rejected`] for any other non-2xx status.
pub async fn check_health(
    http: &reqwest::Client,
    health_endpoint: &str,
) -> Result<HealthReport, AuthError> {
    if health_endpoint.trim().is_empty() {
        return Err(AuthError::InvalidRequest("health endpoint is empty"));
    }

    let response = http.get(health_endpoint).send().await?;
    let status = response.status();
    if !status.is_success() && status != reqwest::StatusCode::SERVICE_UNAVAILABLE {
        return Err(rejected(response).await);
    }

    let body = response.json::<HealthBody>().await?;
    Ok(HealthReport {
        healthy: status.is_success() && body.status == "healthy",
        http_status: status.as_u16(),
        status: body.status,
        redis: body.redis,
    })
}

async fn post_credentials(
    http: &reqwest::Client,
    endpoint: &str,
    credentials: &Credentials,
) -> Result<Value, AuthError> {
    let response = http
        .post(endpoint)
        .json(&CredentialsBody::from(credentials))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(rejected(response).await);
    }
    Ok(response.json::<Value>().await?)
}

async fn rejected(response: reqwest::Response) -> AuthError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    warn!(status, "auth: server rejected request");
    AuthError::Rejected { status, body }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
