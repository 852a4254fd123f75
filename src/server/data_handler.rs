//! The persistence and authentication contract the host implements.
//!
//! The core never touches storage directly; every lookup and mutation goes
//! through this trait. Handlers must be safe under the host's concurrency
//! model, and `mark_auth_info_used` must check-and-mark atomically so a
//! concurrent code replay observes the used state.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{AccessToken, AuthInfo, Client, DeviceGrant, GrantType};

/// Failure surface of a Data Handler operation.
///
/// `NotFound` and `Denied` are protocol-relevant outcomes the flows map to
/// OAuth error codes; `Backend` is a host fault surfaced as `server_error`
/// with no internal detail.
#[derive(Debug)]
pub enum HandlerError {
    NotFound,
    Denied(String),
    Backend(String),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::NotFound => f.write_str("not found"),
            HandlerError::Denied(reason) => write!(f, "denied: {reason}"),
            HandlerError::Backend(detail) => write!(f, "backend failure: {detail}"),
        }
    }
}

impl std::error::Error for HandlerError {}

pub type HandlerResult<T> = Result<T, HandlerError>;

/// Host-supplied store of clients, users, authorizations, and tokens.
#[async_trait]
pub trait DataHandler: Send + Sync + 'static {
    /// Authenticates a client. The secret comparison must be constant time.
    /// The grant type is advisory; the core enforces the allowed-grants set
    /// itself so error ordering stays uniform across handlers.
    async fn validate_client(
        &self,
        client_id: &str,
        client_secret: &str,
        grant_type: GrantType,
    ) -> HandlerResult<Client>;

    /// Authenticates a resource owner and returns its identifier.
    async fn get_user(&self, username: &str, password: &str) -> HandlerResult<String>;

    /// Creates or refreshes the authorization of a client (optionally bound
    /// to a user), minting a fresh single-use code when applicable.
    async fn create_or_update_auth_info(
        &self,
        client_id: &str,
        user_id: Option<&str>,
        scope: Option<&str>,
        redirect_uri: Option<&str>,
    ) -> HandlerResult<AuthInfo>;

    async fn get_auth_info_by_code(&self, code: &str) -> HandlerResult<AuthInfo>;

    async fn get_auth_info_by_refresh_token(&self, refresh_token: &str)
        -> HandlerResult<AuthInfo>;

    async fn get_auth_info_by_id(&self, auth_id: &str) -> HandlerResult<AuthInfo>;

    /// Consumes the authorization code. The state effect is idempotent;
    /// a handler may report a second mark as `Denied`, which the
    /// authorization-code flow treats as a replay.
    async fn mark_auth_info_used(&self, auth_info: &AuthInfo) -> HandlerResult<()>;

    /// Issues (or re-issues) the access token for an authorization.
    /// Refresh-token rotation policy lives here: the returned token's
    /// `refresh_token` field carries whatever the policy produced.
    async fn create_or_update_access_token(
        &self,
        auth_info: &AuthInfo,
    ) -> HandlerResult<AccessToken>;

    async fn get_access_token(&self, token: &str) -> HandlerResult<AccessToken>;

    /// Whether the client may request the given scope.
    async fn validate_scope(&self, client_id: &str, scope: Option<&str>) -> HandlerResult<()>;

    /// Whether the redirect URI is registered for the client. Unknown
    /// clients are `NotFound`.
    async fn validate_redirect_uri(&self, client_id: &str, redirect_uri: &str)
        -> HandlerResult<()>;

    /// Mints a pending device grant for the issuance phase.
    async fn create_device_grant(
        &self,
        client_id: &str,
        scope: Option<&str>,
    ) -> HandlerResult<DeviceGrant>;

    async fn get_device_grant(&self, device_code: &str) -> HandlerResult<DeviceGrant>;

    /// Stamps the poll instant used for `slow_down` pacing.
    async fn record_device_poll(
        &self,
        device_code: &str,
        now: DateTime<Utc>,
    ) -> HandlerResult<()>;
}
