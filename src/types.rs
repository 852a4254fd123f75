//! Core data model: clients, grants, tokens, and the protocol error set.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Represents an OAuth 2.0 client application.
#[derive(Debug, Clone)]
pub struct Client {
    /// Client identifier.
    pub id: String,
    /// Client secret, compared in constant time by handlers.
    pub secret: String,
    /// Allowed redirect URIs; empty means unrestricted.
    pub redirect_uris: Vec<String>,
    /// Grant types this client may use; empty means all.
    pub grant_types: HashSet<GrantType>,
}

impl Client {
    /// Whether the client may use the given grant type. The device polling
    /// grant rides on the device-code authorization.
    pub fn allows_grant(&self, grant_type: GrantType) -> bool {
        let effective = match grant_type {
            GrantType::DeviceToken => GrantType::DeviceCode,
            other => other,
        };
        self.grant_types.is_empty() || self.grant_types.contains(&effective)
    }

    /// Whether the redirect URI is acceptable under the client's whitelist.
    pub fn allows_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.is_empty() || self.redirect_uris.iter().any(|u| u == uri)
    }
}

/// Grant types the token endpoint dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantType {
    ClientCredentials,
    Password,
    AuthorizationCode,
    RefreshToken,
    /// Device-profile issuance phase.
    DeviceCode,
    /// Device-profile polling phase.
    DeviceToken,
}

impl GrantType {
    pub fn as_str(self) -> &'static str {
        match self {
            GrantType::ClientCredentials => "client_credentials",
            GrantType::Password => "password",
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
            GrantType::DeviceCode => "device_code",
            GrantType::DeviceToken => "device_token",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = UnknownGrantType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client_credentials" => Ok(GrantType::ClientCredentials),
            "password" => Ok(GrantType::Password),
            "authorization_code" => Ok(GrantType::AuthorizationCode),
            "refresh_token" => Ok(GrantType::RefreshToken),
            "device_code" => Ok(GrantType::DeviceCode),
            "device_token" => Ok(GrantType::DeviceToken),
            other => Err(UnknownGrantType(other.to_string())),
        }
    }
}

/// Error for grant-type strings outside the registry vocabulary.
#[derive(Debug)]
pub struct UnknownGrantType(pub String);

impl fmt::Display for UnknownGrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown grant type `{}`", self.0)
    }
}

impl std::error::Error for UnknownGrantType {}

/// A resource owner's authorization of a client, as persisted by the host.
///
/// Created at the end-user endpoint (or directly by a flow for grants with
/// no interactive step) and exchanged for tokens. The `code` and
/// `refresh_token` strings are minted by the Data Handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthInfo {
    /// Stable identifier of this authorization.
    pub id: String,
    /// The client the authorization was issued to.
    pub client_id: String,
    /// Resource owner, absent for client-credentials grants.
    pub user_id: Option<String>,
    /// Granted scope, space-delimited.
    pub scope: Option<String>,
    /// Redirect URI the authorization was issued against.
    pub redirect_uri: Option<String>,
    /// Single-use authorization code, when one was minted.
    pub code: Option<String>,
    /// Expiry of the authorization code.
    pub code_expires_at: Option<DateTime<Utc>>,
    /// Whether the code has been consumed.
    pub used: bool,
    /// Long-lived refresh token bound to this authorization.
    pub refresh_token: Option<String>,
}

/// An issued access token. Immutable after issuance; revocation is deletion
/// in the host store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    /// Opaque bearer string.
    pub token: String,
    /// The authorization this token was issued under.
    pub auth_id: String,
    /// Issuance instant.
    pub created_at: DateTime<Utc>,
    /// Lifetime in seconds.
    pub expires_in: i64,
    /// Refresh token associated by the handler's issuance policy.
    pub refresh_token: Option<String>,
}

impl AccessToken {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::seconds(self.expires_in)
    }

    /// Expiry relative to the single `now` sampled at request entry.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }
}

/// State of a device-profile grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceGrantStatus {
    /// Waiting for the resource owner to act on the user code.
    Pending,
    Approved { user_id: String },
    Denied,
}

/// A pending device-profile authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceGrant {
    pub device_code: String,
    /// Short code the resource owner enters out of band.
    pub user_code: String,
    pub client_id: String,
    pub scope: Option<String>,
    /// Minimum polling interval in seconds.
    pub interval: i64,
    pub expires_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub status: DeviceGrantStatus,
}

/// A space-delimited scope string with set semantics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scope(BTreeSet<String>);

impl Scope {
    pub fn parse(raw: &str) -> Self {
        Scope(
            raw.split_ascii_whitespace()
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_subset(&self, other: &Scope) -> bool {
        self.0.is_subset(&other.0)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.0.iter().map(String::as_str).collect();
        f.write_str(&joined.join(" "))
    }
}

/// The token endpoint's success body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Always `Bearer`.
    pub token_type: String,
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    pub fn bearer(access_token: impl Into<String>, expires_in: i64) -> Self {
        TokenResponse {
            token_type: "Bearer".to_string(),
            access_token: access_token.into(),
            expires_in,
            refresh_token: None,
            scope: None,
        }
    }

    /// Reads a token response out of a decoded flat value. Accepts integer
    /// or numeric-string `expires_in` so all wire formats decode alike.
    pub fn from_value(value: &Value) -> Option<Self> {
        let access_token = value.get("access_token")?.as_str()?.to_string();
        let expires_in = scalar_i64(value.get("expires_in")?)?;
        let token_type = value
            .get("token_type")
            .and_then(Value::as_str)
            .unwrap_or("Bearer")
            .to_string();
        Some(TokenResponse {
            token_type,
            access_token,
            expires_in,
            refresh_token: value
                .get("refresh_token")
                .and_then(Value::as_str)
                .map(str::to_string),
            scope: value.get("scope").and_then(Value::as_str).map(str::to_string),
        })
    }
}

fn scalar_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// Initial response of the device-profile issuance phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_uri: Option<String>,
    pub expires_in: i64,
    /// Minimum seconds between polls.
    pub interval: i64,
}

/// Protocol error codes. One closed set; no string introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthError {
    InvalidRequest,
    InvalidClient,
    UnauthorizedClient,
    RedirectUriMismatch,
    AccessDenied,
    UnsupportedResponseType,
    UnsupportedGrantType,
    InvalidScope,
    InvalidGrant,
    InvalidToken,
    InsufficientScope,
    AuthorizationPending,
    SlowDown,
    ExpiredToken,
    ServerError,
}

impl OAuthError {
    /// Wire code.
    pub fn code(self) -> &'static str {
        match self {
            OAuthError::InvalidRequest => "invalid_request",
            OAuthError::InvalidClient => "invalid_client",
            OAuthError::UnauthorizedClient => "unauthorized_client",
            OAuthError::RedirectUriMismatch => "redirect_uri_mismatch",
            OAuthError::AccessDenied => "access_denied",
            OAuthError::UnsupportedResponseType => "unsupported_response_type",
            OAuthError::UnsupportedGrantType => "unsupported_grant_type",
            OAuthError::InvalidScope => "invalid_scope",
            OAuthError::InvalidGrant => "invalid_grant",
            OAuthError::InvalidToken => "invalid_token",
            OAuthError::InsufficientScope => "insufficient_scope",
            OAuthError::AuthorizationPending => "authorization_pending",
            OAuthError::SlowDown => "slow_down",
            OAuthError::ExpiredToken => "expired_token",
            OAuthError::ServerError => "server_error",
        }
    }

    /// Fixed description; never carries internal detail.
    pub fn description(self) -> &'static str {
        match self {
            OAuthError::InvalidRequest => "The request is malformed",
            OAuthError::InvalidClient => "Client authentication failed",
            OAuthError::UnauthorizedClient => "Client not authorized for this grant type",
            OAuthError::RedirectUriMismatch => "Redirect URI is not registered for this client",
            OAuthError::AccessDenied => "The resource owner denied the request",
            OAuthError::UnsupportedResponseType => "Unsupported response type",
            OAuthError::UnsupportedGrantType => "Unsupported grant type",
            OAuthError::InvalidScope => "The requested scope is invalid",
            OAuthError::InvalidGrant => "Invalid grant provided",
            OAuthError::InvalidToken => "The token is invalid or expired",
            OAuthError::InsufficientScope => "Insufficient scope for this request",
            OAuthError::AuthorizationPending => "Authorization is pending user action",
            OAuthError::SlowDown => "Polling too frequently",
            OAuthError::ExpiredToken => "The device code has expired",
            OAuthError::ServerError => "Internal server error",
        }
    }
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl std::error::Error for OAuthError {}

/// The error body rendered by the endpoints and parsed by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: OAuthError,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

impl ErrorResponse {
    pub fn of(error: OAuthError) -> Self {
        ErrorResponse {
            error,
            error_description: Some(error.description().to_string()),
            error_uri: None,
        }
    }
}
