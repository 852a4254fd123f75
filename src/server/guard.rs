//! Bearer-token admission control at the resource-server boundary.
//!
//! A token may travel in the `Authorization` header, a form body, or the
//! query string; more than one carrier is a conflict answered before the
//! Data Handler is ever consulted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::server::data_handler::{DataHandler, HandlerError};
use crate::server::params::{self, AuthorizationHeader};
use crate::types::{AccessToken, AuthInfo, ErrorResponse, OAuthError, Scope};
use crate::web::{OAuthRequest, OAuthResponse, StatusCode};

const TOKEN_PARAMS: [&str; 2] = ["oauth_token", "access_token"];

/// What an admitted request gets attached to its context.
#[derive(Debug, Clone)]
pub struct GuardedAccess {
    pub access_token: AccessToken,
    pub auth_info: AuthInfo,
}

/// A rejection, renderable as the protocol challenge response.
#[derive(Debug)]
pub struct GuardRejection {
    error: OAuthError,
    status: StatusCode,
    realm: String,
    scope: Option<String>,
}

impl GuardRejection {
    pub fn error(&self) -> OAuthError {
        self.error
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn into_response(self) -> OAuthResponse {
        let body = serde_json::to_vec(&ErrorResponse::of(self.error)).unwrap_or_default();
        let mut response = OAuthResponse::new(self.status).with_body("application/json", body);
        if self.status != StatusCode::INTERNAL_SERVER_ERROR {
            let mut challenge = format!(
                "Bearer realm=\"{}\", error=\"{}\", error_description=\"{}\"",
                self.realm,
                self.error.code(),
                self.error.description()
            );
            if let Some(scope) = &self.scope {
                challenge.push_str(&format!(", scope=\"{scope}\""));
            }
            response = response.with_header("WWW-Authenticate", challenge);
        }
        response
    }
}

/// Middleware-shaped guard for protected resources.
pub struct ResourceGuard {
    handler: Arc<dyn DataHandler>,
    realm: String,
    optional: bool,
    required_scope: Option<String>,
}

impl ResourceGuard {
    pub fn new(handler: Arc<dyn DataHandler>) -> Self {
        ResourceGuard {
            handler,
            realm: "oauth".to_string(),
            optional: false,
            required_scope: None,
        }
    }

    /// Realm advertised on challenges.
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    /// Admit requests that carry no bearer material at all.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Scope the token must cover, space-delimited.
    pub fn require_scope(mut self, scope: impl Into<String>) -> Self {
        self.required_scope = Some(scope.into());
        self
    }

    pub async fn authenticate(
        &self,
        request: &OAuthRequest,
    ) -> Result<Option<GuardedAccess>, GuardRejection> {
        self.authenticate_at(request, Utc::now()).await
    }

    /// Admits or rejects a request against the given `now`.
    pub async fn authenticate_at(
        &self,
        request: &OAuthRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<GuardedAccess>, GuardRejection> {
        let token = match extract_bearer(request) {
            Ok(token) => token,
            Err(error) => return Err(self.reject(error, StatusCode::BAD_REQUEST)),
        };
        let token = match token {
            Some(token) => token,
            None if self.optional => return Ok(None),
            None => {
                return Err(self.reject(OAuthError::InvalidRequest, StatusCode::UNAUTHORIZED))
            }
        };

        let access_token = match self.handler.get_access_token(&token).await {
            Ok(access_token) => access_token,
            Err(HandlerError::Backend(_)) => {
                return Err(self.reject(OAuthError::ServerError, StatusCode::INTERNAL_SERVER_ERROR))
            }
            Err(_) => return Err(self.reject(OAuthError::InvalidToken, StatusCode::UNAUTHORIZED)),
        };
        if access_token.is_expired_at(now) {
            warn!("expired bearer token presented");
            return Err(self.reject(OAuthError::InvalidToken, StatusCode::UNAUTHORIZED));
        }

        let auth_info = match self.handler.get_auth_info_by_id(&access_token.auth_id).await {
            Ok(auth_info) => auth_info,
            Err(HandlerError::Backend(_)) => {
                return Err(self.reject(OAuthError::ServerError, StatusCode::INTERNAL_SERVER_ERROR))
            }
            Err(_) => return Err(self.reject(OAuthError::InvalidToken, StatusCode::UNAUTHORIZED)),
        };

        if let Some(required) = &self.required_scope {
            let granted = Scope::parse(auth_info.scope.as_deref().unwrap_or(""));
            if !Scope::parse(required).is_subset(&granted) {
                return Err(self.reject(OAuthError::InsufficientScope, StatusCode::FORBIDDEN));
            }
        }

        debug!(client_id = %auth_info.client_id, "bearer token accepted");
        Ok(Some(GuardedAccess {
            access_token,
            auth_info,
        }))
    }

    fn reject(&self, error: OAuthError, status: StatusCode) -> GuardRejection {
        GuardRejection {
            error,
            status,
            realm: self.realm.clone(),
            scope: match error {
                OAuthError::InsufficientScope => self.required_scope.clone(),
                _ => None,
            },
        }
    }
}

/// Pulls the bearer token out of the request, enforcing the one-carrier
/// rule across header, form body, and query string.
fn extract_bearer(request: &OAuthRequest) -> Result<Option<String>, OAuthError> {
    let header = match params::parse_authorization(request)? {
        Some(AuthorizationHeader::Bearer(token)) => Some(token),
        // Basic credentials are not bearer material at a resource server.
        _ => None,
    };
    let body = if request.has_form_body() {
        carrier_token(&request.body)?
    } else {
        None
    };
    let query = carrier_token(&request.query)?;

    let mut carriers = [header, body, query].into_iter().flatten();
    let token = carriers.next();
    if carriers.next().is_some() {
        return Err(OAuthError::InvalidRequest);
    }
    Ok(token)
}

/// At most one token parameter per carrier; `oauth_token` next to
/// `access_token`, or differing repeats, are a conflict.
fn carrier_token(pairs: &[(String, String)]) -> Result<Option<String>, OAuthError> {
    let mut found: Option<(&str, &str)> = None;
    for (name, value) in pairs {
        if TOKEN_PARAMS.contains(&name.as_str()) {
            match found {
                Some((prev_name, prev_value)) => {
                    if prev_name != name || prev_value != value {
                        return Err(OAuthError::InvalidRequest);
                    }
                }
                None => found = Some((name, value)),
            }
        }
    }
    Ok(found.map(|(_, value)| value.to_string()))
}
