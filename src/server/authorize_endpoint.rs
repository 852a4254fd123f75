//! The end-user authorization endpoint.
//!
//! The consent page itself is host UI; this endpoint owns the contract
//! around it: validating the inbound request into an [`AuthorizeRequest`]
//! the host renders from, and turning the owner's decision into the
//! protocol redirect. Errors redirect only once the redirect URI has been
//! validated; everything before that is answered directly.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use url::form_urlencoded;
use url::Url;

use crate::formatter::ResponseFormat;
use crate::server::data_handler::{DataHandler, HandlerError};
use crate::server::params;
use crate::types::{ErrorResponse, OAuthError};
use crate::web::{OAuthRequest, OAuthResponse, StatusCode};

/// `response_type` values of the end-user endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// Authorization-code (web server) flow.
    Code,
    /// User-agent (implicit) flow; tokens travel in the fragment.
    Token,
}

impl FromStr for ResponseType {
    type Err = OAuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(ResponseType::Code),
            "token" => Ok(ResponseType::Token),
            _ => Err(OAuthError::UnsupportedResponseType),
        }
    }
}

/// A validated authorization request, ready for the host's consent UI.
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: ResponseType,
    pub scope: Option<String>,
    pub state: Option<String>,
}

/// The resource owner's answer, as established by the host.
#[derive(Debug, Clone)]
pub enum AuthorizeDecision {
    Approved { user_id: String },
    Denied,
}

/// How a rejected authorization request is answered.
#[derive(Debug)]
pub enum AuthorizeError {
    /// No trustworthy redirect URI yet; answer the user agent directly.
    Direct(OAuthError),
    /// Redirect URI validated; carry the error back to the client.
    Redirect(String),
}

impl AuthorizeError {
    pub fn into_response(self) -> OAuthResponse {
        match self {
            AuthorizeError::Redirect(location) => OAuthResponse::redirect(location),
            AuthorizeError::Direct(error) => {
                let status = match error {
                    OAuthError::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
                    _ => StatusCode::BAD_REQUEST,
                };
                let body = serde_json::to_value(ErrorResponse::of(error)).unwrap_or_default();
                OAuthResponse::new(status).with_body(
                    ResponseFormat::Json.content_type(),
                    ResponseFormat::Json.render(&body),
                )
            }
        }
    }
}

pub struct AuthorizeEndpoint {
    handler: Arc<dyn DataHandler>,
}

impl AuthorizeEndpoint {
    pub fn new(handler: Arc<dyn DataHandler>) -> Self {
        AuthorizeEndpoint { handler }
    }

    /// Validates an inbound GET (display) or POST (consent submission)
    /// request. The returned value is what the host renders consent from
    /// and later passes to [`complete_at`](Self::complete_at).
    pub async fn handle_request(
        &self,
        request: &OAuthRequest,
    ) -> Result<AuthorizeRequest, AuthorizeError> {
        let request_params = params::merged_params(request)
            .map_err(AuthorizeError::Direct)?;
        let param = |name: &str| request_params.get(name).map(String::as_str);

        let client_id = param("client_id")
            .ok_or(AuthorizeError::Direct(OAuthError::InvalidRequest))?
            .to_string();
        let redirect_uri = param("redirect_uri")
            .ok_or(AuthorizeError::Direct(OAuthError::InvalidRequest))?
            .to_string();

        // The redirect URI check doubles as the client-existence check;
        // until it passes, no error may travel by redirect.
        match self
            .handler
            .validate_redirect_uri(&client_id, &redirect_uri)
            .await
        {
            Ok(()) => {}
            Err(HandlerError::NotFound) => {
                warn!(client_id = %client_id, "authorization request for unknown client");
                return Err(AuthorizeError::Direct(OAuthError::InvalidClient));
            }
            Err(HandlerError::Denied(_)) => {
                warn!(client_id = %client_id, "redirect URI not registered");
                return Err(AuthorizeError::Direct(OAuthError::RedirectUriMismatch));
            }
            Err(HandlerError::Backend(_)) => {
                return Err(AuthorizeError::Direct(OAuthError::ServerError));
            }
        }
        if Url::parse(&redirect_uri).is_err() {
            return Err(AuthorizeError::Direct(OAuthError::InvalidRequest));
        }

        let state = param("state").map(str::to_string);
        let response_type = match param("response_type") {
            None => {
                return Err(self.redirect_error(
                    &redirect_uri,
                    ResponseType::Code,
                    OAuthError::InvalidRequest,
                    state.as_deref(),
                ))
            }
            Some(raw) => match raw.parse::<ResponseType>() {
                Ok(response_type) => response_type,
                Err(error) => {
                    return Err(self.redirect_error(
                        &redirect_uri,
                        ResponseType::Code,
                        error,
                        state.as_deref(),
                    ))
                }
            },
        };

        let scope = param("scope").map(str::to_string);
        match self.handler.validate_scope(&client_id, scope.as_deref()).await {
            Ok(()) => {}
            Err(HandlerError::Backend(_)) => {
                return Err(AuthorizeError::Direct(OAuthError::ServerError))
            }
            Err(_) => {
                return Err(self.redirect_error(
                    &redirect_uri,
                    response_type,
                    OAuthError::InvalidScope,
                    state.as_deref(),
                ))
            }
        }

        Ok(AuthorizeRequest {
            client_id,
            redirect_uri,
            response_type,
            scope,
            state,
        })
    }

    pub async fn complete(
        &self,
        authorize_request: &AuthorizeRequest,
        decision: AuthorizeDecision,
    ) -> OAuthResponse {
        self.complete_at(authorize_request, decision, Utc::now())
            .await
    }

    /// Turns the owner's decision into the protocol redirect: a minted code
    /// in the query, an access token in the fragment, or `access_denied`.
    /// `state` is echoed verbatim.
    pub async fn complete_at(
        &self,
        authorize_request: &AuthorizeRequest,
        decision: AuthorizeDecision,
        _now: DateTime<Utc>,
    ) -> OAuthResponse {
        let user_id = match decision {
            AuthorizeDecision::Approved { user_id } => user_id,
            AuthorizeDecision::Denied => {
                debug!(client_id = %authorize_request.client_id, "authorization denied by owner");
                return self
                    .redirect_error(
                        &authorize_request.redirect_uri,
                        authorize_request.response_type,
                        OAuthError::AccessDenied,
                        authorize_request.state.as_deref(),
                    )
                    .into_response();
            }
        };

        let auth_info = match self
            .handler
            .create_or_update_auth_info(
                &authorize_request.client_id,
                Some(&user_id),
                authorize_request.scope.as_deref(),
                Some(&authorize_request.redirect_uri),
            )
            .await
        {
            Ok(auth_info) => auth_info,
            Err(_) => return AuthorizeError::Direct(OAuthError::ServerError).into_response(),
        };

        match authorize_request.response_type {
            ResponseType::Code => {
                let code = match auth_info.code {
                    Some(code) => code,
                    None => return AuthorizeError::Direct(OAuthError::ServerError).into_response(),
                };
                let mut pairs = vec![("code".to_string(), code)];
                if let Some(state) = &authorize_request.state {
                    pairs.push(("state".to_string(), state.clone()));
                }
                match query_redirect(&authorize_request.redirect_uri, &pairs) {
                    Some(location) => OAuthResponse::redirect(location),
                    None => AuthorizeError::Direct(OAuthError::ServerError).into_response(),
                }
            }
            ResponseType::Token => {
                let access_token = match self
                    .handler
                    .create_or_update_access_token(&auth_info)
                    .await
                {
                    Ok(access_token) => access_token,
                    Err(_) => {
                        return AuthorizeError::Direct(OAuthError::ServerError).into_response()
                    }
                };
                let mut pairs = vec![
                    ("access_token".to_string(), access_token.token),
                    ("token_type".to_string(), "Bearer".to_string()),
                    (
                        "expires_in".to_string(),
                        access_token.expires_in.to_string(),
                    ),
                ];
                if let Some(scope) = &auth_info.scope {
                    pairs.push(("scope".to_string(), scope.clone()));
                }
                if let Some(state) = &authorize_request.state {
                    pairs.push(("state".to_string(), state.clone()));
                }
                OAuthResponse::redirect(fragment_redirect(
                    &authorize_request.redirect_uri,
                    &pairs,
                ))
            }
        }
    }

    fn redirect_error(
        &self,
        redirect_uri: &str,
        response_type: ResponseType,
        error: OAuthError,
        state: Option<&str>,
    ) -> AuthorizeError {
        let mut pairs = vec![("error".to_string(), error.code().to_string())];
        if let Some(state) = state {
            pairs.push(("state".to_string(), state.to_string()));
        }
        let location = match response_type {
            ResponseType::Code => query_redirect(redirect_uri, &pairs),
            ResponseType::Token => Some(fragment_redirect(redirect_uri, &pairs)),
        };
        match location {
            Some(location) => AuthorizeError::Redirect(location),
            None => AuthorizeError::Direct(OAuthError::InvalidRequest),
        }
    }
}

fn query_redirect(redirect_uri: &str, pairs: &[(String, String)]) -> Option<String> {
    let mut url = Url::parse(redirect_uri).ok()?;
    {
        let mut query = url.query_pairs_mut();
        for (name, value) in pairs {
            query.append_pair(name, value);
        }
    }
    Some(url.to_string())
}

fn fragment_redirect(redirect_uri: &str, pairs: &[(String, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, value) in pairs {
        serializer.append_pair(name, value);
    }
    format!("{}#{}", redirect_uri, serializer.finish())
}
