//! The token endpoint: classify the request, run the matching flow, render
//! the outcome in the negotiated format.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::formatter::ResponseFormat;
use crate::server::data_handler::DataHandler;
use crate::server::flows::{DeviceCodeFlow, FlowRegistry};
use crate::server::params;
use crate::types::{ErrorResponse, GrantType, OAuthError};
use crate::web::{Method, OAuthRequest, OAuthResponse, StatusCode};

/// Token endpoint dispatcher, configured with the builder idiom.
pub struct TokenEndpoint {
    handler: Arc<dyn DataHandler>,
    registry: FlowRegistry,
    default_format: ResponseFormat,
    realm: String,
}

impl TokenEndpoint {
    pub fn new(handler: Arc<dyn DataHandler>) -> Self {
        TokenEndpoint {
            handler,
            registry: FlowRegistry::standard(),
            default_format: ResponseFormat::Json,
            realm: "oauth".to_string(),
        }
    }

    /// Realm advertised on `WWW-Authenticate: Basic` challenges.
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    /// Format used when the request names none.
    pub fn default_format(mut self, format: ResponseFormat) -> Self {
        self.default_format = format;
        self
    }

    /// Replaces the flow registry wholesale.
    pub fn registry(mut self, registry: FlowRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Verification URI advertised by the device issuance flow.
    pub fn verification_uri(mut self, uri: impl Into<String>) -> Self {
        self.registry
            .register(Arc::new(DeviceCodeFlow::with_verification_uri(uri)));
        self
    }

    pub async fn handle(&self, request: &OAuthRequest) -> OAuthResponse {
        self.handle_at(request, Utc::now()).await
    }

    /// Handles a token request against the given `now`; every expiry in the
    /// request's lifetime compares to this one instant.
    pub async fn handle_at(&self, request: &OAuthRequest, now: DateTime<Utc>) -> OAuthResponse {
        if request.method != Method::POST {
            return OAuthResponse::new(StatusCode::METHOD_NOT_ALLOWED).with_header("Allow", "POST");
        }
        let basic_credentials = request
            .header_value("authorization")
            .and_then(|v| v.get(..6))
            .map(|scheme| scheme.eq_ignore_ascii_case("basic "))
            .unwrap_or(false);

        let token_request = match params::extract_token_request(request) {
            Ok(token_request) => token_request,
            Err(error) => return self.error_response(error, self.default_format, basic_credentials),
        };
        let format = match token_request.param("format") {
            None => self.default_format,
            Some(raw) => match raw.parse::<ResponseFormat>() {
                Ok(format) => format,
                Err(_) => {
                    return self.error_response(
                        OAuthError::InvalidRequest,
                        self.default_format,
                        basic_credentials,
                    )
                }
            },
        };

        let grant_type = match token_request.param("grant_type") {
            None => return self.error_response(OAuthError::InvalidRequest, format, basic_credentials),
            Some(raw) => match raw.parse::<GrantType>() {
                Ok(grant_type) => grant_type,
                Err(_) => {
                    return self.error_response(
                        OAuthError::UnsupportedGrantType,
                        format,
                        basic_credentials,
                    )
                }
            },
        };
        let flow = match self.registry.get(grant_type) {
            Some(flow) => flow,
            None => {
                return self.error_response(
                    OAuthError::UnsupportedGrantType,
                    format,
                    basic_credentials,
                )
            }
        };

        match flow.handle(&token_request, self.handler.as_ref(), now).await {
            Ok(grant) => {
                debug!(grant_type = %grant_type, "token request granted");
                OAuthResponse::new(StatusCode::OK)
                    .with_header("Cache-Control", "no-store")
                    .with_header("Pragma", "no-cache")
                    .with_body(format.content_type(), format.render(&grant.to_value()))
            }
            Err(error) => self.error_response(error, format, basic_credentials),
        }
    }

    fn error_response(
        &self,
        error: OAuthError,
        format: ResponseFormat,
        basic_credentials: bool,
    ) -> OAuthResponse {
        warn!(error_code = error.code(), "token request rejected");
        let status = match error {
            OAuthError::InvalidClient if basic_credentials => StatusCode::UNAUTHORIZED,
            OAuthError::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        let body = serde_json::to_value(ErrorResponse::of(error)).unwrap_or_default();
        let mut response =
            OAuthResponse::new(status).with_body(format.content_type(), format.render(&body));
        if status == StatusCode::UNAUTHORIZED {
            response = response.with_header(
                "WWW-Authenticate",
                format!("Basic realm=\"{}\"", self.realm),
            );
        }
        response
    }
}
