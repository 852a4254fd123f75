//! OAuth2 client: authorize-URL construction and token-endpoint exchanges.

pub mod http_client;

use std::fmt;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::Method;
use serde_json::Value;
use tracing::instrument;
use url::form_urlencoded;
use uuid::Uuid;

use crate::types::{DeviceCodeResponse, ErrorResponse, TokenResponse};
use self::http_client::{HttpRequest, HttpResponse, OAuthHttpClient, RedirectPolicy};

/// Client-side failures, with transport faults kept apart from protocol
/// errors the server deliberately returned.
#[derive(Debug)]
pub enum ClientError {
    /// The server answered with an OAuth error body.
    Protocol(ErrorResponse),
    /// The exchange never completed.
    Transport(String),
    /// The server answered, but not in the shape of the protocol.
    UnexpectedResponse(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Protocol(response) => write!(f, "oauth error: {}", response.error),
            ClientError::Transport(detail) => write!(f, "transport failure: {detail}"),
            ClientError::UnexpectedResponse(detail) => {
                write!(f, "unexpected response: {detail}")
            }
        }
    }
}

impl std::error::Error for ClientError {}

/// The most recent HTTP exchange, for diagnostics only. The response is
/// absent when the transport failed.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub request: HttpRequest,
    pub response: Option<HttpResponse>,
}

/// OAuth2 client bound to one authorization server and one client identity.
#[derive(Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub authorize_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    state: String,
    last_exchange: Arc<Mutex<Option<Exchange>>>,
}

impl OAuthClient {
    /// Creates a new client, minting a random `state` value.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: Option<impl Into<String>>,
        authorize_url: impl Into<String>,
        token_url: impl Into<String>,
        scopes: impl IntoIterator<Item = String>,
    ) -> Self {
        OAuthClient {
            client_id: client_id.into(),
            client_secret: client_secret.map(Into::into),
            authorize_url: authorize_url.into(),
            token_url: token_url.into(),
            scopes: scopes.into_iter().collect(),
            state: Uuid::new_v4().to_string(),
            last_exchange: Arc::new(Mutex::new(None)),
        }
    }

    /// Overrides the minted `state`, for hosts that manage their own.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// The most recent request/response pair, if any exchange has run.
    pub fn last_exchange(&self) -> Option<Exchange> {
        match self.last_exchange.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Constructs the authorization URL for the code flow.
    pub fn get_authorize_url(&self, redirect_uri: &str) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        serializer
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri);
        if !self.scopes.is_empty() {
            serializer.append_pair("scope", &self.scopes.join(" "));
        }
        serializer.append_pair("state", &self.state);
        format!("{}?{}", self.authorize_url, serializer.finish())
    }

    /// Exchanges an authorization code for tokens.
    #[instrument(skip(self, http_client), level = "debug")]
    pub async fn exchange_code<C: OAuthHttpClient>(
        &self,
        http_client: &C,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, ClientError> {
        let mut form = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", redirect_uri.to_string()),
            ("client_id", self.client_id.clone()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.clone()));
        }
        self.token_exchange(http_client, form, false).await
    }

    /// Client-credentials grant; credentials travel as HTTP Basic.
    #[instrument(skip(self, http_client), level = "debug")]
    pub async fn client_credentials<C: OAuthHttpClient>(
        &self,
        http_client: &C,
    ) -> Result<TokenResponse, ClientError> {
        let mut form = vec![("grant_type", "client_credentials".to_string())];
        if !self.scopes.is_empty() {
            form.push(("scope", self.scopes.join(" ")));
        }
        self.token_exchange(http_client, form, true).await
    }

    /// Resource-owner password grant.
    #[instrument(skip(self, http_client, password), level = "debug")]
    pub async fn password<C: OAuthHttpClient>(
        &self,
        http_client: &C,
        username: &str,
        password: &str,
    ) -> Result<TokenResponse, ClientError> {
        let mut form = vec![
            ("grant_type", "password".to_string()),
            ("username", username.to_string()),
            ("password", password.to_string()),
            ("client_id", self.client_id.clone()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.clone()));
        }
        if !self.scopes.is_empty() {
            form.push(("scope", self.scopes.join(" ")));
        }
        self.token_exchange(http_client, form, false).await
    }

    /// Exchanges a refresh token for a new access token.
    #[instrument(skip(self, http_client), level = "debug")]
    pub async fn refresh<C: OAuthHttpClient>(
        &self,
        http_client: &C,
        refresh_token: &str,
        scope: Option<&str>,
    ) -> Result<TokenResponse, ClientError> {
        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
            ("client_id", self.client_id.clone()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.clone()));
        }
        if let Some(scope) = scope {
            form.push(("scope", scope.to_string()));
        }
        self.token_exchange(http_client, form, false).await
    }

    /// Device-profile issuance: obtains a device/user code pair.
    #[instrument(skip(self, http_client), level = "debug")]
    pub async fn request_device_code<C: OAuthHttpClient>(
        &self,
        http_client: &C,
    ) -> Result<DeviceCodeResponse, ClientError> {
        let mut form = vec![
            ("grant_type", "device_code".to_string()),
            ("client_id", self.client_id.clone()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.clone()));
        }
        if !self.scopes.is_empty() {
            form.push(("scope", self.scopes.join(" ")));
        }
        let body = self.execute_form(http_client, form, false).await?;
        serde_json::from_value(body)
            .map_err(|e| ClientError::UnexpectedResponse(e.to_string()))
    }

    /// Device-profile polling; `authorization_pending` and `slow_down`
    /// surface as [`ClientError::Protocol`] for the caller's pacing loop.
    #[instrument(skip(self, http_client), level = "debug")]
    pub async fn poll_device<C: OAuthHttpClient>(
        &self,
        http_client: &C,
        device_code: &str,
    ) -> Result<TokenResponse, ClientError> {
        let mut form = vec![
            ("grant_type", "device_token".to_string()),
            ("device_code", device_code.to_string()),
            ("client_id", self.client_id.clone()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.clone()));
        }
        self.token_exchange(http_client, form, false).await
    }

    async fn token_exchange<C: OAuthHttpClient>(
        &self,
        http_client: &C,
        form: Vec<(&str, String)>,
        basic: bool,
    ) -> Result<TokenResponse, ClientError> {
        let body = self.execute_form(http_client, form, basic).await?;
        TokenResponse::from_value(&body)
            .ok_or_else(|| ClientError::UnexpectedResponse("missing token fields".to_string()))
    }

    async fn execute_form<C: OAuthHttpClient>(
        &self,
        http_client: &C,
        form: Vec<(&str, String)>,
        basic: bool,
    ) -> Result<Value, ClientError> {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (name, value) in &form {
            serializer.append_pair(name, value);
        }
        let body = serializer.finish().into_bytes();

        let mut headers = vec![(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        )];
        if basic {
            let secret = self.client_secret.as_deref().unwrap_or("");
            let credentials = format!("{}:{}", self.client_id, secret);
            headers.push((
                "Authorization".to_string(),
                format!("Basic {}", STANDARD.encode(credentials.as_bytes())),
            ));
        }

        let request = HttpRequest {
            method: Method::POST,
            url: self.token_url.clone(),
            headers,
            body: Some(body),
            timeout: None,
            redirect_policy: RedirectPolicy::None,
        };
        self.record_exchange(request.clone(), None);

        let response = http_client
            .execute(request.clone())
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        self.record_exchange(request, Some(response.clone()));

        if response.status == 200 {
            serde_json::from_slice(&response.body)
                .map_err(|e| ClientError::UnexpectedResponse(e.to_string()))
        } else {
            match serde_json::from_slice::<ErrorResponse>(&response.body) {
                Ok(error) => Err(ClientError::Protocol(error)),
                Err(_) => Err(ClientError::UnexpectedResponse(format!(
                    "status {}",
                    response.status
                ))),
            }
        }
    }

    fn record_exchange(&self, request: HttpRequest, response: Option<HttpResponse>) {
        let mut guard = match self.last_exchange.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(Exchange { request, response });
    }
}
