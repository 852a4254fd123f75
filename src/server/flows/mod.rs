//! Grant-type flows and the registry that dispatches them.
//!
//! Each flow is a small state machine over the Data Handler. The shared
//! guard order is fixed: parameter shape, client authentication, grant-type
//! authorization, scope, then grant material — stopping at the first
//! failure. No partial token is ever emitted.

pub mod authorization_code;
pub mod client_credentials;
pub mod device;
pub mod password;
pub mod refresh_token;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::server::data_handler::{DataHandler, HandlerError};
use crate::server::params::TokenRequest;
use crate::types::{Client, DeviceCodeResponse, GrantType, OAuthError, TokenResponse};

pub use authorization_code::AuthorizationCodeFlow;
pub use client_credentials::ClientCredentialsFlow;
pub use device::{DeviceCodeFlow, DeviceTokenFlow};
pub use password::PasswordFlow;
pub use refresh_token::RefreshTokenFlow;

/// What a flow hands back to the dispatcher for rendering.
#[derive(Debug, Clone)]
pub enum TokenGrant {
    Tokens(TokenResponse),
    DeviceAuthorization(DeviceCodeResponse),
}

impl TokenGrant {
    /// Flat interchange value for the response formatter.
    pub fn to_value(&self) -> Value {
        match self {
            TokenGrant::Tokens(tokens) => serde_json::to_value(tokens),
            TokenGrant::DeviceAuthorization(device) => serde_json::to_value(device),
        }
        .unwrap_or_default()
    }
}

/// One grant type's state machine.
#[async_trait]
pub trait GrantFlow: Send + Sync + 'static {
    fn grant_type(&self) -> GrantType;

    /// Runs the flow against a single `now` sampled at request entry.
    async fn handle(
        &self,
        request: &TokenRequest,
        handler: &dyn DataHandler,
        now: DateTime<Utc>,
    ) -> Result<TokenGrant, OAuthError>;
}

/// Maps `grant_type` values to flows. New grant types are added by
/// registering, never by scanning.
#[derive(Clone)]
pub struct FlowRegistry {
    flows: HashMap<GrantType, Arc<dyn GrantFlow>>,
}

impl FlowRegistry {
    pub fn empty() -> Self {
        FlowRegistry {
            flows: HashMap::new(),
        }
    }

    /// All built-in flows.
    pub fn standard() -> Self {
        let mut registry = FlowRegistry::empty();
        registry.register(Arc::new(ClientCredentialsFlow));
        registry.register(Arc::new(PasswordFlow));
        registry.register(Arc::new(AuthorizationCodeFlow));
        registry.register(Arc::new(RefreshTokenFlow));
        registry.register(Arc::new(DeviceCodeFlow::new()));
        registry.register(Arc::new(DeviceTokenFlow));
        registry
    }

    /// Registers a flow, replacing any previous one for its grant type.
    pub fn register(&mut self, flow: Arc<dyn GrantFlow>) {
        self.flows.insert(flow.grant_type(), flow);
    }

    pub fn get(&self, grant_type: GrantType) -> Option<Arc<dyn GrantFlow>> {
        self.flows.get(&grant_type).cloned()
    }
}

impl Default for FlowRegistry {
    fn default() -> Self {
        FlowRegistry::standard()
    }
}

/// Client authentication plus grant-type authorization, in that order.
pub(crate) async fn authenticate_client(
    request: &TokenRequest,
    handler: &dyn DataHandler,
    grant_type: GrantType,
) -> Result<Client, OAuthError> {
    let (id, secret) = request.client_pair().ok_or(OAuthError::InvalidRequest)?;
    let client = match handler.validate_client(id, secret, grant_type).await {
        Ok(client) => client,
        Err(HandlerError::Backend(_)) => return Err(OAuthError::ServerError),
        Err(_) => return Err(OAuthError::InvalidClient),
    };
    if !client.allows_grant(grant_type) {
        return Err(OAuthError::UnauthorizedClient);
    }
    Ok(client)
}

/// Scope admissibility for the requesting client.
pub(crate) async fn check_scope(
    handler: &dyn DataHandler,
    client_id: &str,
    scope: Option<&str>,
) -> Result<(), OAuthError> {
    handler
        .validate_scope(client_id, scope)
        .await
        .map_err(|e| protocol_error(e, OAuthError::InvalidScope))
}

/// Maps a handler failure: backend faults become `server_error`, the
/// protocol-relevant outcomes become the step's own error code.
pub(crate) fn protocol_error(error: HandlerError, fallback: OAuthError) -> OAuthError {
    match error {
        HandlerError::Backend(_) => OAuthError::ServerError,
        _ => fallback,
    }
}

/// Failure mapping for creation steps, where a refusal is a denial rather
/// than bad grant material.
pub(crate) fn creation_error(error: HandlerError) -> OAuthError {
    match error {
        HandlerError::Denied(_) => OAuthError::AccessDenied,
        _ => OAuthError::ServerError,
    }
}
