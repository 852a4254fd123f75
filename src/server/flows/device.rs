//! Device profile: `device_code` issuance and `device_token` polling.
//!
//! A device first obtains a `device_code`/`user_code` pair, then polls the
//! token endpoint with the device code while the resource owner acts on the
//! user code out of band.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;

use super::{authenticate_client, check_scope, creation_error, protocol_error, GrantFlow, TokenGrant};
use crate::server::data_handler::DataHandler;
use crate::server::params::TokenRequest;
use crate::types::{DeviceCodeResponse, DeviceGrantStatus, GrantType, OAuthError, TokenResponse};

/// Issuance phase (`grant_type=device_code`).
pub struct DeviceCodeFlow {
    verification_uri: Option<String>,
}

impl DeviceCodeFlow {
    pub fn new() -> Self {
        DeviceCodeFlow {
            verification_uri: None,
        }
    }

    /// URI the user is told to visit, advertised in the initial response.
    pub fn with_verification_uri(uri: impl Into<String>) -> Self {
        DeviceCodeFlow {
            verification_uri: Some(uri.into()),
        }
    }
}

impl Default for DeviceCodeFlow {
    fn default() -> Self {
        DeviceCodeFlow::new()
    }
}

#[async_trait]
impl GrantFlow for DeviceCodeFlow {
    fn grant_type(&self) -> GrantType {
        GrantType::DeviceCode
    }

    #[instrument(skip(self, request, handler), level = "debug")]
    async fn handle(
        &self,
        request: &TokenRequest,
        handler: &dyn DataHandler,
        now: DateTime<Utc>,
    ) -> Result<TokenGrant, OAuthError> {
        let client = authenticate_client(request, handler, GrantType::DeviceCode).await?;
        let scope = request.param("scope");
        check_scope(handler, &client.id, scope).await?;

        let grant = handler
            .create_device_grant(&client.id, scope)
            .await
            .map_err(creation_error)?;

        Ok(TokenGrant::DeviceAuthorization(DeviceCodeResponse {
            expires_in: (grant.expires_at - now).num_seconds(),
            interval: grant.interval,
            device_code: grant.device_code,
            user_code: grant.user_code,
            verification_uri: self.verification_uri.clone(),
        }))
    }
}

/// Polling phase (`grant_type=device_token`).
pub struct DeviceTokenFlow;

#[async_trait]
impl GrantFlow for DeviceTokenFlow {
    fn grant_type(&self) -> GrantType {
        GrantType::DeviceToken
    }

    #[instrument(skip(self, request, handler), level = "debug")]
    async fn handle(
        &self,
        request: &TokenRequest,
        handler: &dyn DataHandler,
        now: DateTime<Utc>,
    ) -> Result<TokenGrant, OAuthError> {
        let device_code = request.require("device_code")?.to_string();
        let client = authenticate_client(request, handler, GrantType::DeviceToken).await?;

        let grant = handler
            .get_device_grant(&device_code)
            .await
            .map_err(|e| protocol_error(e, OAuthError::InvalidGrant))?;
        if grant.client_id != client.id {
            return Err(OAuthError::InvalidGrant);
        }
        if grant.expires_at <= now {
            return Err(OAuthError::ExpiredToken);
        }

        // Stamp this poll; pacing compares against the previous one.
        handler
            .record_device_poll(&device_code, now)
            .await
            .map_err(|e| protocol_error(e, OAuthError::InvalidGrant))?;

        match grant.status {
            DeviceGrantStatus::Denied => Err(OAuthError::AccessDenied),
            DeviceGrantStatus::Pending => {
                if let Some(last) = grant.last_polled_at {
                    if (now - last).num_seconds() < grant.interval {
                        return Err(OAuthError::SlowDown);
                    }
                }
                Err(OAuthError::AuthorizationPending)
            }
            DeviceGrantStatus::Approved { user_id } => {
                let auth_info = handler
                    .create_or_update_auth_info(
                        &client.id,
                        Some(&user_id),
                        grant.scope.as_deref(),
                        None,
                    )
                    .await
                    .map_err(creation_error)?;
                let access_token = handler
                    .create_or_update_access_token(&auth_info)
                    .await
                    .map_err(creation_error)?;

                let mut response =
                    TokenResponse::bearer(access_token.token, access_token.expires_in);
                response.refresh_token = access_token.refresh_token;
                response.scope = auth_info.scope;
                Ok(TokenGrant::Tokens(response))
            }
        }
    }
}
