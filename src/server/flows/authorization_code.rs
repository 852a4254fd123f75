//! `authorization_code`: single-use code exchanged for tokens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;

use super::{authenticate_client, creation_error, protocol_error, GrantFlow, TokenGrant};
use crate::server::data_handler::DataHandler;
use crate::server::params::TokenRequest;
use crate::types::{GrantType, OAuthError, TokenResponse};

pub struct AuthorizationCodeFlow;

#[async_trait]
impl GrantFlow for AuthorizationCodeFlow {
    fn grant_type(&self) -> GrantType {
        GrantType::AuthorizationCode
    }

    #[instrument(skip(self, request, handler), level = "debug")]
    async fn handle(
        &self,
        request: &TokenRequest,
        handler: &dyn DataHandler,
        now: DateTime<Utc>,
    ) -> Result<TokenGrant, OAuthError> {
        let code = request.require("code")?.to_string();
        let redirect_uri = request.require("redirect_uri")?.to_string();
        let client = authenticate_client(request, handler, GrantType::AuthorizationCode).await?;

        let auth_info = handler
            .get_auth_info_by_code(&code)
            .await
            .map_err(|e| protocol_error(e, OAuthError::InvalidGrant))?;

        // The code must belong to this client, match the redirect URI it
        // was issued against, and be fresh and unconsumed.
        if auth_info.client_id != client.id {
            return Err(OAuthError::InvalidGrant);
        }
        if auth_info.redirect_uri.as_deref() != Some(redirect_uri.as_str()) {
            return Err(OAuthError::InvalidGrant);
        }
        if auth_info.used {
            return Err(OAuthError::InvalidGrant);
        }
        if let Some(expires_at) = auth_info.code_expires_at {
            if expires_at <= now {
                return Err(OAuthError::InvalidGrant);
            }
        }

        // Mark before issuing so a concurrent replay observes the used
        // state; a handler reporting the mark as denied is a replay.
        handler
            .mark_auth_info_used(&auth_info)
            .await
            .map_err(|e| protocol_error(e, OAuthError::InvalidGrant))?;

        let access_token = handler
            .create_or_update_access_token(&auth_info)
            .await
            .map_err(creation_error)?;

        let mut response = TokenResponse::bearer(access_token.token, access_token.expires_in);
        response.refresh_token = access_token.refresh_token;
        response.scope = auth_info.scope;
        Ok(TokenGrant::Tokens(response))
    }
}
