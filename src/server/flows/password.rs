//! `password`: resource-owner credentials exchanged for tokens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;

use super::{authenticate_client, check_scope, creation_error, protocol_error, GrantFlow, TokenGrant};
use crate::server::data_handler::DataHandler;
use crate::server::params::TokenRequest;
use crate::types::{GrantType, OAuthError, TokenResponse};

pub struct PasswordFlow;

#[async_trait]
impl GrantFlow for PasswordFlow {
    fn grant_type(&self) -> GrantType {
        GrantType::Password
    }

    #[instrument(skip(self, request, handler), level = "debug")]
    async fn handle(
        &self,
        request: &TokenRequest,
        handler: &dyn DataHandler,
        _now: DateTime<Utc>,
    ) -> Result<TokenGrant, OAuthError> {
        let username = request.require("username")?.to_string();
        let password = request.require("password")?.to_string();
        let client = authenticate_client(request, handler, GrantType::Password).await?;

        let scope = request.param("scope");
        check_scope(handler, &client.id, scope).await?;

        let user_id = handler
            .get_user(&username, &password)
            .await
            .map_err(|e| protocol_error(e, OAuthError::InvalidGrant))?;

        let auth_info = handler
            .create_or_update_auth_info(&client.id, Some(&user_id), scope, None)
            .await
            .map_err(creation_error)?;
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
