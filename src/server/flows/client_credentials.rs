//! `client_credentials`: direct issuance against the client's own identity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;

use super::{authenticate_client, check_scope, creation_error, GrantFlow, TokenGrant};
use crate::server::data_handler::DataHandler;
use crate::server::params::TokenRequest;
use crate::types::{GrantType, OAuthError, TokenResponse};

pub struct ClientCredentialsFlow;

#[async_trait]
impl GrantFlow for ClientCredentialsFlow {
    fn grant_type(&self) -> GrantType {
        GrantType::ClientCredentials
    }

    #[instrument(skip(self, request, handler), level = "debug")]
    async fn handle(
        &self,
        request: &TokenRequest,
        handler: &dyn DataHandler,
        _now: DateTime<Utc>,
    ) -> Result<TokenGrant, OAuthError> {
        let client = authenticate_client(request, handler, GrantType::ClientCredentials).await?;
        let scope = request.param("scope");
        check_scope(handler, &client.id, scope).await?;

        // No resource owner on this grant.
        let auth_info = handler
            .create_or_update_auth_info(&client.id, None, scope, None)
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
