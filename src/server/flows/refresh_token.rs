//! `refresh_token`: a new access token from a long-lived refresh token.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::instrument;

use super::{authenticate_client, creation_error, protocol_error, GrantFlow, TokenGrant};
use crate::server::data_handler::DataHandler;
use crate::server::params::TokenRequest;
use crate::types::{GrantType, OAuthError, Scope, TokenResponse};

pub struct RefreshTokenFlow;

#[async_trait]
impl GrantFlow for RefreshTokenFlow {
    fn grant_type(&self) -> GrantType {
        GrantType::RefreshToken
    }

    #[instrument(skip(self, request, handler), level = "debug")]
    async fn handle(
        &self,
        request: &TokenRequest,
        handler: &dyn DataHandler,
        _now: DateTime<Utc>,
    ) -> Result<TokenGrant, OAuthError> {
        let refresh_token = request.require("refresh_token")?.to_string();
        let client = authenticate_client(request, handler, GrantType::RefreshToken).await?;

        let auth_info = handler
            .get_auth_info_by_refresh_token(&refresh_token)
            .await
            .map_err(|e| protocol_error(e, OAuthError::InvalidGrant))?;
        if auth_info.client_id != client.id {
            return Err(OAuthError::InvalidGrant);
        }

        // An explicitly requested scope must narrow the original grant.
        let scope = match request.param("scope") {
            Some(requested) => {
                let original = Scope::parse(auth_info.scope.as_deref().unwrap_or(""));
                if !Scope::parse(requested).is_subset(&original) {
                    return Err(OAuthError::InvalidScope);
                }
                Some(requested.to_string())
            }
            None => auth_info.scope.clone(),
        };

        let issued_against = crate::types::AuthInfo {
            scope: scope.clone(),
            ..auth_info
        };
        let access_token = handler
            .create_or_update_access_token(&issued_against)
            .await
            .map_err(creation_error)?;

        let mut response = TokenResponse::bearer(access_token.token, access_token.expires_in);
        // Rotation is handler policy, carried on the returned access token.
        response.refresh_token = access_token.refresh_token;
        response.scope = scope;
        Ok(TokenGrant::Tokens(response))
    }
}
