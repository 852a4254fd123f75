//! In-memory Data Handler for tests, demos, and single-process hosts.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use ring::constant_time;
use ring::rand::{SecureRandom, SystemRandom};
use tokio::sync::RwLock;
use uuid::Uuid;

use async_trait::async_trait;

use crate::server::data_handler::{DataHandler, HandlerError, HandlerResult};
use crate::types::{
    AccessToken, AuthInfo, Client, DeviceGrant, DeviceGrantStatus, GrantType, Scope,
};

#[derive(Default)]
struct DeviceStore {
    by_code: HashMap<String, DeviceGrant>,
    /// user code → device code, for out-of-band approval.
    by_user_code: HashMap<String, String>,
}

/// A concurrent-map Data Handler. Codes, tokens, and identifiers are minted
/// here; rotation and TTL policy are knobs on the builder.
pub struct InMemoryDataHandler {
    clients: DashMap<String, Client>,
    users: DashMap<String, String>,
    auth_infos: DashMap<String, AuthInfo>,
    /// authorization code → auth id.
    codes: DashMap<String, String>,
    /// refresh token → auth id.
    refresh_tokens: DashMap<String, String>,
    access_tokens: DashMap<String, AccessToken>,
    /// auth id → current access token, so re-issuance revokes the old one.
    tokens_by_auth: DashMap<String, String>,
    devices: RwLock<DeviceStore>,
    allowed_scopes: Option<Scope>,
    rng: SystemRandom,
    code_ttl: i64,
    token_ttl: i64,
    device_ttl: i64,
    device_interval: i64,
    rotate_refresh_tokens: bool,
}

impl InMemoryDataHandler {
    pub fn new(initial_clients: Vec<Client>) -> Self {
        let clients = DashMap::new();
        for client in initial_clients {
            clients.insert(client.id.clone(), client);
        }
        InMemoryDataHandler {
            clients,
            users: DashMap::new(),
            auth_infos: DashMap::new(),
            codes: DashMap::new(),
            refresh_tokens: DashMap::new(),
            access_tokens: DashMap::new(),
            tokens_by_auth: DashMap::new(),
            devices: RwLock::new(DeviceStore::default()),
            allowed_scopes: None,
            rng: SystemRandom::new(),
            code_ttl: 600,
            token_ttl: 3600,
            device_ttl: 1800,
            device_interval: 5,
            rotate_refresh_tokens: false,
        }
    }

    pub fn with_user(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }

    /// Restricts requestable scopes; unset means any scope is accepted.
    pub fn allowed_scopes(mut self, scopes: &str) -> Self {
        self.allowed_scopes = Some(Scope::parse(scopes));
        self
    }

    pub fn code_ttl(mut self, seconds: i64) -> Self {
        self.code_ttl = seconds;
        self
    }

    pub fn token_ttl(mut self, seconds: i64) -> Self {
        self.token_ttl = seconds;
        self
    }

    pub fn device_ttl(mut self, seconds: i64) -> Self {
        self.device_ttl = seconds;
        self
    }

    pub fn device_interval(mut self, seconds: i64) -> Self {
        self.device_interval = seconds;
        self
    }

    /// Replace the stored refresh token on every access-token issuance.
    pub fn rotate_refresh_tokens(mut self, rotate: bool) -> Self {
        self.rotate_refresh_tokens = rotate;
        self
    }

    /// Marks a pending device grant approved. Host-side action; returns
    /// false for an unknown user code.
    pub async fn approve_device_grant(&self, user_code: &str, user_id: &str) -> bool {
        self.set_device_status(
            user_code,
            DeviceGrantStatus::Approved {
                user_id: user_id.to_string(),
            },
        )
        .await
    }

    /// Marks a pending device grant denied.
    pub async fn deny_device_grant(&self, user_code: &str) -> bool {
        self.set_device_status(user_code, DeviceGrantStatus::Denied).await
    }

    async fn set_device_status(&self, user_code: &str, status: DeviceGrantStatus) -> bool {
        let mut devices = self.devices.write().await;
        let Some(device_code) = devices.by_user_code.get(user_code).cloned() else {
            return false;
        };
        match devices.by_code.get_mut(&device_code) {
            Some(grant) => {
                grant.status = status;
                true
            }
            None => false,
        }
    }

    fn opaque_token(&self) -> HandlerResult<String> {
        let mut buf = [0u8; 32];
        self.rng
            .fill(&mut buf)
            .map_err(|_| HandlerError::Backend("rng failure".to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(buf))
    }
}

fn secrets_match(a: &str, b: &str) -> bool {
    constant_time::verify_slices_are_equal(a.as_bytes(), b.as_bytes()).is_ok()
}

#[async_trait]
impl DataHandler for InMemoryDataHandler {
    async fn validate_client(
        &self,
        client_id: &str,
        client_secret: &str,
        _grant_type: GrantType,
    ) -> HandlerResult<Client> {
        let client = self
            .clients
            .get(client_id)
            .map(|entry| entry.value().clone())
            .ok_or(HandlerError::NotFound)?;
        if !secrets_match(&client.secret, client_secret) {
            return Err(HandlerError::Denied("client secret mismatch".to_string()));
        }
        Ok(client)
    }

    async fn get_user(&self, username: &str, password: &str) -> HandlerResult<String> {
        let stored = self
            .users
            .get(username)
            .map(|entry| entry.value().clone())
            .ok_or(HandlerError::NotFound)?;
        if !secrets_match(&stored, password) {
            return Err(HandlerError::Denied("bad credentials".to_string()));
        }
        Ok(username.to_string())
    }

    async fn create_or_update_auth_info(
        &self,
        client_id: &str,
        user_id: Option<&str>,
        scope: Option<&str>,
        redirect_uri: Option<&str>,
    ) -> HandlerResult<AuthInfo> {
        let existing_id = self
            .auth_infos
            .iter()
            .find(|entry| {
                entry.client_id == client_id && entry.user_id.as_deref() == user_id
            })
            .map(|entry| entry.id.clone());

        let now = Utc::now();
        // Codes exist only for the redirect-bearing path; direct grants
        // (client credentials, password, device) never exchange one.
        let code = redirect_uri.map(|_| Uuid::new_v4().to_string());
        let code_expires_at = code
            .as_ref()
            .map(|_| now + Duration::seconds(self.code_ttl));
        let auth_info = match existing_id {
            Some(id) => {
                let mut entry = self
                    .auth_infos
                    .get_mut(&id)
                    .ok_or(HandlerError::NotFound)?;
                let info = entry.value_mut();
                // Re-authorization supersedes any pending code.
                if let Some(old) = info.code.take() {
                    self.codes.remove(&old);
                }
                info.scope = scope.map(str::to_string);
                info.redirect_uri = redirect_uri.map(str::to_string);
                info.code = code.clone();
                info.code_expires_at = code_expires_at;
                info.used = false;
                info.clone()
            }
            None => {
                let refresh_token = match user_id {
                    Some(_) => Some(self.opaque_token()?),
                    None => None,
                };
                let info = AuthInfo {
                    id: Uuid::new_v4().to_string(),
                    client_id: client_id.to_string(),
                    user_id: user_id.map(str::to_string),
                    scope: scope.map(str::to_string),
                    redirect_uri: redirect_uri.map(str::to_string),
                    code: code.clone(),
                    code_expires_at,
                    used: false,
                    refresh_token: refresh_token.clone(),
                };
                if let Some(refresh_token) = refresh_token {
                    self.refresh_tokens.insert(refresh_token, info.id.clone());
                }
                self.auth_infos.insert(info.id.clone(), info.clone());
                info
            }
        };
        if let Some(code) = code {
            self.codes.insert(code, auth_info.id.clone());
        }
        Ok(auth_info)
    }

    async fn get_auth_info_by_code(&self, code: &str) -> HandlerResult<AuthInfo> {
        let auth_id = self
            .codes
            .get(code)
            .map(|entry| entry.value().clone())
            .ok_or(HandlerError::NotFound)?;
        self.get_auth_info_by_id(&auth_id).await
    }

    async fn get_auth_info_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> HandlerResult<AuthInfo> {
        let auth_id = self
            .refresh_tokens
            .get(refresh_token)
            .map(|entry| entry.value().clone())
            .ok_or(HandlerError::NotFound)?;
        self.get_auth_info_by_id(&auth_id).await
    }

    async fn get_auth_info_by_id(&self, auth_id: &str) -> HandlerResult<AuthInfo> {
        self.auth_infos
            .get(auth_id)
            .map(|entry| entry.value().clone())
            .ok_or(HandlerError::NotFound)
    }

    async fn mark_auth_info_used(&self, auth_info: &AuthInfo) -> HandlerResult<()> {
        // Check-and-mark under the entry lock so a concurrent replay
        // observes the used state.
        let mut entry = self
            .auth_infos
            .get_mut(&auth_info.id)
            .ok_or(HandlerError::NotFound)?;
        if entry.used {
            return Err(HandlerError::Denied(
                "authorization code already consumed".to_string(),
            ));
        }
        entry.used = true;
        Ok(())
    }

    async fn create_or_update_access_token(
        &self,
        auth_info: &AuthInfo,
    ) -> HandlerResult<AccessToken> {
        let refresh_token = match auth_info.user_id {
            // No resource owner, no refresh token.
            None => None,
            Some(_) => {
                if self.rotate_refresh_tokens {
                    let rotated = self.opaque_token()?;
                    if let Some(mut entry) = self.auth_infos.get_mut(&auth_info.id) {
                        if let Some(old) = entry.refresh_token.replace(rotated.clone()) {
                            self.refresh_tokens.remove(&old);
                        }
                    }
                    self.refresh_tokens
                        .insert(rotated.clone(), auth_info.id.clone());
                    Some(rotated)
                } else {
                    self.auth_infos
                        .get(&auth_info.id)
                        .and_then(|entry| entry.refresh_token.clone())
                }
            }
        };

        let access_token = AccessToken {
            token: self.opaque_token()?,
            auth_id: auth_info.id.clone(),
            created_at: Utc::now(),
            expires_in: self.token_ttl,
            refresh_token,
        };
        // One live token per authorization; re-issuance revokes the old.
        if let Some(previous) = self
            .tokens_by_auth
            .insert(auth_info.id.clone(), access_token.token.clone())
        {
            self.access_tokens.remove(&previous);
        }
        self.access_tokens
            .insert(access_token.token.clone(), access_token.clone());
        Ok(access_token)
    }

    async fn get_access_token(&self, token: &str) -> HandlerResult<AccessToken> {
        self.access_tokens
            .get(token)
            .map(|entry| entry.value().clone())
            .ok_or(HandlerError::NotFound)
    }

    async fn validate_scope(&self, _client_id: &str, scope: Option<&str>) -> HandlerResult<()> {
        let Some(allowed) = &self.allowed_scopes else {
            return Ok(());
        };
        let requested = Scope::parse(scope.unwrap_or(""));
        if requested.is_subset(allowed) {
            Ok(())
        } else {
            Err(HandlerError::Denied("scope not allowed".to_string()))
        }
    }

    async fn validate_redirect_uri(
        &self,
        client_id: &str,
        redirect_uri: &str,
    ) -> HandlerResult<()> {
        let client = self
            .clients
            .get(client_id)
            .map(|entry| entry.value().clone())
            .ok_or(HandlerError::NotFound)?;
        if client.allows_redirect_uri(redirect_uri) {
            Ok(())
        } else {
            Err(HandlerError::Denied("redirect URI not registered".to_string()))
        }
    }

    async fn create_device_grant(
        &self,
        client_id: &str,
        scope: Option<&str>,
    ) -> HandlerResult<DeviceGrant> {
        let user_code = Uuid::new_v4()
            .simple()
            .to_string()
            .get(..8)
            .map(str::to_uppercase)
            .ok_or_else(|| HandlerError::Backend("user code minting failed".to_string()))?;
        let grant = DeviceGrant {
            device_code: self.opaque_token()?,
            user_code: user_code.clone(),
            client_id: client_id.to_string(),
            scope: scope.map(str::to_string),
            interval: self.device_interval,
            expires_at: Utc::now() + Duration::seconds(self.device_ttl),
            last_polled_at: None,
            status: DeviceGrantStatus::Pending,
        };
        let mut devices = self.devices.write().await;
        devices
            .by_user_code
            .insert(user_code, grant.device_code.clone());
        devices
            .by_code
            .insert(grant.device_code.clone(), grant.clone());
        Ok(grant)
    }

    async fn get_device_grant(&self, device_code: &str) -> HandlerResult<DeviceGrant> {
        self.devices
            .read()
            .await
            .by_code
            .get(device_code)
            .cloned()
            .ok_or(HandlerError::NotFound)
    }

    async fn record_device_poll(
        &self,
        device_code: &str,
        now: DateTime<Utc>,
    ) -> HandlerResult<()> {
        let mut devices = self.devices.write().await;
        let grant = devices
            .by_code
            .get_mut(device_code)
            .ok_or(HandlerError::NotFound)?;
        grant.last_polled_at = Some(now);
        Ok(())
    }
}
