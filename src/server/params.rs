//! Parameter and credential extraction for token requests.
//!
//! One request, three possible credential carriers (header, body, query),
//! strict conflict rules. Everything here fails closed with
//! `invalid_request` before any flow or handler runs.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::types::OAuthError;
use crate::web::OAuthRequest;

/// Where the client credentials travelled, if anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCredentials {
    None,
    Header { id: String, secret: String },
    Body { id: String, secret: String },
    Query { id: String, secret: String },
}

impl ClientCredentials {
    pub fn id_secret(&self) -> Option<(&str, &str)> {
        match self {
            ClientCredentials::None => None,
            ClientCredentials::Header { id, secret }
            | ClientCredentials::Body { id, secret }
            | ClientCredentials::Query { id, secret } => Some((id, secret)),
        }
    }
}

/// A token request after extraction: the merged parameter map plus the
/// tagged credential carrier.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub params: HashMap<String, String>,
    pub credentials: ClientCredentials,
}

impl TokenRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Required-parameter guard; absence is `invalid_request`.
    pub fn require(&self, name: &str) -> Result<&str, OAuthError> {
        self.param(name).ok_or(OAuthError::InvalidRequest)
    }

    /// The client id/secret pair, wherever it was carried.
    pub fn client_pair(&self) -> Option<(&str, &str)> {
        self.credentials.id_secret()
    }
}

/// A parsed `Authorization` header.
#[derive(Debug, Clone)]
pub(crate) enum AuthorizationHeader {
    Basic { id: String, secret: String },
    /// `Bearer` or the draft-era `OAuth` scheme; the token is the remainder.
    Bearer(String),
}

/// Parses the `Authorization` header if present. Schemes other than
/// `Basic`, `OAuth`, or `Bearer` (case-insensitive) are `invalid_request`.
pub(crate) fn parse_authorization(
    request: &OAuthRequest,
) -> Result<Option<AuthorizationHeader>, OAuthError> {
    let raw = match request.header_value("authorization") {
        Some(raw) => raw.trim(),
        None => return Ok(None),
    };
    let (scheme, rest) = raw.split_once(' ').ok_or(OAuthError::InvalidRequest)?;
    let rest = rest.trim();
    if scheme.eq_ignore_ascii_case("basic") {
        let decoded = STANDARD
            .decode(rest)
            .map_err(|_| OAuthError::InvalidRequest)?;
        let decoded = String::from_utf8(decoded).map_err(|_| OAuthError::InvalidRequest)?;
        // The secret may contain colons; split on the first only.
        let (id, secret) = decoded.split_once(':').ok_or(OAuthError::InvalidRequest)?;
        Ok(Some(AuthorizationHeader::Basic {
            id: id.to_string(),
            secret: secret.to_string(),
        }))
    } else if scheme.eq_ignore_ascii_case("bearer") || scheme.eq_ignore_ascii_case("oauth") {
        Ok(Some(AuthorizationHeader::Bearer(rest.to_string())))
    } else {
        Err(OAuthError::InvalidRequest)
    }
}

/// Merges body and query parameters. A name carried twice with different
/// values is `invalid_request`; equal repeats collapse, body value first.
pub(crate) fn merged_params(
    request: &OAuthRequest,
) -> Result<HashMap<String, String>, OAuthError> {
    let mut params = HashMap::new();
    for (name, value) in request.body.iter().chain(request.query.iter()) {
        match params.get(name) {
            Some(existing) if existing != value => return Err(OAuthError::InvalidRequest),
            Some(_) => {}
            None => {
                params.insert(name.clone(), value.clone());
            }
        }
    }
    Ok(params)
}

/// Runs the full extraction for the token endpoint.
pub fn extract_token_request(request: &OAuthRequest) -> Result<TokenRequest, OAuthError> {
    let params = merged_params(request)?;

    let header = match parse_authorization(request)? {
        Some(AuthorizationHeader::Basic { id, secret }) => {
            Some(ClientCredentials::Header { id, secret })
        }
        // A bearer header is not a client credential; the guard owns it.
        _ => None,
    };
    let body = pair_credentials(&request.body, |id, secret| ClientCredentials::Body {
        id,
        secret,
    })?;
    let query = pair_credentials(&request.query, |id, secret| ClientCredentials::Query {
        id,
        secret,
    })?;

    let mut carriers = [header, body, query].into_iter().flatten();
    let credentials = carriers.next().unwrap_or(ClientCredentials::None);
    if carriers.next().is_some() {
        return Err(OAuthError::InvalidRequest);
    }

    Ok(TokenRequest {
        params,
        credentials,
    })
}

/// A body or query carrier supplies credentials iff it carries
/// `client_secret`; the pair must then be complete.
fn pair_credentials(
    pairs: &[(String, String)],
    carrier: impl FnOnce(String, String) -> ClientCredentials,
) -> Result<Option<ClientCredentials>, OAuthError> {
    let secret = single_value(pairs, "client_secret")?;
    let id = single_value(pairs, "client_id")?;
    match (id, secret) {
        (Some(id), Some(secret)) => Ok(Some(carrier(id, secret))),
        (_, Some(_)) => Err(OAuthError::InvalidRequest),
        _ => Ok(None),
    }
}

fn single_value(pairs: &[(String, String)], name: &str) -> Result<Option<String>, OAuthError> {
    let mut found: Option<&str> = None;
    for (k, v) in pairs {
        if k == name {
            match found {
                Some(existing) if existing != v => return Err(OAuthError::InvalidRequest),
                _ => found = Some(v),
            }
        }
    }
    Ok(found.map(str::to_string))
}
