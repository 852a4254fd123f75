//! OAuth 2.0 (draft-10 era) authorization library.
//!
//! Three subsystems, all framework-agnostic:
//!
//! - an authorization-server core ([`TokenEndpoint`], [`AuthorizeEndpoint`])
//!   dispatching pluggable grant-type flows over a host-supplied
//!   [`DataHandler`];
//! - a protected-resource guard ([`ResourceGuard`]) extracting and
//!   validating bearer tokens;
//! - a client ([`OAuthClient`]) speaking to a remote token endpoint through
//!   an [`OAuthHttpClient`] transport.
//!
//! The crate holds no per-request state and performs no I/O of its own:
//! hosts hand the endpoints a pre-parsed [`web::OAuthRequest`] and map the
//! returned [`web::OAuthResponse`] onto their server of choice.

pub mod client;
pub mod formatter;
pub mod server;
pub mod types;
pub mod web;

pub use client::http_client::{
    HttpClientError, HttpRequest, HttpResponse, InMemoryHttpClient, OAuthHttpClient,
    RedirectPolicy, UnmatchedRequest,
};
pub use client::{ClientError, Exchange, OAuthClient};
pub use formatter::{FormatError, ResponseFormat};
pub use server::authorize_endpoint::{
    AuthorizeDecision, AuthorizeEndpoint, AuthorizeError, AuthorizeRequest, ResponseType,
};
pub use server::data_handler::{DataHandler, HandlerError, HandlerResult};
pub use server::flows::{FlowRegistry, GrantFlow, TokenGrant};
pub use server::guard::{GuardRejection, GuardedAccess, ResourceGuard};
pub use server::memory::InMemoryDataHandler;
pub use server::params::{extract_token_request, ClientCredentials, TokenRequest};
pub use server::token_endpoint::TokenEndpoint;
pub use types::{
    AccessToken, AuthInfo, Client, DeviceCodeResponse, DeviceGrant, DeviceGrantStatus,
    ErrorResponse, GrantType, OAuthError, Scope, TokenResponse,
};
pub use web::{OAuthRequest, OAuthResponse};
