//! Outbound HTTP abstraction for the client.
//!
//! The crate performs no network I/O itself; hosts plug a transport in
//! behind [`OAuthHttpClient`]. [`InMemoryHttpClient`] is a scripted
//! transport for tests.

use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use http::Method;

/// HTTP redirect policy configuration.
#[derive(Debug, Clone)]
pub enum RedirectPolicy {
    /// Do not follow redirections.
    None,
    /// Follow up to the given number of redirections.
    Limit(u32),
}

/// An outbound HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub redirect_policy: RedirectPolicy,
}

/// The transport's answer.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Error type for HTTP client operations.
pub type HttpClientError = Box<dyn Error + Send + Sync>;

/// Generic HTTP client interface for the token-endpoint exchanges.
#[async_trait]
pub trait OAuthHttpClient: Send + Sync + 'static {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError>;
}

/// A request the scripted transport had no answer for.
#[derive(Debug)]
pub struct UnmatchedRequest {
    pub method: Method,
    pub url: String,
}

impl fmt::Display for UnmatchedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no scripted response for {} {}", self.method, self.url)
    }
}

impl Error for UnmatchedRequest {}

/// Scripted HTTP transport for tests.
///
/// Answers are resolved in three steps: a method/URL route, then the next
/// queued response, then the fallback. A request nothing matches fails
/// with [`UnmatchedRequest`]. Every request that reaches the transport is
/// recorded and can be replayed through [`received`](Self::received).
#[derive(Default)]
pub struct InMemoryHttpClient {
    routes: DashMap<(String, String), HttpResponse>,
    queued: Mutex<VecDeque<HttpResponse>>,
    fallback: Option<HttpResponse>,
    received: Mutex<Vec<HttpRequest>>,
}

impl InMemoryHttpClient {
    pub fn new() -> Self {
        InMemoryHttpClient::default()
    }

    /// Serves this response whenever routing and the queue come up empty.
    pub fn fallback(mut self, response: HttpResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    /// Scripts the response for one specific method/URL pair.
    pub fn route(&self, method: Method, url: impl Into<String>, response: HttpResponse) {
        self.routes.insert((method.to_string(), url.into()), response);
    }

    /// Queues a response served, once, to the next unrouted request.
    pub fn enqueue(&self, response: HttpResponse) {
        lock(&self.queued).push_back(response);
    }

    /// Requests seen so far, oldest first.
    pub fn received(&self) -> Vec<HttpRequest> {
        lock(&self.received).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl OAuthHttpClient for InMemoryHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpClientError> {
        lock(&self.received).push(request.clone());
        if let Some(entry) = self
            .routes
            .get(&(request.method.to_string(), request.url.clone()))
        {
            return Ok(entry.value().clone());
        }
        if let Some(queued) = lock(&self.queued).pop_front() {
            return Ok(queued);
        }
        match &self.fallback {
            Some(response) => Ok(response.clone()),
            None => Err(Box::new(UnmatchedRequest {
                method: request.method,
                url: request.url,
            })),
        }
    }
}
