//! Framework-neutral request and response values.
//!
//! The endpoints consume an [`OAuthRequest`] the host builds from its own
//! server's parsed request, and produce an [`OAuthResponse`] the host maps
//! back. No socket or TLS concerns live here.

pub use http::{Method, StatusCode};
use url::form_urlencoded;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// A pre-parsed inbound HTTP request.
#[derive(Debug, Clone)]
pub struct OAuthRequest {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    /// Decoded query-string pairs.
    pub query: Vec<(String, String)>,
    /// Decoded form-body pairs; meaningful only with the form content type.
    pub body: Vec<(String, String)>,
}

impl OAuthRequest {
    pub fn new(method: Method) -> Self {
        OAuthRequest {
            method,
            headers: Vec::new(),
            query: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn get() -> Self {
        OAuthRequest::new(Method::GET)
    }

    pub fn post() -> Self {
        OAuthRequest::new(Method::POST)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query_pair(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn form_pair(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if self.content_type().is_none() {
            self.headers
                .push(("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string()));
        }
        self.body.push((name.into(), value.into()));
        self
    }

    /// Decodes a raw query string into query pairs.
    pub fn query_str(mut self, raw: &str) -> Self {
        self.query
            .extend(form_urlencoded::parse(raw.as_bytes()).map(|(k, v)| (k.into_owned(), v.into_owned())));
        self
    }

    /// Decodes a raw form body and stamps the form content type.
    pub fn form_str(mut self, raw: &str) -> Self {
        if self.content_type().is_none() {
            self.headers
                .push(("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string()));
        }
        self.body
            .extend(form_urlencoded::parse(raw.as_bytes()).map(|(k, v)| (k.into_owned(), v.into_owned())));
        self
    }

    /// Case-insensitive header lookup; first match wins.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Media type of the body, without parameters.
    pub fn content_type(&self) -> Option<&str> {
        self.header_value("content-type")
            .map(|v| v.split(';').next().unwrap_or(v).trim())
    }

    /// Whether the body may carry form parameters: the form content type on
    /// a method that allows a body.
    pub fn has_form_body(&self) -> bool {
        self.method != Method::GET
            && self.method != Method::HEAD
            && self.content_type() == Some(FORM_CONTENT_TYPE)
    }
}

/// The outbound response value the host maps onto its server's response.
#[derive(Debug, Clone)]
pub struct OAuthResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl OAuthResponse {
    pub fn new(status: StatusCode) -> Self {
        OAuthResponse {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        OAuthResponse::new(StatusCode::FOUND).with_header("Location", location)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.headers
            .push(("Content-Type".to_string(), content_type.to_string()));
        self.body = body;
        self
    }

    /// Case-insensitive header lookup; first match wins.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
