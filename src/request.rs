//! Immutable request and response records.
//!
//! These are plain value objects handed between the session, its tasks and
//! the transport. Header and status types come from the `http` crate as
//! re-exported by reqwest, so the bundled transport can use them directly.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use url::Url;

/// An outgoing request.
///
/// Built once by the caller, then copied (never mutated in place) by the
/// session when default headers are merged and by tasks when the transport
/// request is assembled.
#[derive(Debug, Clone)]
pub struct Request {
    url: Url,
    method: Method,
    headers: HeaderMap,
    body: Option<Bytes>,
    timeout: Option<Duration>,
}

impl Request {
    /// Creates a `GET` request for `url` with no headers and no body.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Parses `url` and creates a `GET` request for it.
    ///
    /// # Errors
    ///
    /// Returns [`url::ParseError`] if `url` is not an absolute URL.
    pub fn get(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(url)?))
    }

    /// Replaces the request method.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sets a header, replacing any existing value for `name`.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Attaches a request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets a per-request timeout that takes precedence over the session's.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub(crate) fn set_body(&mut self, body: Option<Bytes>) {
        self.body = body;
    }
}

/// Response metadata received from the transport.
#[derive(Debug, Clone)]
pub struct Response {
    url: Url,
    status: StatusCode,
    headers: HeaderMap,
}

impl Response {
    #[must_use]
    pub fn new(url: Url, status: StatusCode, headers: HeaderMap) -> Self {
        Self {
            url,
            status,
            headers,
        }
    }

    /// Builds the response reported when the transport finished without
    /// ever delivering one: status 200 with the request headers echoed back.
    #[must_use]
    pub fn synthesized(request: &Request) -> Self {
        Self {
            url: request.url.clone(),
            status: StatusCode::OK,
            headers: request.headers.clone(),
        }
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Body size announced by the `Content-Length` header, if any.
    #[must_use]
    pub fn expected_content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }
}
