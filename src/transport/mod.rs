//! Contract between tasks and the transport that performs the actual I/O.
//!
//! The transport is callback-driven: [`Transport::start`] hands it a request
//! and an observer, and the transport later reports what happened through
//! [`TransportObserver`] from whatever thread it runs on. Tasks never wait on
//! the transport. They only react to its events.
//!
//! Message streams use the parallel [`StreamTransport`] / [`StreamObserver`]
//! pair, since a duplex connection has a different event vocabulary.
//!
//! # Implementations
//!
//! - [`ReqwestTransport`] - HTTP(S) via reqwest, spawned onto tokio
//!
//! Redirects, retries, caching, proxies and TLS are the transport's business;
//! nothing in the task layer second-guesses them.

mod http;

pub use http::{CONNECT_TIMEOUT_SECS, ReqwestTransport};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::observer::{AuthChallenge, AuthCompletion, AuthDisposition};
use crate::request::{Request, Response};
use crate::task::CloseCode;

/// Timeouts the session passes along with every started request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Longest idle wait for the response head or the next body chunk.
    pub request: Duration,
    /// Upper bound on the whole exchange.
    pub resource: Duration,
}

/// Failure reported by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No progress within the request timeout, or the resource timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// Network-level error from the HTTP client (DNS, connect, TLS, reset).
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// Any other transport-specific failure.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Maps a reqwest error, folding its timeouts into [`TransportError::Timeout`].
    #[must_use]
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(error)
        }
    }
}

/// Receives the events of one request/response exchange.
///
/// Expected order is response, data*, then exactly one of finished/failed.
/// Implementations tolerate anything after the terminal event.
pub trait TransportObserver: Send + Sync {
    fn on_response(&self, response: Response);

    fn on_data(&self, chunk: Bytes);

    fn on_finished(&self);

    fn on_failed(&self, error: TransportError);

    /// The server asked for credentials. The default performs default
    /// handling, which lets the transport proceed without credentials.
    fn on_auth_challenge(&self, challenge: AuthChallenge, completion: AuthCompletion) {
        let _ = challenge;
        completion(AuthDisposition::PerformDefaultHandling);
    }
}

/// Handle to an in-flight exchange.
pub trait TransportHandle: Send + Sync {
    /// Requests cancellation. Best-effort: events may still arrive afterwards.
    fn cancel(&self);
}

/// Starts request/response exchanges.
pub trait Transport: Send + Sync {
    /// Starts `request` immediately and reports its events to `observer`.
    fn start(
        &self,
        request: Request,
        timeouts: Timeouts,
        observer: Arc<dyn TransportObserver>,
    ) -> Box<dyn TransportHandle>;
}

/// A message as delivered by a stream transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Text(String),
    Binary(Bytes),
    /// A payload kind the message API has no representation for.
    Unsupported {
        kind: String,
    },
}

/// Receives the events of a persistent duplex connection.
pub trait StreamObserver: Send + Sync {
    fn on_open(&self);

    fn on_message(&self, message: InboundMessage);

    fn on_pong(&self, payload: Bytes);

    fn on_failed(&self, error: TransportError);

    fn on_closed(&self, code: u16, reason: Option<String>, was_clean: bool);
}

/// An open (or opening) duplex connection.
///
/// Sends are fire-and-forget; no delivery confirmation is modeled.
pub trait StreamConnection: Send + Sync {
    fn send_text(&self, text: String);

    fn send_binary(&self, data: Bytes);

    fn send_ping(&self);

    /// Starts a graceful close. Does not wait for the peer's acknowledgement.
    fn close(&self, code: CloseCode, reason: Option<String>);
}

/// Opens persistent duplex connections.
pub trait StreamTransport: Send + Sync {
    fn connect(
        &self,
        request: Request,
        observer: Arc<dyn StreamObserver>,
    ) -> Box<dyn StreamConnection>;
}
