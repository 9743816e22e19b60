//! Capability-scoped observer traits.
//!
//! A caller opts into fine-grained notifications by implementing one or more
//! of these traits and registering each implementation with the
//! [`SessionBuilder`](crate::session::SessionBuilder) under its role. Every
//! method has a default body, so an observer implements only what it cares
//! about. The session keeps one optional observer per role, and tasks look up
//! the role they need directly. There is no runtime probing of a single
//! observer for several capabilities.
//!
//! All notifications run on the session's delivery context, after any event
//! that caused them and before any later one.

use std::fmt;
use std::path::Path;

use bytes::Bytes;

use crate::error::TaskError;
use crate::request::Response;
use crate::session::Session;
use crate::task::TaskInfo;

/// Credentials offered in answer to an authentication challenge.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    user: String,
    password: String,
}

impl Credential {
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A server's request for credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Host that issued the challenge.
    pub host: String,
    /// Authentication scheme, e.g. `Basic`.
    pub scheme: String,
    /// Realm announced by the server, if any.
    pub realm: Option<String>,
    /// How many earlier answers to this challenge were rejected.
    pub previous_failure_count: u32,
}

/// How to answer an [`AuthChallenge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDisposition {
    UseCredential(Credential),
    /// Let the transport proceed as if no observer were registered.
    PerformDefaultHandling,
    CancelAuthenticationChallenge,
    RejectProtectionSpace,
}

/// One-shot answer to an authentication challenge.
pub type AuthCompletion = Box<dyn FnOnce(AuthDisposition) + Send + 'static>;

/// Answer of a [`DataObserver`] to a received response.
///
/// Tasks currently always continue; the disposition is accepted for API
/// completeness but not acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseDisposition {
    #[default]
    Allow,
    Cancel,
}

/// Session-level events.
pub trait SessionObserver: Send + Sync {
    /// A challenge arrived for a task and no [`TaskObserver`] is registered.
    fn did_receive_challenge(
        &self,
        session: &Session,
        challenge: &AuthChallenge,
        completion: AuthCompletion,
    ) {
        let _ = (session, challenge);
        completion(AuthDisposition::PerformDefaultHandling);
    }
}

/// Task lifecycle events, common to every task kind.
pub trait TaskObserver: Send + Sync {
    /// The task reached its terminal state. Delivered after the task's own
    /// result callback. `error` is `None` on success.
    fn did_complete(&self, session: &Session, task: &TaskInfo, error: Option<&TaskError>) {
        let _ = (session, task, error);
    }

    /// A challenge arrived for `task`. Takes precedence over
    /// [`SessionObserver::did_receive_challenge`].
    fn did_receive_challenge(
        &self,
        session: &Session,
        task: &TaskInfo,
        challenge: &AuthChallenge,
        completion: AuthCompletion,
    ) {
        let _ = (session, task, challenge);
        completion(AuthDisposition::PerformDefaultHandling);
    }
}

/// Streaming events of data and upload tasks.
///
/// Events are ordered with the result callback only when the transport
/// delivers them before the task ends. A chunk that races a concurrent
/// `cancel()` may be reported after the result and `did_complete`.
pub trait DataObserver: Send + Sync {
    fn did_receive_response(
        &self,
        session: &Session,
        task: &TaskInfo,
        response: &Response,
    ) -> ResponseDisposition {
        let _ = (session, task, response);
        ResponseDisposition::Allow
    }

    /// A raw body chunk, in arrival order.
    fn did_receive_data(&self, session: &Session, task: &TaskInfo, data: &Bytes) {
        let _ = (session, task, data);
    }
}

/// Progress events of download tasks.
///
/// As with [`DataObserver`], a `did_write_data` racing a concurrent
/// `cancel()` may arrive after the result callback.
pub trait DownloadObserver: Send + Sync {
    /// A chunk was written to the temporary file.
    ///
    /// `total_bytes_expected` is `None` when the response carried no
    /// usable `Content-Length`.
    fn did_write_data(
        &self,
        session: &Session,
        task: &TaskInfo,
        bytes_written: u64,
        total_bytes_written: u64,
        total_bytes_expected: Option<u64>,
    ) {
        let _ = (
            session,
            task,
            bytes_written,
            total_bytes_written,
            total_bytes_expected,
        );
    }

    /// The download completed into `location`. The file belongs to the
    /// caller from here on.
    fn did_finish_downloading(&self, session: &Session, task: &TaskInfo, location: &Path) {
        let _ = (session, task, location);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_redacts_password() {
        let credential = Credential::new("alice", "hunter2");
        let rendered = format!("{credential:?}");
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"), "password leaked: {rendered}");
        assert_eq!(credential.password(), "hunter2");
    }

    #[test]
    fn test_response_disposition_defaults_to_allow() {
        assert_eq!(ResponseDisposition::default(), ResponseDisposition::Allow);
    }
}
