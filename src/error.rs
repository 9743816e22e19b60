//! Error types delivered to task result callbacks and observers.
//!
//! Nothing in this crate aborts or panics on a failed request: every outcome
//! reaches the caller as a value. Errors are `Clone` because the same
//! terminal error goes to the result callback, the task observer and the
//! task's own `error()` accessor.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::task::CloseCode;
use crate::transport::TransportError;

/// Terminal outcome of a failed task or stream operation.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The transport reported a network-level failure.
    #[error("transport failure for {url}: {source}")]
    TransportFailure {
        /// URL of the request that failed.
        url: String,
        /// The underlying transport error.
        #[source]
        source: Arc<TransportError>,
    },

    /// The task was cancelled before the transport finished.
    #[error("request for {url} was cancelled")]
    Cancelled {
        /// URL of the cancelled request.
        url: String,
    },

    /// A message stream operation was attempted before the stream opened.
    #[error("message stream is not open")]
    NotOpen,

    /// The stream delivered a payload the message API cannot represent.
    #[error("unsupported message type: {kind}")]
    UnsupportedMessageType {
        /// Transport-provided name of the payload type.
        kind: String,
    },

    /// `receive` was called while an earlier receive was still pending.
    #[error("a receive is already pending on this message stream")]
    ReceivePending,

    /// The peer or transport closed the message stream.
    #[error("message stream closed ({code}): {reason}")]
    Closed {
        /// Close code reported with the close event.
        code: CloseCode,
        /// Close reason, `"closed"` when the peer sent none.
        reason: String,
    },

    /// Local file system error, e.g. while writing a download to disk.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl TaskError {
    /// Creates a transport failure for `url`.
    pub fn transport(url: impl Into<String>, source: TransportError) -> Self {
        Self::TransportFailure {
            url: url.into(),
            source: Arc::new(source),
        }
    }

    /// Creates a cancellation error for `url`.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Creates a close error, falling back to `"closed"` for an empty reason.
    pub fn closed(code: CloseCode, reason: Option<&str>) -> Self {
        let reason = reason
            .filter(|r| !r.is_empty())
            .unwrap_or("closed")
            .to_string();
        Self::Closed { code, reason }
    }

    /// Returns `true` for [`TaskError::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

// No `From` impls: every variant needs context (url, path) that the source
// error does not carry.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failure_display_includes_url_and_cause() {
        let error = TaskError::transport(
            "https://example.com/a",
            TransportError::Other("connection reset".to_string()),
        );
        let msg = error.to_string();
        assert!(msg.contains("https://example.com/a"), "Expected URL in: {msg}");
        assert!(msg.contains("connection reset"), "Expected cause in: {msg}");
    }

    #[test]
    fn test_transport_failure_exposes_source() {
        use std::error::Error as _;

        let error = TaskError::transport("https://example.com/a", TransportError::Other("x".into()));
        assert!(error.source().is_some());
    }

    #[test]
    fn test_cancelled_is_cancelled() {
        let error = TaskError::cancelled("https://example.com/a");
        assert!(error.is_cancelled());
        assert!(error.to_string().contains("cancelled"));
        assert!(!TaskError::NotOpen.is_cancelled());
    }

    #[test]
    fn test_closed_defaults_reason() {
        let error = TaskError::closed(CloseCode::GoingAway, None);
        match &error {
            TaskError::Closed { code, reason } => {
                assert_eq!(*code, CloseCode::GoingAway);
                assert_eq!(reason, "closed");
            }
            other => panic!("Expected Closed, got: {other:?}"),
        }
        assert!(error.to_string().contains("1001"), "got: {error}");

        let error = TaskError::closed(CloseCode::NormalClosure, Some(""));
        assert!(error.to_string().ends_with("closed"), "got: {error}");
    }

    #[test]
    fn test_io_error_display_includes_path() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let error = TaskError::io("/tmp/file.download", io_error);
        let msg = error.to_string();
        assert!(msg.contains("/tmp/file.download"), "Expected path in: {msg}");
    }

    #[test]
    fn test_task_error_is_clone() {
        let error = TaskError::io(
            "/tmp/x",
            std::io::Error::other("boom"),
        );
        let copy = error.clone();
        assert_eq!(error.to_string(), copy.to_string());
    }
}
