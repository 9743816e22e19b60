//! netsession core library
//!
//! A request-lifecycle layer over callback-driven network transports. A
//! caller creates a task from a [`Session`], resumes it, and is told the
//! outcome exactly once, no matter how transport events and cancellation
//! interleave.
//!
//! # Architecture
//!
//! - [`session`] - configuration, observers and task construction
//! - [`task`] - the task state machine and its data, upload, download and
//!   message stream kinds
//! - [`observer`] - capability-scoped observer traits
//! - [`transport`] - the transport contract and the reqwest-backed adapter
//! - [`context`] - execution contexts results are delivered on
//! - [`config`] - session configuration and its TOML file form
//! - [`request`] - request and response records
//! - [`error`] - task errors

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod error;
pub mod observer;
pub mod request;
pub mod session;
pub mod task;
pub mod transport;

// Re-export commonly used types
pub use config::{ConfigError, FileConfig, SessionConfig};
pub use context::{ExecutionContext, InlineContext, SerialQueue};
pub use error::TaskError;
pub use observer::{
    AuthChallenge, AuthCompletion, AuthDisposition, Credential, DataObserver, DownloadObserver,
    ResponseDisposition, SessionObserver, TaskObserver,
};
pub use request::{Request, Response};
pub use session::{Session, SessionBuilder, SessionError};
pub use task::{
    CloseCode, DataTask, DataTaskResult, DownloadTask, DownloadTaskResult, Message,
    MessageStreamTask, Task, TaskId, TaskInfo, TaskKind, TaskState, UploadTask,
};
pub use transport::{
    InboundMessage, ReqwestTransport, StreamConnection, StreamObserver, StreamTransport, Timeouts,
    Transport, TransportError, TransportHandle, TransportObserver,
};
