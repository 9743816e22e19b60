//! Message stream tasks: a persistent duplex channel of text and binary
//! messages, in the shape of a WebSocket.
//!
//! A stream is opened by [`MessageStreamTask::resume`] and becomes usable
//! once the transport reports it open. Inbound messages are only delivered
//! to a pending [`receive`](MessageStreamTask::receive): there is no inbound
//! queue, so a message that arrives while nobody is receiving is dropped.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{TaskInfo, TaskState, deliver};
use crate::error::TaskError;
use crate::session::SessionInner;
use crate::transport::{InboundMessage, StreamConnection, StreamObserver, TransportError};

/// A message sent or received on a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

/// Close codes a stream can be closed with, as in RFC 6455 section 7.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    NormalClosure,
    GoingAway,
    ProtocolError,
    UnsupportedData,
    NoStatusReceived,
    AbnormalClosure,
    InvalidFramePayloadData,
    PolicyViolation,
    MessageTooBig,
    MandatoryExtensionMissing,
    InternalServerError,
    TlsHandshakeFailure,
    /// A code outside the known set.
    Unknown,
}

impl CloseCode {
    /// The wire code, `-1` for [`CloseCode::Unknown`].
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::NormalClosure => 1000,
            Self::GoingAway => 1001,
            Self::ProtocolError => 1002,
            Self::UnsupportedData => 1003,
            Self::NoStatusReceived => 1005,
            Self::AbnormalClosure => 1006,
            Self::InvalidFramePayloadData => 1007,
            Self::PolicyViolation => 1008,
            Self::MessageTooBig => 1009,
            Self::MandatoryExtensionMissing => 1010,
            Self::InternalServerError => 1011,
            Self::TlsHandshakeFailure => 1015,
            Self::Unknown => -1,
        }
    }

    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            1000 => Self::NormalClosure,
            1001 => Self::GoingAway,
            1002 => Self::ProtocolError,
            1003 => Self::UnsupportedData,
            1005 => Self::NoStatusReceived,
            1006 => Self::AbnormalClosure,
            1007 => Self::InvalidFramePayloadData,
            1008 => Self::PolicyViolation,
            1009 => Self::MessageTooBig,
            1010 => Self::MandatoryExtensionMissing,
            1011 => Self::InternalServerError,
            1015 => Self::TlsHandshakeFailure,
            _ => Self::Unknown,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::NormalClosure => "normal closure",
            Self::GoingAway => "going away",
            Self::ProtocolError => "protocol error",
            Self::UnsupportedData => "unsupported data",
            Self::NoStatusReceived => "no status received",
            Self::AbnormalClosure => "abnormal closure",
            Self::InvalidFramePayloadData => "invalid frame payload data",
            Self::PolicyViolation => "policy violation",
            Self::MessageTooBig => "message too big",
            Self::MandatoryExtensionMissing => "mandatory extension missing",
            Self::InternalServerError => "internal server error",
            Self::TlsHandshakeFailure => "TLS handshake failure",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

type ReceiveCallback = Box<dyn FnOnce(Result<Message, TaskError>) + Send + 'static>;
type PongHandler = Box<dyn FnOnce(Result<(), TaskError>) + Send + 'static>;

struct StreamSlot {
    state: TaskState,
    started: bool,
    is_open: bool,
    connection: Option<Arc<dyn StreamConnection>>,
    pending_receive: Option<ReceiveCallback>,
    pong_handler: Option<PongHandler>,
    error: Option<TaskError>,
    close_code: Option<CloseCode>,
    close_reason: Option<String>,
}

struct StreamInner {
    info: TaskInfo,
    session: Weak<SessionInner>,
    slot: Mutex<StreamSlot>,
}

impl StreamInner {
    fn lock(&self) -> MutexGuard<'_, StreamSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn url(&self) -> String {
        self.info.original_request().url().to_string()
    }

    /// Ends the stream with `error`, resolving a pending receive with it.
    fn terminate(&self, error: TaskError, close: Option<(CloseCode, Option<String>)>) {
        let pending = {
            let mut slot = self.lock();
            if slot.state == TaskState::Completed {
                return;
            }
            slot.state = TaskState::Completed;
            slot.is_open = false;
            slot.connection = None;
            slot.error = Some(error.clone());
            if let Some((code, reason)) = close {
                slot.close_code = Some(code);
                slot.close_reason = reason;
            }
            slot.pending_receive.take()
        };
        if let Some(callback) = pending {
            deliver(&self.session, Box::new(move || callback(Err(error))));
        }
    }
}

impl StreamObserver for StreamInner {
    fn on_open(&self) {
        let mut slot = self.lock();
        if slot.state == TaskState::Completed {
            return;
        }
        slot.is_open = true;
        info!(task_id = %self.info.id(), url = %self.info.original_request().url(), "message stream open");
    }

    fn on_message(&self, message: InboundMessage) {
        let pending = {
            let mut slot = self.lock();
            if slot.state == TaskState::Completed {
                return;
            }
            slot.pending_receive.take()
        };
        let Some(callback) = pending else {
            debug!(task_id = %self.info.id(), "inbound message dropped; no pending receive");
            return;
        };
        let result = match message {
            InboundMessage::Text(text) => Ok(Message::Text(text)),
            InboundMessage::Binary(data) => Ok(Message::Binary(data)),
            InboundMessage::Unsupported { kind } => Err(TaskError::UnsupportedMessageType { kind }),
        };
        deliver(&self.session, Box::new(move || callback(result)));
    }

    fn on_pong(&self, _payload: Bytes) {
        let handler = self.lock().pong_handler.take();
        if let Some(handler) = handler {
            deliver(&self.session, Box::new(move || handler(Ok(()))));
        }
    }

    fn on_failed(&self, error: TransportError) {
        warn!(task_id = %self.info.id(), error = %error, "message stream failed");
        self.terminate(TaskError::transport(self.url(), error), None);
    }

    fn on_closed(&self, code: u16, reason: Option<String>, was_clean: bool) {
        let code = CloseCode::from_code(i32::from(code));
        debug!(task_id = %self.info.id(), %code, was_clean, "message stream closed");
        let error = TaskError::closed(code, reason.as_deref());
        self.terminate(error, Some((code, reason)));
    }
}

/// A persistent duplex message stream.
///
/// Created with
/// [`Session::message_stream_task`](crate::Session::message_stream_task).
/// All callbacks run on the session's delivery context.
///
/// Unlike the transfer tasks, a stream is not reported to the task observer.
pub struct MessageStreamTask {
    inner: Arc<StreamInner>,
}

impl MessageStreamTask {
    pub(crate) fn new(info: TaskInfo, session: Weak<SessionInner>) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                info,
                session,
                slot: Mutex::new(StreamSlot {
                    state: TaskState::Suspended,
                    started: false,
                    is_open: false,
                    connection: None,
                    pending_receive: None,
                    pong_handler: None,
                    error: None,
                    close_code: None,
                    close_reason: None,
                }),
            }),
        }
    }

    #[must_use]
    pub fn info(&self) -> &TaskInfo {
        &self.inner.info
    }

    #[must_use]
    pub fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    /// Whether the transport has reported the stream open and it has not
    /// closed since.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.lock().is_open
    }

    /// The terminal error once the stream has closed, failed or been cancelled.
    #[must_use]
    pub fn error(&self) -> Option<TaskError> {
        self.inner.lock().error.clone()
    }

    /// The close code, once the stream was closed by either side.
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        self.inner.lock().close_code
    }

    #[must_use]
    pub fn close_reason(&self) -> Option<String> {
        self.inner.lock().close_reason.clone()
    }

    /// Opens the connection on the first call; later calls only flip a
    /// suspended stream back to running.
    pub fn resume(&self) {
        {
            let mut slot = self.inner.lock();
            if slot.state != TaskState::Suspended {
                return;
            }
            slot.state = TaskState::Running;
            if slot.started {
                return;
            }
            slot.started = true;
        }

        let transport = self
            .inner
            .session
            .upgrade()
            .and_then(|session| session.stream_transport.clone());
        let Some(transport) = transport else {
            let error = TransportError::Other("no stream transport available".to_string());
            self.inner.terminate(TaskError::transport(self.inner.url(), error), None);
            return;
        };

        debug!(task_id = %self.inner.info.id(), "opening message stream");
        let request = self.inner.info.original_request().clone();
        let observer: Arc<dyn StreamObserver> = Arc::clone(&self.inner) as Arc<dyn StreamObserver>;
        let connection: Arc<dyn StreamConnection> = Arc::from(transport.connect(request, observer));

        let mut slot = self.inner.lock();
        if slot.state == TaskState::Completed {
            let code = slot.close_code.unwrap_or(CloseCode::GoingAway);
            let reason = slot.close_reason.clone();
            drop(slot);
            connection.close(code, reason);
            return;
        }
        slot.connection = Some(connection);
    }

    /// Marks a running stream suspended. The connection stays open.
    pub fn suspend(&self) {
        let mut slot = self.inner.lock();
        if slot.state == TaskState::Running {
            slot.state = TaskState::Suspended;
        }
    }

    fn open_connection(&self) -> Option<Arc<dyn StreamConnection>> {
        let slot = self.inner.lock();
        if slot.is_open {
            slot.connection.clone()
        } else {
            None
        }
    }

    /// Sends `message`. `callback` receives `None` once the message was
    /// handed to the transport, or [`TaskError::NotOpen`].
    pub fn send(
        &self,
        message: Message,
        callback: impl FnOnce(Option<TaskError>) + Send + 'static,
    ) {
        let outcome = match self.open_connection() {
            None => Some(TaskError::NotOpen),
            Some(connection) => {
                match message {
                    Message::Text(text) => connection.send_text(text),
                    Message::Binary(data) => connection.send_binary(data),
                }
                None
            }
        };
        deliver(&self.inner.session, Box::new(move || callback(outcome)));
    }

    /// Registers `callback` for the next inbound message.
    ///
    /// Only one receive may be pending: a second call fails immediately with
    /// [`TaskError::ReceivePending`] and leaves the first registered. On a
    /// completed stream the callback gets the terminal error.
    pub fn receive(&self, callback: impl FnOnce(Result<Message, TaskError>) + Send + 'static) {
        let rejection = {
            let mut slot = self.inner.lock();
            if slot.state == TaskState::Completed {
                Some(
                    slot.error
                        .clone()
                        .unwrap_or_else(|| TaskError::cancelled(self.inner.url())),
                )
            } else if slot.pending_receive.is_some() {
                Some(TaskError::ReceivePending)
            } else {
                slot.pending_receive = Some(Box::new(callback));
                return;
            }
        };
        if let Some(error) = rejection {
            deliver(&self.inner.session, Box::new(move || callback(Err(error))));
        }
    }

    /// Sends a ping. `pong_handler` runs when the next pong arrives. A newer
    /// ping replaces an older handler that has not fired yet.
    pub fn send_ping(&self, pong_handler: impl FnOnce(Result<(), TaskError>) + Send + 'static) {
        let Some(connection) = self.open_connection() else {
            deliver(
                &self.inner.session,
                Box::new(move || pong_handler(Err(TaskError::NotOpen))),
            );
            return;
        };
        self.inner.lock().pong_handler = Some(Box::new(pong_handler));
        connection.send_ping();
    }

    /// Closes the stream with `code` and an optional UTF-8 `reason`.
    ///
    /// A reason that is not valid UTF-8 is dropped. A pending receive
    /// resolves with [`TaskError::Cancelled`].
    pub fn cancel(&self, code: CloseCode, reason: Option<&[u8]>) {
        let reason = reason
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .map(str::to_string);
        let error = TaskError::cancelled(self.inner.url());
        let (connection, pending) = {
            let mut slot = self.inner.lock();
            if slot.state == TaskState::Completed {
                return;
            }
            slot.state = TaskState::Completed;
            slot.is_open = false;
            slot.error = Some(error.clone());
            slot.close_code = Some(code);
            slot.close_reason.clone_from(&reason);
            (slot.connection.take(), slot.pending_receive.take())
        };
        debug!(task_id = %self.inner.info.id(), %code, "message stream cancelled");
        if let Some(connection) = connection {
            connection.close(code, reason);
        }
        if let Some(callback) = pending {
            deliver(&self.inner.session, Box::new(move || callback(Err(error))));
        }
    }
}

impl fmt::Debug for MessageStreamTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.lock();
        f.debug_struct("MessageStreamTask")
            .field("id", &self.inner.info.id())
            .field("state", &slot.state)
            .field("is_open", &slot.is_open)
            .finish_non_exhaustive()
    }
}
