//! The session: configuration, observers, delivery context and transport
//! shared by the tasks it creates.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use crate::config::SessionConfig;
use crate::context::{ExecutionContext, SerialQueue};
use crate::observer::{DataObserver, DownloadObserver, SessionObserver, TaskObserver};
use crate::request::Request;
use crate::task::{
    DataCompletion, DataTask, DataTaskResult, DataTransfer, DownloadCompletion, DownloadTask,
    DownloadTaskResult, DownloadTransfer, MessageStreamTask, TaskId, TaskInfo, TaskKind,
    UploadTask,
};
use crate::transport::{ReqwestTransport, StreamTransport, Transport, TransportError};

/// Label of the delivery thread of sessions built without an explicit context.
pub const DEFAULT_DELIVERY_LABEL: &str = "netsession-delivery";

/// Errors from building a session or creating a task.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The default reqwest transport could not be created.
    #[error("failed to create transport: {0}")]
    Transport(#[source] TransportError),

    /// The default delivery thread could not be spawned.
    #[error("failed to spawn delivery queue: {0}")]
    DeliveryQueue(#[source] std::io::Error),

    /// A message stream was requested from a session without a stream transport.
    #[error("session has no stream transport")]
    MissingStreamTransport,

    /// A message stream was requested for a URL scheme that cannot carry one.
    #[error("unsupported scheme for a message stream: {url}")]
    UnsupportedScheme { url: String },
}

/// Observers registered with a session, one optional slot per role.
#[derive(Default, Clone)]
pub(crate) struct Observers {
    pub(crate) session: Option<Arc<dyn SessionObserver>>,
    pub(crate) task: Option<Arc<dyn TaskObserver>>,
    pub(crate) data: Option<Arc<dyn DataObserver>>,
    pub(crate) download: Option<Arc<dyn DownloadObserver>>,
}

pub(crate) struct SessionInner {
    pub(crate) config: SessionConfig,
    pub(crate) observers: Observers,
    pub(crate) delivery: Arc<dyn ExecutionContext>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) stream_transport: Option<Arc<dyn StreamTransport>>,
    next_task_id: AtomicU64,
}

/// Creates tasks and holds what they share.
///
/// A `Session` is a cheap handle; clones refer to the same session. Tasks
/// keep only a weak reference back and the session does not track its
/// tasks. Once the last clone is dropped, tasks that have not started yet
/// fail on resume and results of running tasks are delivered inline.
///
/// # Example
///
/// ```no_run
/// use netsession_core::{Request, Session, Task};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let session = Session::builder().build()?;
/// let request = session.prepare_request(&Request::get("https://example.com/")?);
/// let task = session.data_task(request, |result| match result.into_result() {
///     Ok((body, response)) => println!("{} ({} bytes)", response.status(), body.len()),
///     Err(e) => eprintln!("failed: {e}"),
/// });
/// task.resume();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

static SHARED: OnceLock<Session> = OnceLock::new();

impl Session {
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// The process-wide default session, created on first use with default
    /// configuration, no observers and the reqwest transport.
    ///
    /// # Panics
    ///
    /// Panics if the default session cannot be built (no transport runtime
    /// or delivery thread could be created).
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn shared() -> &'static Session {
        SHARED.get_or_init(|| {
            Session::builder()
                .build()
                .expect("failed to build the shared session")
        })
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn configuration(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Returns a copy of `request` with the session's additional headers
    /// merged in. Session headers replace request headers of the same name.
    #[must_use]
    pub fn prepare_request(&self, request: &Request) -> Request {
        self.merge_headers(request.clone())
    }

    fn merge_headers(&self, mut request: Request) -> Request {
        let headers = request.headers_mut();
        for (name, value) in &self.inner.config.additional_headers {
            headers.insert(name.clone(), value.clone());
        }
        request
    }

    /// Assigns the next task id and stores `request` with the session
    /// headers merged in.
    fn task_info(&self, kind: TaskKind, request: Request) -> TaskInfo {
        let request = self.merge_headers(request);
        let id = TaskId::new(self.inner.next_task_id.fetch_add(1, Ordering::Relaxed) + 1);
        debug!(task_id = %id, ?kind, url = %request.url(), "task created");
        TaskInfo::new(id, kind, request)
    }

    /// Creates a suspended task that loads `request` into memory.
    ///
    /// Like every task constructor, this merges the session headers into
    /// `request` as [`prepare_request`](Self::prepare_request) does.
    ///
    /// `completion` runs exactly once on the delivery context if the task
    /// is resumed, and never otherwise.
    pub fn data_task(
        &self,
        request: Request,
        completion: impl FnOnce(DataTaskResult) + Send + 'static,
    ) -> DataTask {
        let completion: DataCompletion = Box::new(completion);
        let info = self.task_info(TaskKind::Data, request);
        DataTask::new(DataTransfer::new(
            info,
            Arc::downgrade(&self.inner),
            None,
            completion,
        ))
    }

    /// Creates a suspended task that sends `body` with `request`.
    pub fn upload_task(
        &self,
        request: Request,
        body: impl Into<Bytes>,
        completion: impl FnOnce(DataTaskResult) + Send + 'static,
    ) -> UploadTask {
        let completion: DataCompletion = Box::new(completion);
        let info = self.task_info(TaskKind::Upload, request);
        UploadTask::new(DataTransfer::new(
            info,
            Arc::downgrade(&self.inner),
            Some(body.into()),
            completion,
        ))
    }

    /// Creates a suspended task that downloads `request` into a temporary file.
    pub fn download_task(
        &self,
        request: Request,
        completion: impl FnOnce(DownloadTaskResult) + Send + 'static,
    ) -> DownloadTask {
        let completion: DownloadCompletion = Box::new(completion);
        let info = self.task_info(TaskKind::Download, request);
        DownloadTask::new(DownloadTransfer::new(
            info,
            Arc::downgrade(&self.inner),
            completion,
        ))
    }

    /// Creates a suspended message stream for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingStreamTransport`] if the session was
    /// built without a stream transport, or
    /// [`SessionError::UnsupportedScheme`] unless the URL scheme is `ws`,
    /// `wss`, `http` or `https`.
    pub fn message_stream_task(&self, request: Request) -> Result<MessageStreamTask, SessionError> {
        if self.inner.stream_transport.is_none() {
            return Err(SessionError::MissingStreamTransport);
        }
        if !matches!(request.url().scheme(), "ws" | "wss" | "http" | "https") {
            return Err(SessionError::UnsupportedScheme {
                url: request.url().to_string(),
            });
        }
        let info = self.task_info(TaskKind::MessageStream, request);
        Ok(MessageStreamTask::new(info, Arc::downgrade(&self.inner)))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.inner.config)
            .field("stream_transport", &self.inner.stream_transport.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Session`].
///
/// Without an explicit transport, [`ReqwestTransport`] is used. Without an
/// explicit delivery context, callbacks run on a dedicated [`SerialQueue`]
/// thread named `netsession-delivery`.
#[derive(Default)]
pub struct SessionBuilder {
    config: SessionConfig,
    observers: Observers,
    delivery: Option<Arc<dyn ExecutionContext>>,
    transport: Option<Arc<dyn Transport>>,
    stream_transport: Option<Arc<dyn StreamTransport>>,
}

impl SessionBuilder {
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn session_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observers.session = Some(observer);
        self
    }

    #[must_use]
    pub fn task_observer(mut self, observer: Arc<dyn TaskObserver>) -> Self {
        self.observers.task = Some(observer);
        self
    }

    #[must_use]
    pub fn data_observer(mut self, observer: Arc<dyn DataObserver>) -> Self {
        self.observers.data = Some(observer);
        self
    }

    #[must_use]
    pub fn download_observer(mut self, observer: Arc<dyn DownloadObserver>) -> Self {
        self.observers.download = Some(observer);
        self
    }

    /// Sets the context result callbacks and observer events run on.
    #[must_use]
    pub fn delivery_context(mut self, context: Arc<dyn ExecutionContext>) -> Self {
        self.delivery = Some(context);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn stream_transport(mut self, transport: Arc<dyn StreamTransport>) -> Self {
        self.stream_transport = Some(transport);
        self
    }

    /// Builds the session, creating default transport and delivery context
    /// where none was given.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] or [`SessionError::DeliveryQueue`]
    /// if a default cannot be created.
    pub fn build(self) -> Result<Session, SessionError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new().map_err(SessionError::Transport)?),
        };
        let delivery = match self.delivery {
            Some(delivery) => delivery,
            None => Arc::new(
                SerialQueue::new(DEFAULT_DELIVERY_LABEL).map_err(SessionError::DeliveryQueue)?,
            ),
        };
        Ok(Session {
            inner: Arc::new(SessionInner {
                config: self.config,
                observers: self.observers,
                delivery,
                transport,
                stream_transport: self.stream_transport,
                next_task_id: AtomicU64::new(0),
            }),
        })
    }
}
