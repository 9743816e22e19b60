//! Task lifecycle: the base state machine shared by every task kind.
//!
//! A task is created suspended, starts its transport on the first
//! [`Task::resume`], and ends in [`TaskState::Completed`] exactly once. All
//! terminal paths (natural finish, transport failure, cancellation) go
//! through one latch held under the task's mutex, so a result callback fires
//! at most once even when a cancel races the transport's final event.
//!
//! # Kinds
//!
//! - [`DataTask`] - accumulates the body in memory
//! - [`UploadTask`] - a data task with a caller-supplied request body
//! - [`DownloadTask`] - streams the body into a temporary file
//! - [`MessageStreamTask`] - a persistent duplex message channel with its
//!   own state handling

mod data;
mod download;
mod stream;
mod upload;

pub use data::{DataCompletion, DataTask, DataTaskResult};
pub use download::{DownloadCompletion, DownloadTask, DownloadTaskResult};
pub(crate) use data::DataTransfer;
pub(crate) use download::DownloadTransfer;
pub use stream::{CloseCode, Message, MessageStreamTask};
pub use upload::UploadTask;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::debug;

use crate::context::Job;
use crate::error::TaskError;
use crate::observer::{AuthChallenge, AuthCompletion, AuthDisposition};
use crate::request::Request;
use crate::session::{Session, SessionInner};
use crate::transport::TransportHandle;

/// Identifier of a task, unique within the session that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Created or suspended; the initial state.
    Suspended,
    /// Resumed and not yet terminal.
    Running,
    /// A cancel won the latch; completion follows immediately.
    Canceling,
    /// Terminal. No further transitions.
    Completed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Suspended => "suspended",
            Self::Running => "running",
            Self::Canceling => "canceling",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// The kind of operation a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Data,
    Upload,
    Download,
    MessageStream,
}

/// Immutable description of a task, handed to observers.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    id: TaskId,
    kind: TaskKind,
    original_request: Request,
}

impl TaskInfo {
    pub(crate) fn new(id: TaskId, kind: TaskKind, original_request: Request) -> Self {
        Self {
            id,
            kind,
            original_request,
        }
    }

    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// The request as prepared by the session, before any kind-specific
    /// changes made when the transport request is assembled.
    #[must_use]
    pub fn original_request(&self) -> &Request {
        &self.original_request
    }
}

/// Common control surface of data, upload and download tasks.
pub trait Task: Send + Sync {
    fn info(&self) -> &TaskInfo;

    fn id(&self) -> TaskId {
        self.info().id()
    }

    fn original_request(&self) -> &Request {
        self.info().original_request()
    }

    fn state(&self) -> TaskState;

    /// The terminal error, once the task has failed or been cancelled.
    fn error(&self) -> Option<TaskError>;

    /// Starts the task, or flips a suspended task back to running.
    ///
    /// The transport is started on the first resume only.
    fn resume(&self);

    /// Marks a running task suspended.
    ///
    /// This is a state flag only: the transport is not paused and keeps
    /// delivering events, which are processed as usual.
    fn suspend(&self);

    /// Cancels a resumed, not yet completed task. The result callback then
    /// receives [`TaskError::Cancelled`]. A no-op before the first resume.
    fn cancel(&self);
}

/// Why a terminal path is trying to take the latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Latch {
    /// The caller cancelled.
    Cancel,
    /// A transport event (finished, failed) or a local failure ended the task.
    Event,
}

struct Slot<S> {
    state: TaskState,
    error: Option<TaskError>,
    started: bool,
    latched: bool,
    handle: Option<Box<dyn TransportHandle>>,
    inner: S,
}

/// State and latch shared by the transfer tasks, generic over the
/// kind-specific mutable state `S`.
pub(crate) struct TaskCore<S> {
    info: Arc<TaskInfo>,
    session: Weak<SessionInner>,
    slot: Mutex<Slot<S>>,
}

impl<S> TaskCore<S> {
    pub(crate) fn new(info: TaskInfo, session: Weak<SessionInner>, inner: S) -> Self {
        Self {
            info: Arc::new(info),
            session,
            slot: Mutex::new(Slot {
                state: TaskState::Suspended,
                error: None,
                started: false,
                latched: false,
                handle: None,
                inner,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<S>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn info(&self) -> &TaskInfo {
        &self.info
    }

    pub(crate) fn shared_info(&self) -> Arc<TaskInfo> {
        Arc::clone(&self.info)
    }

    pub(crate) fn url(&self) -> String {
        self.info.original_request.url().to_string()
    }

    pub(crate) fn session(&self) -> Option<Session> {
        self.session.upgrade().map(Session::from_inner)
    }

    pub(crate) fn state(&self) -> TaskState {
        self.lock().state
    }

    pub(crate) fn error(&self) -> Option<TaskError> {
        self.lock().error.clone()
    }

    /// Moves a suspended task to running. Returns `true` exactly once, on
    /// the resume that must start the transport.
    pub(crate) fn resume(&self) -> bool {
        let mut slot = self.lock();
        if slot.state != TaskState::Suspended {
            return false;
        }
        slot.state = TaskState::Running;
        let first = !slot.started;
        slot.started = true;
        debug!(task_id = %self.info.id, first, "task resumed");
        first
    }

    pub(crate) fn suspend(&self) {
        let mut slot = self.lock();
        if slot.state == TaskState::Running {
            slot.state = TaskState::Suspended;
            debug!(task_id = %self.info.id, "task suspended");
        }
    }

    /// Records the handle of a freshly started transport. If the task
    /// already latched (cancelled, or finished synchronously during start),
    /// the handle is cancelled instead of kept.
    pub(crate) fn attach_handle(&self, handle: Box<dyn TransportHandle>) {
        let mut slot = self.lock();
        if slot.latched {
            drop(slot);
            handle.cancel();
            return;
        }
        slot.handle = Some(handle);
    }

    /// Runs `update` on the kind state unless the task has already latched.
    pub(crate) fn with_live<R>(&self, update: impl FnOnce(&mut S) -> R) -> Option<R> {
        let mut slot = self.lock();
        if slot.latched {
            return None;
        }
        Some(update(&mut slot.inner))
    }

    /// Takes the exactly-once latch.
    ///
    /// Returns `None` if another terminal path got there first, or for a
    /// cancel on a task that never started. Otherwise `build` extracts what
    /// the result needs from the kind state, and the transport handle (if
    /// any) is handed back so the caller can cancel it outside the lock.
    pub(crate) fn latch<R>(
        &self,
        cause: Latch,
        build: impl FnOnce(&mut S) -> R,
    ) -> Option<(R, Option<Box<dyn TransportHandle>>)> {
        let mut slot = self.lock();
        if slot.latched || slot.state == TaskState::Completed {
            return None;
        }
        if cause == Latch::Cancel {
            if !slot.started {
                return None;
            }
            slot.state = TaskState::Canceling;
        }
        slot.latched = true;
        let handle = slot.handle.take();
        Some((build(&mut slot.inner), handle))
    }

    /// Completes a latched task: stores `error`, moves to completed, then
    /// delivers `result` followed by the task observer's `did_complete`.
    pub(crate) fn finish_task(&self, error: Option<TaskError>, result: Job) {
        {
            let mut slot = self.lock();
            slot.error.clone_from(&error);
            slot.state = TaskState::Completed;
        }
        debug!(
            task_id = %self.info.id,
            failed = error.is_some(),
            "task completed"
        );

        let Some(inner) = self.session.upgrade() else {
            result();
            return;
        };
        inner.delivery.submit(result);
        if let Some(observer) = inner.observers.task.clone() {
            let session = Session::from_inner(Arc::clone(&inner));
            let info = self.shared_info();
            inner.delivery.submit(Box::new(move || {
                observer.did_complete(&session, &info, error.as_ref());
            }));
        }
    }

    /// Submits `job` to the session's delivery context.
    pub(crate) fn deliver(&self, job: Job) {
        deliver(&self.session, job);
    }

    /// Routes an authentication challenge: task observer first, then the
    /// session observer, then default handling.
    pub(crate) fn dispatch_challenge(&self, challenge: AuthChallenge, completion: AuthCompletion) {
        let Some(session) = self.session() else {
            completion(AuthDisposition::PerformDefaultHandling);
            return;
        };
        let observers = &session.inner.observers;
        if let Some(observer) = observers.task.clone() {
            let info = self.shared_info();
            let target = session.clone();
            session.inner.delivery.submit(Box::new(move || {
                observer.did_receive_challenge(&target, &info, &challenge, completion);
            }));
        } else if let Some(observer) = observers.session.clone() {
            let target = session.clone();
            session.inner.delivery.submit(Box::new(move || {
                observer.did_receive_challenge(&target, &challenge, completion);
            }));
        } else {
            completion(AuthDisposition::PerformDefaultHandling);
        }
    }
}

/// Submits `job` to the delivery context of `session`, or runs it inline
/// once the session is gone.
pub(crate) fn deliver(session: &Weak<SessionInner>, job: Job) {
    match session.upgrade() {
        Some(inner) => inner.delivery.submit(job),
        None => job(),
    }
}
