//! In-memory data tasks.

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use reqwest::header::{CONTENT_LENGTH, HeaderValue};
use tracing::debug;

use super::{Latch, Task, TaskCore, TaskInfo, TaskState};
use crate::error::TaskError;
use crate::observer::{AuthChallenge, AuthCompletion, ResponseDisposition};
use crate::request::{Request, Response};
use crate::session::SessionInner;
use crate::transport::{TransportError, TransportObserver};

/// One-shot result callback of a data or upload task.
pub type DataCompletion = Box<dyn FnOnce(DataTaskResult) + Send + 'static>;

#[derive(Debug, Clone)]
enum Outcome {
    Success(Response),
    Failure {
        response: Option<Response>,
        error: TaskError,
    },
}

/// What a data or upload task delivers to its result callback.
///
/// The body is always present: on failure or cancellation it holds whatever
/// arrived before the task ended.
#[derive(Debug, Clone)]
pub struct DataTaskResult {
    body: Bytes,
    outcome: Outcome,
}

impl DataTaskResult {
    fn success(body: Bytes, response: Response) -> Self {
        Self {
            body,
            outcome: Outcome::Success(response),
        }
    }

    fn failure(body: Bytes, response: Option<Response>, error: TaskError) -> Self {
        Self {
            body,
            outcome: Outcome::Failure { response, error },
        }
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The response, if one was received (always present on success).
    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        match &self.outcome {
            Outcome::Success(response) => Some(response),
            Outcome::Failure { response, .. } => response.as_ref(),
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&TaskError> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure { error, .. } => Some(error),
        }
    }

    /// Converts into a `Result`, discarding partial data on failure.
    ///
    /// # Errors
    ///
    /// Returns the task's terminal error.
    pub fn into_result(self) -> Result<(Bytes, Response), TaskError> {
        match self.outcome {
            Outcome::Success(response) => Ok((self.body, response)),
            Outcome::Failure { error, .. } => Err(error),
        }
    }
}

pub(crate) struct TransferState {
    body: BytesMut,
    response: Option<Response>,
    completion: Option<DataCompletion>,
}

/// Transport-facing half of a data or upload task.
pub(crate) struct DataTransfer {
    core: TaskCore<TransferState>,
    upload_body: Option<Bytes>,
}

impl DataTransfer {
    pub(crate) fn new(
        info: TaskInfo,
        session: Weak<SessionInner>,
        upload_body: Option<Bytes>,
        completion: DataCompletion,
    ) -> Arc<Self> {
        let state = TransferState {
            body: BytesMut::new(),
            response: None,
            completion: Some(completion),
        };
        Arc::new(Self {
            core: TaskCore::new(info, session, state),
            upload_body,
        })
    }

    pub(crate) fn core(&self) -> &TaskCore<TransferState> {
        &self.core
    }

    /// Copy of the original request with the body to send attached and
    /// `Content-Length` set to its size.
    fn transport_request(&self) -> Request {
        let mut request = self.core.info().original_request().clone();
        let body = self
            .upload_body
            .clone()
            .or_else(|| request.body().cloned());
        if let Some(body) = &body {
            request
                .headers_mut()
                .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }
        request.set_body(body);
        request
    }

    pub(crate) fn resume(self: &Arc<Self>) {
        if !self.core.resume() {
            return;
        }
        let Some(session) = self.core.session() else {
            self.fail(TaskError::transport(
                self.core.url(),
                TransportError::Other("session dropped before the task started".to_string()),
            ));
            return;
        };
        let request = self.transport_request();
        let timeouts = session.configuration().timeouts();
        let observer: Arc<dyn TransportObserver> = Arc::clone(self) as Arc<dyn TransportObserver>;
        let handle = session.inner.transport.start(request, timeouts, observer);
        self.core.attach_handle(handle);
    }

    pub(crate) fn cancel(&self) {
        let Some(((body, response, completion), handle)) =
            self.core.latch(Latch::Cancel, take_partial)
        else {
            return;
        };
        if let Some(handle) = handle {
            handle.cancel();
        }
        let error = TaskError::cancelled(self.core.url());
        debug!(task_id = %self.core.info().id(), "data task cancelled");
        self.complete(DataTaskResult::failure(body, response, error.clone()), Some(error), completion);
    }

    fn fail(&self, error: TaskError) {
        let Some(((body, response, completion), _)) = self.core.latch(Latch::Event, take_partial)
        else {
            return;
        };
        self.complete(DataTaskResult::failure(body, response, error.clone()), Some(error), completion);
    }

    fn complete(
        &self,
        result: DataTaskResult,
        error: Option<TaskError>,
        completion: Option<DataCompletion>,
    ) {
        self.core.finish_task(
            error,
            Box::new(move || {
                if let Some(completion) = completion {
                    completion(result);
                }
            }),
        );
    }
}

fn take_partial(state: &mut TransferState) -> (Bytes, Option<Response>, Option<DataCompletion>) {
    (
        std::mem::take(&mut state.body).freeze(),
        state.response.take(),
        state.completion.take(),
    )
}

impl TransportObserver for DataTransfer {
    fn on_response(&self, response: Response) {
        let recorded = self
            .core
            .with_live(|state| state.response = Some(response.clone()));
        if recorded.is_none() {
            return;
        }
        let Some(session) = self.core.session() else {
            return;
        };
        if let Some(observer) = session.inner.observers.data.clone() {
            let info = self.core.shared_info();
            let target = session.clone();
            self.core.deliver(Box::new(move || {
                let disposition = observer.did_receive_response(&target, &info, &response);
                if disposition == ResponseDisposition::Cancel {
                    debug!(task_id = %info.id(), "response disposition ignored; task continues");
                }
            }));
        }
    }

    fn on_data(&self, chunk: Bytes) {
        let appended = self
            .core
            .with_live(|state| state.body.extend_from_slice(&chunk));
        if appended.is_none() {
            return;
        }
        let Some(session) = self.core.session() else {
            return;
        };
        if let Some(observer) = session.inner.observers.data.clone() {
            let info = self.core.shared_info();
            let target = session.clone();
            self.core.deliver(Box::new(move || {
                observer.did_receive_data(&target, &info, &chunk);
            }));
        }
    }

    fn on_finished(&self) {
        let synthesized = || Response::synthesized(self.core.info().original_request());
        let Some(((body, response, completion), _)) =
            self.core.latch(Latch::Event, |state| {
                let (body, response, completion) = take_partial(state);
                (body, response.unwrap_or_else(synthesized), completion)
            })
        else {
            return;
        };
        debug!(
            task_id = %self.core.info().id(),
            bytes = body.len(),
            status = response.status().as_u16(),
            "data task finished"
        );
        self.complete(DataTaskResult::success(body, response), None, completion);
    }

    fn on_failed(&self, error: TransportError) {
        self.fail(TaskError::transport(self.core.url(), error));
    }

    fn on_auth_challenge(&self, challenge: AuthChallenge, completion: AuthCompletion) {
        self.core.dispatch_challenge(challenge, completion);
    }
}

/// A task that collects the whole response body in memory.
///
/// Created with [`Session::data_task`](crate::Session::data_task). Dropping
/// the handle does not cancel a running task; its result is still delivered.
pub struct DataTask {
    transfer: Arc<DataTransfer>,
}

impl DataTask {
    pub(crate) fn new(transfer: Arc<DataTransfer>) -> Self {
        Self { transfer }
    }
}

impl fmt::Debug for DataTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTask")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Task for DataTask {
    fn info(&self) -> &TaskInfo {
        self.transfer.core().info()
    }

    fn state(&self) -> TaskState {
        self.transfer.core().state()
    }

    fn error(&self) -> Option<TaskError> {
        self.transfer.core().error()
    }

    fn resume(&self) {
        self.transfer.resume();
    }

    fn suspend(&self) {
        self.transfer.core().suspend();
    }

    fn cancel(&self) {
        self.transfer.cancel();
    }
}
