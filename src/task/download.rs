//! Download tasks: stream the response body into a temporary file.
//!
//! The file lives at `<temp dir>/netsession-<uuid>.download`. It is removed
//! when the task fails or is cancelled. On success it is handed to the
//! caller, who owns it from then on (move it, or delete it when done).

use std::fmt;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Latch, Task, TaskCore, TaskInfo, TaskState};
use crate::error::TaskError;
use crate::observer::{AuthChallenge, AuthCompletion};
use crate::request::Response;
use crate::session::SessionInner;
use crate::transport::{TransportError, TransportObserver};

/// One-shot result callback of a download task.
pub type DownloadCompletion = Box<dyn FnOnce(DownloadTaskResult) + Send + 'static>;

#[derive(Debug, Clone)]
enum Outcome {
    Success {
        location: PathBuf,
        response: Response,
    },
    Failure {
        response: Option<Response>,
        error: TaskError,
    },
}

/// What a download task delivers to its result callback.
#[derive(Debug, Clone)]
pub struct DownloadTaskResult {
    outcome: Outcome,
}

impl DownloadTaskResult {
    /// Where the downloaded body was written. `None` on failure, in which
    /// case the temporary file no longer exists.
    #[must_use]
    pub fn location(&self) -> Option<&Path> {
        match &self.outcome {
            Outcome::Success { location, .. } => Some(location),
            Outcome::Failure { .. } => None,
        }
    }

    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        match &self.outcome {
            Outcome::Success { response, .. } => Some(response),
            Outcome::Failure { response, .. } => response.as_ref(),
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&TaskError> {
        match &self.outcome {
            Outcome::Success { .. } => None,
            Outcome::Failure { error, .. } => Some(error),
        }
    }

    /// Converts into a `Result` of the file location and response.
    ///
    /// # Errors
    ///
    /// Returns the task's terminal error.
    pub fn into_result(self) -> Result<(PathBuf, Response), TaskError> {
        match self.outcome {
            Outcome::Success { location, response } => Ok((location, response)),
            Outcome::Failure { error, .. } => Err(error),
        }
    }
}

pub(crate) struct DownloadState {
    file: Option<File>,
    location: Option<PathBuf>,
    written: u64,
    response: Option<Response>,
    completion: Option<DownloadCompletion>,
}

struct Partial {
    location: Option<PathBuf>,
    response: Option<Response>,
    completion: Option<DownloadCompletion>,
}

/// Closes the file handle and takes what a failure result needs.
fn take_partial(state: &mut DownloadState) -> Partial {
    state.file = None;
    Partial {
        location: state.location.take(),
        response: state.response.take(),
        completion: state.completion.take(),
    }
}

/// Transport-facing half of a download task.
pub(crate) struct DownloadTransfer {
    core: TaskCore<DownloadState>,
}

impl DownloadTransfer {
    pub(crate) fn new(
        info: TaskInfo,
        session: Weak<SessionInner>,
        completion: DownloadCompletion,
    ) -> Arc<Self> {
        let state = DownloadState {
            file: None,
            location: None,
            written: 0,
            response: None,
            completion: Some(completion),
        };
        Arc::new(Self {
            core: TaskCore::new(info, session, state),
        })
    }

    pub(crate) fn core(&self) -> &TaskCore<DownloadState> {
        &self.core
    }

    fn temp_location() -> PathBuf {
        std::env::temp_dir().join(format!("netsession-{}.download", Uuid::new_v4()))
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

        let location = Self::temp_location();
        let file = match File::create(&location) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %location.display(), error = %e, "cannot create download file");
                self.fail(TaskError::io(location, e));
                return;
            }
        };
        let stored = self.core.with_live(|state| {
            state.file = Some(file);
            state.location = Some(location.clone());
        });
        if stored.is_none() {
            discard(&location);
            return;
        }
        debug!(task_id = %self.core.info().id(), path = %location.display(), "download file created");

        let request = self.core.info().original_request().clone();
        let timeouts = session.configuration().timeouts();
        let observer: Arc<dyn TransportObserver> = Arc::clone(self) as Arc<dyn TransportObserver>;
        let handle = session.inner.transport.start(request, timeouts, observer);
        self.core.attach_handle(handle);
    }

    pub(crate) fn cancel(&self) {
        let Some((partial, handle)) = self.core.latch(Latch::Cancel, take_partial) else {
            return;
        };
        if let Some(handle) = handle {
            handle.cancel();
        }
        debug!(task_id = %self.core.info().id(), "download task cancelled");
        self.abandon(partial, TaskError::cancelled(self.core.url()));
    }

    fn fail(&self, error: TaskError) {
        let Some((partial, handle)) = self.core.latch(Latch::Event, take_partial) else {
            return;
        };
        if let Some(handle) = handle {
            handle.cancel();
        }
        self.abandon(partial, error);
    }

    /// Removes the temporary file and delivers a failure.
    fn abandon(&self, partial: Partial, error: TaskError) {
        if let Some(location) = &partial.location {
            discard(location);
        }
        let result = DownloadTaskResult {
            outcome: Outcome::Failure {
                response: partial.response,
                error: error.clone(),
            },
        };
        let completion = partial.completion;
        self.core.finish_task(
            Some(error),
            Box::new(move || {
                if let Some(completion) = completion {
                    completion(result);
                }
            }),
        );
    }
}

fn discard(location: &Path) {
    match std::fs::remove_file(location) {
        Ok(()) => debug!(path = %location.display(), "download file removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %location.display(), error = %e, "failed to remove download file"),
    }
}

fn append(file: &mut File, chunk: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::End(0))?;
    file.write_all(chunk)
}

impl TransportObserver for DownloadTransfer {
    fn on_response(&self, response: Response) {
        self.core.with_live(|state| state.response = Some(response));
    }

    fn on_data(&self, chunk: Bytes) {
        let written = self.core.with_live(|state| {
            let (Some(file), Some(location)) = (state.file.as_mut(), state.location.as_ref())
            else {
                return Ok(None);
            };
            match append(file, &chunk) {
                Ok(()) => {
                    state.written += chunk.len() as u64;
                    let expected = state
                        .response
                        .as_ref()
                        .and_then(Response::expected_content_length);
                    Ok(Some((state.written, expected)))
                }
                Err(e) => Err(TaskError::io(location.clone(), e)),
            }
        });

        match written {
            None | Some(Ok(None)) => {}
            Some(Err(error)) => {
                warn!(task_id = %self.core.info().id(), error = %error, "download write failed");
                self.fail(error);
            }
            Some(Ok(Some((total, expected)))) => {
                let Some(session) = self.core.session() else {
                    return;
                };
                if let Some(observer) = session.inner.observers.download.clone() {
                    let info = self.core.shared_info();
                    let target = session.clone();
                    let bytes = chunk.len() as u64;
                    self.core.deliver(Box::new(move || {
                        observer.did_write_data(&target, &info, bytes, total, expected);
                    }));
                }
            }
        }
    }

    fn on_finished(&self) {
        let synthesized = || Response::synthesized(self.core.info().original_request());
        let Some(((location, written, response, completion), _)) =
            self.core.latch(Latch::Event, |state| {
                state.file = None;
                (
                    state.location.take(),
                    state.written,
                    state.response.take().unwrap_or_else(synthesized),
                    state.completion.take(),
                )
            })
        else {
            return;
        };
        let Some(location) = location else {
            let partial = Partial {
                location: None,
                response: Some(response),
                completion,
            };
            let error = TransportError::Other("download finished without a file".to_string());
            self.abandon(partial, TaskError::transport(self.core.url(), error));
            return;
        };
        info!(
            task_id = %self.core.info().id(),
            bytes = written,
            path = %location.display(),
            "download finished"
        );

        let observer = self
            .core
            .session()
            .and_then(|session| session.inner.observers.download.clone().map(|o| (session, o)));
        let info = self.core.shared_info();
        let result = DownloadTaskResult {
            outcome: Outcome::Success {
                location: location.clone(),
                response,
            },
        };
        self.core.finish_task(
            None,
            Box::new(move || {
                if let Some(completion) = completion {
                    completion(result);
                }
                if let Some((session, observer)) = observer {
                    observer.did_finish_downloading(&session, &info, &location);
                }
            }),
        );
    }

    fn on_failed(&self, error: TransportError) {
        self.fail(TaskError::transport(self.core.url(), error));
    }

    fn on_auth_challenge(&self, challenge: AuthChallenge, completion: AuthCompletion) {
        self.core.dispatch_challenge(challenge, completion);
    }
}

/// A task that downloads the response body into a temporary file.
///
/// Created with [`Session::download_task`](crate::Session::download_task).
pub struct DownloadTask {
    transfer: Arc<DownloadTransfer>,
}

impl DownloadTask {
    pub(crate) fn new(transfer: Arc<DownloadTransfer>) -> Self {
        Self { transfer }
    }
}

impl fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadTask")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Task for DownloadTask {
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

    /// Cancels the download and removes its temporary file.
    fn cancel(&self) {
        self.transfer.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_location_is_unique_in_temp_dir() {
        let a = DownloadTransfer::temp_location();
        let b = DownloadTransfer::temp_location();
        assert_ne!(a, b);
        assert_eq!(a.parent().unwrap(), std::env::temp_dir());
        let name = a.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("netsession-"), "got: {name}");
        assert!(
            Path::new(name)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("download")),
            "got: {name}"
        );
    }

    #[test]
    fn test_append_writes_at_end() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.download");
        let mut file = File::create(&path).unwrap();
        append(&mut file, b"ab").unwrap();
        append(&mut file, b"cd").unwrap();
        drop(file);
        assert_eq!(std::fs::read(&path).unwrap(), b"abcd");
    }

    #[test]
    fn test_discard_ignores_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        discard(&dir.path().join("missing.download"));
    }
}
