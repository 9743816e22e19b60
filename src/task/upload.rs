//! Upload tasks: data tasks that send a caller-supplied body.

use std::fmt;
use std::sync::Arc;

use super::data::DataTransfer;
use super::{Task, TaskInfo, TaskState};
use crate::error::TaskError;

/// A task that sends a body and collects the response in memory.
///
/// The body given to [`Session::upload_task`](crate::Session::upload_task)
/// replaces any body on the request, and `Content-Length` is set to its size.
/// Results use the same [`DataTaskResult`](super::DataTaskResult) as data tasks.
pub struct UploadTask {
    transfer: Arc<DataTransfer>,
}

impl UploadTask {
    pub(crate) fn new(transfer: Arc<DataTransfer>) -> Self {
        Self { transfer }
    }
}

impl fmt::Debug for UploadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTask")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Task for UploadTask {
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
