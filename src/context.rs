//! Execution contexts that result callbacks and observer events are delivered on.
//!
//! Transports report events from their own threads. Before anything reaches
//! caller code, tasks hop onto the session's [`ExecutionContext`] so callers
//! always observe results on one predictable context, in submission order.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A unit of work submitted to an [`ExecutionContext`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Capability to run a callback later on a specific logical context.
pub trait ExecutionContext: Send + Sync {
    /// Enqueues `job`. Must not block and must not run `job` on a context
    /// other than the one this value represents.
    fn submit(&self, job: Job);
}

/// Runs every job immediately on the submitting thread.
///
/// Useful in tests and for callers that already serialize their own
/// callbacks; results then arrive on the transport's thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineContext;

impl ExecutionContext for InlineContext {
    fn submit(&self, job: Job) {
        job();
    }
}

/// A FIFO queue drained by one dedicated, named thread.
///
/// The thread exits once every clone of the queue has been dropped and the
/// remaining jobs have run. A panicking job is logged and does not take the
/// queue down.
#[derive(Clone)]
pub struct SerialQueue {
    label: Arc<str>,
    sender: mpsc::UnboundedSender<Job>,
}

impl SerialQueue {
    /// Spawns the delivery thread for a new queue.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn new(label: &str) -> std::io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let thread_label = label.to_string();
        std::thread::Builder::new()
            .name(label.to_string())
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        warn!(queue = %thread_label, "delivered callback panicked");
                    }
                }
                debug!(queue = %thread_label, "delivery queue drained");
            })?;
        Ok(Self {
            label: Arc::from(label),
            sender,
        })
    }

    /// The label the delivery thread was named with.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext for SerialQueue {
    fn submit(&self, job: Job) {
        if self.sender.send(job).is_err() {
            warn!(queue = %self.label, "delivery thread gone; dropping callback");
        }
    }
}
