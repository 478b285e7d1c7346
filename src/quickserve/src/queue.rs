//! The bounded job queue between the HTTP side and the dispatcher.

use quickserve_common::{Job, JobError};
use tokio::sync::mpsc;

/// Default capacity of the job queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Producer handle on the job queue. HTTP tasks clone this freely; the
/// single consumer is the dispatcher thread.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<Job>,
}

impl JobQueue {
    /// Create the queue, returning the producer handle and the receiving
    /// half for [`crate::Dispatcher::spawn`].
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueue a job, waiting while the queue is full (backpressure).
    ///
    /// When the dispatcher is gone the job's sinks are signaled with
    /// [`JobError::Canceled`] before returning the error.
    pub async fn submit(&self, job: Job) -> Result<(), JobError> {
        match self.sender.send(job).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(job)) => {
                job.fail(JobError::Canceled);
                Err(JobError::Canceled)
            }
        }
    }
}
