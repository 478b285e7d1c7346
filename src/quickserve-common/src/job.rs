use thiserror::Error;
use tokio::sync::oneshot;

use crate::exec::{ExecSource, ExecutionResult};
use crate::output::ScriptOutput;
use crate::registry::RouteKey;
use crate::request::ScriptRequest;

/// Terminal failure of a job, as observed by the producer awaiting it.
///
/// Script-level errors are not job errors: an evaluation that throws still
/// completes its job (the error lands in the execution record), and a
/// handler that throws completes with a 500 reply.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The dispatcher is shutting down and drained the job unprocessed.
    #[error("job canceled: dispatcher shutting down")]
    Canceled,
    /// The engine activation panicked; the dispatcher recovered and kept
    /// running.
    #[error("JavaScript error: {0}")]
    Panic(String),
    /// The callable threw. The message becomes the 500 response body.
    #[error("{0}")]
    Script(String),
}

/// An execution job handed from an HTTP task to the dispatcher.
#[derive(Debug)]
pub enum Job {
    /// Raw code submission.
    Eval(EvalJob),
    /// Invocation of a registered callable.
    Handler(HandlerJob),
}

/// Raw code submission.
#[derive(Debug)]
pub struct EvalJob {
    /// JavaScript source, treated as opaque text.
    pub code: String,
    /// Session the submission belongs to.
    pub session_id: String,
    /// Where the submission came from.
    pub source: ExecSource,
    /// When present, the dispatcher evaluates with console capture and sends
    /// the full result here.
    pub result: Option<oneshot::Sender<ExecutionResult>>,
    /// Signaled exactly once when the job leaves the dispatcher.
    pub done: Option<oneshot::Sender<Result<(), JobError>>>,
}

/// What a handler job resolves to on the HTTP side.
#[derive(Debug)]
pub enum RouteTarget {
    /// A registered `(path, method)` handler.
    Handler(RouteKey),
    /// A registered file callable.
    File(String),
}

/// Successful outcome of a handler invocation.
#[derive(Debug)]
pub struct HandlerOutcome {
    /// The handler's return value, exported to a host shape.
    pub output: ScriptOutput,
    /// Content-type override carried by the matched record.
    pub content_type: Option<String>,
}

/// Invocation of a registered callable for one HTTP request.
#[derive(Debug)]
pub struct HandlerJob {
    /// Which callable to invoke.
    pub target: RouteTarget,
    /// Content-type override resolved by the router at match time.
    pub content_type: Option<String>,
    /// The request value to pass to the callable.
    pub request: ScriptRequest,
    /// Receives the reply; doubles as the job's done signal. Oneshot sends
    /// never block, so an HTTP task that gave up waiting cannot wedge the
    /// dispatcher.
    pub respond: oneshot::Sender<Result<HandlerOutcome, JobError>>,
}

impl Job {
    /// Signal the job's sinks with a terminal error without processing it.
    /// Used when draining the queue on shutdown and when recovering from a
    /// panic.
    pub fn fail(self, error: JobError) {
        match self {
            Job::Eval(job) => {
                if let Some(result) = job.result {
                    let _ = result.send(ExecutionResult::from_error(&error));
                }
                if let Some(done) = job.done {
                    let _ = done.send(Err(error));
                }
            }
            Job::Handler(job) => {
                let _ = job.respond.send(Err(error));
            }
        }
    }
}
