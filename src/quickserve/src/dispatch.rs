//! The dispatcher: the single consumer of the job queue and the only thread
//! that ever activates the JS runtime.
//!
//! The runtime is constructed on the dispatcher thread and never leaves it,
//! so the at-most-one-activation invariant holds by construction. Every job
//! runs inside a recovery frame; a panic fails the one job and the loop
//! keeps going.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use quickserve_common::{
    EvalJob, ExecutionResult, HandlerJob, HandlerOutcome, HandlerRegistry, Job, JobError,
};
use quickserve_runtime::ScriptRuntime;
use rusqlite::Connection;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::metrics::{
    METRIC_EVAL_ERRORS_TOTAL, METRIC_HANDLER_CALLS_TOTAL, METRIC_JOB_KIND_LABEL,
    METRIC_JOB_PANICS_TOTAL, METRIC_JOBS_TOTAL,
};
use crate::store::{ExecutionStore, NewExecution};

/// Handle on the dispatcher thread.
pub struct Dispatcher {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn the dispatcher thread. The runtime is built on that thread;
    /// if construction fails the thread drains every job as canceled.
    pub fn spawn(
        receiver: mpsc::Receiver<Job>,
        registry: Arc<HandlerRegistry>,
        connection: Arc<Mutex<Connection>>,
        store: ExecutionStore,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = std::thread::Builder::new()
            .name("quickserve-dispatcher".to_string())
            .spawn(move || run(receiver, registry, connection, store, flag))
            .unwrap_or_else(|error| {
                // Thread spawn failing this early is unrecoverable.
                panic!("failed to spawn the dispatcher thread: {error}")
            });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Ask the dispatcher to drain remaining jobs as canceled. The thread
    /// exits once every producer handle is dropped.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Wait for the dispatcher thread to exit.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("dispatcher thread terminated by panic");
        }
    }
}

fn run(
    mut receiver: mpsc::Receiver<Job>,
    registry: Arc<HandlerRegistry>,
    connection: Arc<Mutex<Connection>>,
    store: ExecutionStore,
    shutdown: Arc<AtomicBool>,
) {
    let runtime = match ScriptRuntime::new(registry, connection) {
        Ok(runtime) => runtime,
        Err(error) => {
            error!(%error, "failed to construct the JS runtime; draining jobs");
            while let Some(job) = receiver.blocking_recv() {
                job.fail(JobError::Canceled);
            }
            return;
        }
    };

    info!("dispatcher running");
    while let Some(job) = receiver.blocking_recv() {
        if shutdown.load(Ordering::Relaxed) {
            job.fail(JobError::Canceled);
            continue;
        }
        process(&runtime, &store, job);
    }
    info!("dispatcher stopped");
}

fn process(runtime: &ScriptRuntime, store: &ExecutionStore, job: Job) {
    match job {
        Job::Eval(job) => {
            metrics::counter!(METRIC_JOBS_TOTAL, METRIC_JOB_KIND_LABEL => "eval").increment(1);
            process_eval(runtime, store, job);
        }
        Job::Handler(job) => {
            metrics::counter!(METRIC_JOBS_TOTAL, METRIC_JOB_KIND_LABEL => "handler").increment(1);
            process_handler(runtime, job);
        }
    }
}

fn process_eval(runtime: &ScriptRuntime, store: &ExecutionStore, job: EvalJob) {
    let EvalJob {
        code,
        session_id,
        source,
        result,
        done,
    } = job;
    let capture = result.is_some();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let execution = if capture {
            runtime.eval_with_capture(&code)
        } else {
            match runtime.eval_raw(&code) {
                Ok(value) => ExecutionResult {
                    value,
                    console: Vec::new(),
                    error: None,
                },
                Err(error) => ExecutionResult::from_error(format!("{error:#}")),
            }
        };

        if execution.error.is_some() {
            metrics::counter!(METRIC_EVAL_ERRORS_TOTAL).increment(1);
        }

        store.append(NewExecution {
            session_id: session_id.clone(),
            code: code.clone(),
            result: serde_json::to_string(&execution.value).ok(),
            console_log: Some(execution.console_text()).filter(|text| !text.is_empty()),
            error: execution.error.clone(),
            source,
        });

        execution
    }));

    match outcome {
        Ok(execution) => {
            if let Some(sink) = result {
                let _ = sink.send(execution);
            }
            if let Some(sink) = done {
                let _ = sink.send(Ok(()));
            }
        }
        Err(panic) => {
            let message = panic_message(panic);
            metrics::counter!(METRIC_JOB_PANICS_TOTAL).increment(1);
            error!(%message, "panic during code submission");
            if let Some(sink) = result {
                let _ = sink.send(ExecutionResult::from_error(&message));
            }
            if let Some(sink) = done {
                let _ = sink.send(Err(JobError::Panic(message)));
            }
        }
    }
}

fn process_handler(runtime: &ScriptRuntime, job: HandlerJob) {
    let HandlerJob {
        target,
        content_type,
        request,
        respond,
    } = job;
    metrics::counter!(METRIC_HANDLER_CALLS_TOTAL).increment(1);

    let outcome = catch_unwind(AssertUnwindSafe(|| runtime.invoke(&target, &request)));

    let reply = match outcome {
        Ok(Ok(output)) => Ok(HandlerOutcome {
            output,
            content_type,
        }),
        Ok(Err(error)) => Err(JobError::Script(format!("{error:#}"))),
        Err(panic) => {
            let message = panic_message(panic);
            metrics::counter!(METRIC_JOB_PANICS_TOTAL).increment(1);
            error!(%message, "panic during handler invocation");
            Err(JobError::Panic(message))
        }
    };

    let _ = respond.send(reply);
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
