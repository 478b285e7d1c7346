/*!
This module contains the definitions of the metrics emitted by the dispatcher
and the dynamic router.
*/

// Counters, jobs drained from the queue during the lifetime of the process
pub(crate) static METRIC_JOBS_TOTAL: &str = "dispatcher_jobs_total";
pub(crate) static METRIC_JOB_PANICS_TOTAL: &str = "dispatcher_job_panics_total";

// Counters, script activity
pub(crate) static METRIC_EVAL_ERRORS_TOTAL: &str = "script_eval_errors_total";
pub(crate) static METRIC_HANDLER_CALLS_TOTAL: &str = "handler_calls_total";

// Counter, requests that matched no handler or file registration
pub(crate) static METRIC_UNROUTED_TOTAL: &str = "unrouted_requests_total";

// Label distinguishing eval jobs from handler jobs
pub(crate) static METRIC_JOB_KIND_LABEL: &str = "kind";
