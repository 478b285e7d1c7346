//! quickserve is a live-programmable HTTP server.
//!
//! An operator POSTs JavaScript to `/v1/execute`; the code runs inside the
//! embedded runtime and registers route and file handlers that become
//! reachable immediately on the same server. The HTTP side stays fully
//! concurrent while every script activation is serialized onto a single
//! dispatcher thread that owns the runtime.
#![deny(dead_code, missing_docs, unused_mut)]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]

pub mod bridge;
pub mod dispatch;
pub mod loader;
mod metrics;
pub mod queue;
pub mod router;
pub mod store;

pub use dispatch::Dispatcher;
pub use queue::{DEFAULT_QUEUE_CAPACITY, JobQueue};
pub use router::{AppState, app};
pub use store::{ExecutionRecord, ExecutionStore, ListFilter, NewExecution, StoreError};
