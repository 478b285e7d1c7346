//! This crate hosts the embedded QuickJS engine for quickserve.
//!
//! One [`ScriptRuntime`] owns one engine instance. All methods must be called
//! from the thread that constructed it (the dispatcher thread); nothing here
//! is `Send`, which is what makes the single-activation contract a type-level
//! fact rather than a convention.
#![deny(dead_code, missing_docs, unused_mut)]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]

mod globals;
mod output;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use parking_lot::Mutex;
use quickserve_common::{
    ConsoleLine, ExecutionResult, HandlerRegistry, RouteKey, RouteTarget, ScriptOutput,
    ScriptRequest,
};
use rquickjs::{CaughtError, Context, Ctx, Function, Persistent, Runtime, Value};
use rusqlite::Connection;
use tracing::instrument;

/// Identity of a stored callable. Handlers are keyed by `(path, method)`,
/// file callables by path alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum CallableKey {
    Route(RouteKey),
    File(String),
}

impl From<&RouteTarget> for CallableKey {
    fn from(target: &RouteTarget) -> Self {
        match target {
            RouteTarget::Handler(key) => CallableKey::Route(key.clone()),
            RouteTarget::File(path) => CallableKey::File(path.clone()),
        }
    }
}

/// State shared between the runtime and its capability bindings.
///
/// Bindings hold an `Rc` to this and only ever run on the runtime's thread,
/// so `RefCell` is all the interior mutability needed.
pub(crate) struct RuntimeShared {
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) connection: Arc<Mutex<Connection>>,
    pub(crate) callables: RefCell<HashMap<CallableKey, Persistent<Function<'static>>>>,
    // Armed while an eval runs with capture; console bindings append here.
    pub(crate) console: RefCell<Option<Vec<ConsoleLine>>>,
}

impl RuntimeShared {
    pub(crate) fn store_callable(&self, key: CallableKey, func: Persistent<Function<'static>>) {
        self.callables.borrow_mut().insert(key, func);
    }
}

/// The embedded JS engine plus installed capability bindings.
///
/// Global state accumulates across evaluations for the lifetime of the
/// runtime: registered callables, `globalState`, and anything scripts attach
/// to the global scope.
pub struct ScriptRuntime {
    context: Context,
    shared: Rc<RuntimeShared>,
    _runtime: Runtime,
}

impl ScriptRuntime {
    /// Create a runtime with the capability surface installed and the
    /// `globalState` bootstrap evaluated.
    #[instrument(skip_all, level = "info")]
    pub fn new(
        registry: Arc<HandlerRegistry>,
        connection: Arc<Mutex<Connection>>,
    ) -> anyhow::Result<Self> {
        let runtime = Runtime::new().context("unable to initialize the JS engine")?;
        let context = Context::full(&runtime).context("unable to create the JS context")?;

        let shared = Rc::new(RuntimeShared {
            registry,
            connection,
            callables: RefCell::new(HashMap::new()),
            console: RefCell::new(None),
        });

        context.with(|ctx| globals::setup(&ctx, &shared))?;

        Ok(Self {
            context,
            shared,
            _runtime: runtime,
        })
    }

    /// Evaluate a code submission and export its completion value.
    ///
    /// The submission runs as
    /// `(function () { "use strict"; return eval(code); })()`: declarations
    /// land in the wrapper scope so identical identifiers across submissions
    /// do not collide, while the completion value of the submitted code is
    /// still produced. Durable state belongs in `globalState`.
    #[instrument(skip_all, level = "debug")]
    pub fn eval_raw(&self, code: &str) -> anyhow::Result<serde_json::Value> {
        let literal = serde_json::to_string(code).context("encoding submission")?;
        let wrapped = format!("(function () {{ \"use strict\"; return eval({literal}); }})()");

        self.context.with(|ctx| {
            let value: Value = ctx.eval(wrapped).catch_js(&ctx)?;
            output::export_json(&ctx, value)
        })
    }

    /// Evaluate a code submission with console capture.
    ///
    /// The console sink is armed for the duration and disarmed on every exit
    /// path, so the console behavior observable from JS is identical before
    /// and after the call. Evaluation errors land in the result rather than
    /// being returned.
    #[instrument(skip_all, level = "debug")]
    pub fn eval_with_capture(&self, code: &str) -> ExecutionResult {
        let guard = CaptureGuard::arm(&self.shared);
        let outcome = self.eval_raw(code);
        let console = guard.take();

        match outcome {
            Ok(value) => ExecutionResult {
                value,
                console,
                error: None,
            },
            Err(error) => ExecutionResult {
                value: serde_json::Value::Null,
                console,
                error: Some(format!("{error:#}")),
            },
        }
    }

    /// Invoke a stored callable with the given request and export the return
    /// value to a host shape.
    #[instrument(skip_all, level = "debug")]
    pub fn invoke(
        &self,
        target: &RouteTarget,
        request: &ScriptRequest,
    ) -> anyhow::Result<ScriptOutput> {
        // Clone the handle out before entering the engine: the callable may
        // itself call registerHandler, which needs the callables map.
        let callable = self
            .shared
            .callables
            .borrow()
            .get(&CallableKey::from(target))
            .cloned()
            .ok_or_else(|| match target {
                RouteTarget::Handler(key) => anyhow!("no handler registered for {key}"),
                RouteTarget::File(path) => anyhow!("no file handler registered for {path}"),
            })?;

        let request_json =
            serde_json::to_string(&request.to_value()).context("encoding request value")?;

        self.context.with(|ctx| {
            let func = callable.restore(&ctx).catch_js(&ctx)?;
            let arg = ctx.json_parse(request_json).catch_js(&ctx)?;
            let value: Value = func.call((arg,)).catch_js(&ctx)?;
            output::export_output(&ctx, value)
        })
    }
}

impl Drop for ScriptRuntime {
    fn drop(&mut self) {
        // Drop Persistent references before the Context goes away, otherwise
        // the engine aborts on shutdown over the leaked handles.
        self.shared.callables.borrow_mut().clear();
    }
}

// RAII guard for the console capture sink. Arming replaces the sink with an
// empty buffer; dropping disarms it no matter how the evaluation ended.
struct CaptureGuard {
    shared: Rc<RuntimeShared>,
}

impl CaptureGuard {
    fn arm(shared: &Rc<RuntimeShared>) -> Self {
        *shared.console.borrow_mut() = Some(Vec::new());
        Self {
            shared: shared.clone(),
        }
    }

    fn take(&self) -> Vec<ConsoleLine> {
        self.shared.console.borrow_mut().take().unwrap_or_default()
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        *self.shared.console.borrow_mut() = None;
    }
}

pub(crate) trait CatchJsErrorExt {
    type Ok;
    fn catch_js(self, ctx: &Ctx<'_>) -> anyhow::Result<Self::Ok>;
}

impl<T> CatchJsErrorExt for rquickjs::Result<T> {
    type Ok = T;
    fn catch_js(self, ctx: &Ctx<'_>) -> anyhow::Result<T> {
        match rquickjs::CatchResultExt::catch(self, ctx) {
            Ok(value) => Ok(value),
            Err(caught) => Err(caught_to_error(caught)),
        }
    }
}

// Flatten a caught JS error to its message. Stacks go to the log, not into
// the error, since these messages end up in HTTP response bodies.
fn caught_to_error(caught: CaughtError<'_>) -> anyhow::Error {
    match caught {
        CaughtError::Exception(exception) => {
            let message = exception
                .message()
                .unwrap_or_else(|| "unknown exception".to_string());
            if let Some(stack) = exception.stack() {
                tracing::debug!(%message, %stack, "script exception");
            }
            anyhow!(message)
        }
        CaughtError::Value(value) => anyhow!("exception value: {value:?}"),
        CaughtError::Error(error) => anyhow!(error),
    }
}
