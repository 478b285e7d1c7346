use std::rc::Rc;

use rquickjs::prelude::Rest;
use rquickjs::{Ctx, Function, Object, Value};

use crate::{CatchJsErrorExt as _, RuntimeShared};

mod console;
mod db;
mod register;

// Status constants, Response helpers and the globalState bootstrap are plain
// JS, evaluated once at construction.
const PRELUDE: &str = include_str!("prelude.js");

/// Identity function that pins a binding closure to the signature rquickjs
/// expects. Closures cannot name their own lifetimes
/// (https://github.com/rust-lang/rust/issues/97362), so without this hint the
/// compiler treats the returned `Value<'_>` as independent of the `Ctx<'_>`
/// argument and rejects the closure.
pub(crate) fn coerce_fn_signature<F>(f: F) -> F
where
    F: for<'js> Fn(Ctx<'js>, Rest<Value<'js>>) -> rquickjs::Result<Value<'js>>,
{
    f
}

/// Install the capability surface into the global scope.
pub(crate) fn setup(ctx: &Ctx<'_>, shared: &Rc<RuntimeShared>) -> anyhow::Result<()> {
    let globals = ctx.globals();

    globals
        .set("console", console::build(ctx, shared)?)
        .catch_js(ctx)?;

    let database = Object::new(ctx.clone()).catch_js(ctx)?;
    database
        .set(
            "query",
            Function::new(ctx.clone(), db::query(shared.clone()))
                .catch_js(ctx)?
                .with_name("query")
                .catch_js(ctx)?,
        )
        .catch_js(ctx)?;
    globals.set("db", database).catch_js(ctx)?;

    globals
        .set(
            "registerHandler",
            Function::new(ctx.clone(), register::handler(shared.clone()))
                .catch_js(ctx)?
                .with_name("registerHandler")
                .catch_js(ctx)?,
        )
        .catch_js(ctx)?;

    globals
        .set(
            "registerFile",
            Function::new(ctx.clone(), register::file(shared.clone()))
                .catch_js(ctx)?
                .with_name("registerFile")
                .catch_js(ctx)?,
        )
        .catch_js(ctx)?;

    ctx.eval::<(), _>(PRELUDE).catch_js(ctx)?;

    Ok(())
}
