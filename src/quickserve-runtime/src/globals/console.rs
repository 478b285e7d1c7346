use std::rc::Rc;

use quickserve_common::{ConsoleLevel, ConsoleLine};
use rquickjs::prelude::Rest;
use rquickjs::{Coerced, Ctx, FromJs as _, Function, Object, Value};

use super::coerce_fn_signature;
use crate::{CatchJsErrorExt as _, RuntimeShared};

/// Build the `console` object. Each method forwards to the host logger and,
/// while a capturing evaluation is active, appends to the armed sink.
pub(crate) fn build<'js>(
    ctx: &Ctx<'js>,
    shared: &Rc<RuntimeShared>,
) -> anyhow::Result<Object<'js>> {
    let console = Object::new(ctx.clone()).catch_js(ctx)?;

    for (name, level) in [
        ("log", ConsoleLevel::Log),
        ("info", ConsoleLevel::Info),
        ("warn", ConsoleLevel::Warn),
        ("error", ConsoleLevel::Error),
        ("debug", ConsoleLevel::Debug),
    ] {
        let shared = shared.clone();
        let method = coerce_fn_signature(move |ctx: Ctx<'_>, args: Rest<Value<'_>>| {
            let text = join_args(&ctx, args)?;
            emit(level, &text);
            if let Some(sink) = shared.console.borrow_mut().as_mut() {
                sink.push(ConsoleLine { level, text });
            }
            Ok(Value::new_undefined(ctx))
        });
        console
            .set(
                name,
                Function::new(ctx.clone(), method)
                    .catch_js(ctx)?
                    .with_name(name)
                    .catch_js(ctx)?,
            )
            .catch_js(ctx)?;
    }

    Ok(console)
}

// Coerce every argument to a string and join with single spaces, the way the
// console methods render their arguments.
fn join_args<'js>(ctx: &Ctx<'js>, args: Rest<Value<'js>>) -> rquickjs::Result<String> {
    let mut parts = Vec::with_capacity(args.len());
    for value in args.into_inner() {
        let Coerced(text) = Coerced::<String>::from_js(ctx, value)?;
        parts.push(text);
    }
    Ok(parts.join(" "))
}

fn emit(level: ConsoleLevel, text: &str) {
    match level {
        ConsoleLevel::Log | ConsoleLevel::Info => {
            tracing::info!(target: "quickserve::script", "{text}")
        }
        ConsoleLevel::Warn => tracing::warn!(target: "quickserve::script", "{text}"),
        ConsoleLevel::Error => tracing::error!(target: "quickserve::script", "{text}"),
        ConsoleLevel::Debug => tracing::debug!(target: "quickserve::script", "{text}"),
    }
}
