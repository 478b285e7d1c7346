use std::rc::Rc;

use quickserve_common::{HandlerRecord, RouteKey};
use rquickjs::prelude::Rest;
use rquickjs::{Ctx, Exception, Persistent, Value};

use super::coerce_fn_signature;
use crate::{CallableKey, RuntimeShared};

/// Build `registerHandler(method, path, fn[, options])`.
///
/// `options` may be a content-type string (back-compat) or a mapping; the
/// only recognized key is `contentType`, the rest is kept verbatim on the
/// record. Throws a `TypeError` when `fn` is not callable.
pub(crate) fn handler(
    shared: Rc<RuntimeShared>,
) -> impl for<'js> Fn(Ctx<'js>, Rest<Value<'js>>) -> rquickjs::Result<Value<'js>> {
    coerce_fn_signature(move |ctx: Ctx<'_>, args: Rest<Value<'_>>| {
        let mut args = args.into_inner().into_iter();

        let method = string_arg(&ctx, args.next(), "registerHandler: method must be a string")?;
        let path = string_arg(&ctx, args.next(), "registerHandler: path must be a string")?;

        let Some(function) = args.next().as_ref().and_then(Value::as_function).cloned() else {
            return Err(Exception::throw_type(
                &ctx,
                "registerHandler: handler must be a function",
            ));
        };

        let (content_type, options) = parse_options(&ctx, args.next())?;

        let key = RouteKey::new(method, path);
        shared.store_callable(
            CallableKey::Route(key.clone()),
            Persistent::save(&ctx, function),
        );
        shared.registry.register_handler(
            key,
            HandlerRecord {
                content_type,
                options,
            },
        );

        Ok(Value::new_undefined(ctx))
    })
}

/// Build `registerFile(path, fn)`. The callable produces the file's bytes or
/// text on each request.
pub(crate) fn file(
    shared: Rc<RuntimeShared>,
) -> impl for<'js> Fn(Ctx<'js>, Rest<Value<'js>>) -> rquickjs::Result<Value<'js>> {
    coerce_fn_signature(move |ctx: Ctx<'_>, args: Rest<Value<'_>>| {
        let mut args = args.into_inner().into_iter();

        let path = string_arg(&ctx, args.next(), "registerFile: path must be a string")?;

        let Some(function) = args.next().as_ref().and_then(Value::as_function).cloned() else {
            return Err(Exception::throw_type(
                &ctx,
                "registerFile: handler must be a function",
            ));
        };

        shared.store_callable(CallableKey::File(path.clone()), Persistent::save(&ctx, function));
        shared.registry.register_file(path);

        Ok(Value::new_undefined(ctx))
    })
}

fn string_arg<'js>(
    ctx: &Ctx<'js>,
    value: Option<Value<'js>>,
    message: &str,
) -> rquickjs::Result<String> {
    match value.as_ref().and_then(Value::as_string) {
        Some(text) => text.to_string(),
        None => Err(Exception::throw_type(ctx, message)),
    }
}

// `options` is either absent, a bare content-type string, or a mapping with
// a `contentType` key. Unknown keys are preserved on the record but have no
// effect.
fn parse_options<'js>(
    ctx: &Ctx<'js>,
    value: Option<Value<'js>>,
) -> rquickjs::Result<(Option<String>, Option<serde_json::Value>)> {
    let Some(value) = value else {
        return Ok((None, None));
    };
    if value.is_undefined() || value.is_null() {
        return Ok((None, None));
    }

    if let Some(text) = value.as_string() {
        return Ok((Some(text.to_string()?), None));
    }

    if let Some(object) = value.as_object() {
        let content_type = match object.get::<_, Value>("contentType") {
            Ok(field) => field
                .as_string()
                .map(|s| s.to_string())
                .transpose()?,
            Err(_) => None,
        };
        let options = ctx
            .json_stringify(value.clone())?
            .map(|s| s.to_string())
            .transpose()?
            .and_then(|json| serde_json::from_str(&json).ok());
        return Ok((content_type, options));
    }

    Ok((None, None))
}
