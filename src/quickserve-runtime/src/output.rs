use quickserve_common::{
    CookieSpec, ResponseBody, STRUCTURED_FIELDS, SameSite, ScriptOutput, StructuredResponse,
};
use rquickjs::{ArrayBuffer, Ctx, FromJs as _, Object, Value};

use crate::CatchJsErrorExt as _;

/// Export an arbitrary JS value to JSON via the engine's stringifier.
/// Values JSON cannot represent (functions, undefined) export as null.
pub(crate) fn export_json<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> anyhow::Result<serde_json::Value> {
    let Some(text) = ctx
        .json_stringify(value)
        .catch_js(ctx)?
        .map(|s| s.to_string())
        .transpose()
        .catch_js(ctx)?
    else {
        return Ok(serde_json::Value::Null);
    };
    Ok(serde_json::from_str(&text)?)
}

/// Export a handler's return value to the host shape the response bridge
/// consumes.
///
/// Bytes must be pulled out before any JSON round-trip (a `Uint8Array` does
/// not survive `JSON.stringify`), and structured responses are detected on
/// the live object for the same reason: their `body` may itself be bytes.
pub(crate) fn export_output<'js>(
    ctx: &Ctx<'js>,
    value: Value<'js>,
) -> anyhow::Result<ScriptOutput> {
    if value.is_undefined() || value.is_null() {
        return Ok(ScriptOutput::Empty);
    }

    if let Some(text) = value.as_string() {
        return Ok(ScriptOutput::Text(text.to_string().catch_js(ctx)?));
    }

    // A mapping carrying a response field wins over everything below, even
    // when the mapping is also a byte view.
    if let Some(object) = value.as_object()
        && !value.is_array()
        && is_structured(object)
    {
        return Ok(ScriptOutput::Structured(extract_structured(ctx, object)?));
    }

    if let Some(bytes) = as_bytes(&value) {
        return Ok(ScriptOutput::Bytes(bytes));
    }

    match export_json(ctx, value)? {
        serde_json::Value::Null => Ok(ScriptOutput::Empty),
        json => Ok(ScriptOutput::Json(json)),
    }
}

// A Uint8Array (or any u8 view) or ArrayBuffer becomes a raw byte body.
fn as_bytes(value: &Value<'_>) -> Option<Vec<u8>> {
    if let Some(array) = value.as_object().and_then(Object::as_typed_array::<u8>) {
        return array.as_bytes().map(<[u8]>::to_vec);
    }
    if let Ok(buffer) = ArrayBuffer::from_js(value.ctx(), value.clone()) {
        return buffer.as_bytes().map(<[u8]>::to_vec);
    }
    None
}

fn is_structured(object: &Object<'_>) -> bool {
    STRUCTURED_FIELDS.iter().any(|name| {
        object
            .get::<_, Value>(*name)
            .map(|field| !field.is_undefined())
            .unwrap_or(false)
    })
}

// Both QuickJS number tags.
fn as_number(value: &Value<'_>) -> Option<f64> {
    value
        .as_int()
        .map(f64::from)
        .or_else(|| value.as_float())
}

fn field<'js>(object: &Object<'js>, name: &str) -> Option<Value<'js>> {
    object
        .get::<_, Value>(name)
        .ok()
        .filter(|value| !value.is_undefined() && !value.is_null())
}

fn extract_structured<'js>(
    ctx: &Ctx<'js>,
    object: &Object<'js>,
) -> anyhow::Result<StructuredResponse> {
    let status = field(object, "status")
        .as_ref()
        .and_then(as_number)
        .and_then(|n| u16::try_from(n as i64).ok());

    let content_type = match field(object, "contentType") {
        Some(value) => value
            .as_string()
            .map(|s| s.to_string())
            .transpose()
            .catch_js(ctx)?,
        None => None,
    };

    let redirect = match field(object, "redirect") {
        Some(value) => value
            .as_string()
            .map(|s| s.to_string())
            .transpose()
            .catch_js(ctx)?
            .filter(|url| !url.is_empty()),
        None => None,
    };

    // String values only; anything else is skipped.
    let mut headers = Vec::new();
    if let Some(headers_value) = field(object, "headers")
        && let Some(map) = headers_value.as_object()
    {
        for prop in map.props::<String, Value>() {
            let (name, value) = prop.catch_js(ctx)?;
            if let Some(text) = value.as_string() {
                headers.push((name, text.to_string().catch_js(ctx)?));
            }
        }
    }

    let body = match field(object, "body") {
        Some(value) => {
            if let Some(text) = value.as_string() {
                Some(ResponseBody::Text(text.to_string().catch_js(ctx)?))
            } else if let Some(bytes) = as_bytes(&value) {
                Some(ResponseBody::Bytes(bytes))
            } else {
                Some(ResponseBody::Json(export_json(ctx, value)?))
            }
        }
        None => None,
    };

    let mut cookies = Vec::new();
    if let Some(cookies_value) = field(object, "cookies")
        && let Some(list) = cookies_value.as_array()
    {
        for item in list.iter::<Value>() {
            let item = item.catch_js(ctx)?;
            let Some(entry) = item.as_object() else {
                continue;
            };
            match extract_cookie(ctx, entry)? {
                Some(cookie) => cookies.push(cookie),
                None => tracing::warn!("response cookie without a name, skipping"),
            }
        }
    }

    Ok(StructuredResponse {
        status,
        headers,
        body,
        content_type,
        cookies,
        redirect,
    })
}

fn extract_cookie<'js>(
    ctx: &Ctx<'js>,
    entry: &Object<'js>,
) -> anyhow::Result<Option<CookieSpec>> {
    let string_field = |name: &str| -> anyhow::Result<Option<String>> {
        match field(entry, name) {
            Some(value) => Ok(value
                .as_string()
                .map(|s| s.to_string())
                .transpose()
                .catch_js(ctx)?),
            None => Ok(None),
        }
    };

    let Some(name) = string_field("name")?.filter(|name| !name.is_empty()) else {
        return Ok(None);
    };

    let bool_field = |field_name: &str| {
        field(entry, field_name)
            .as_ref()
            .and_then(Value::as_bool)
            .unwrap_or(false)
    };

    Ok(Some(CookieSpec {
        name,
        value: string_field("value")?.unwrap_or_default(),
        path: string_field("path")?,
        domain: string_field("domain")?,
        max_age: field(entry, "maxAge")
            .as_ref()
            .and_then(as_number)
            .map(|seconds| seconds as i64),
        secure: bool_field("secure"),
        http_only: bool_field("httpOnly"),
        same_site: string_field("sameSite")?.as_deref().and_then(SameSite::parse),
    }))
}
