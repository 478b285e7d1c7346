//! The request/response bridge.
//!
//! One direction builds the script-facing request value out of an HTTP
//! request; the other interprets what a handler returned into an HTTP
//! response, honoring the structured-response fields, content-type
//! sniffing for plain strings, and the JSON fallback for everything else.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use quickserve_common::{
    CookieSpec, HandlerOutcome, JobError, PathParams, ResponseBody, SameSite, ScriptOutput,
    ScriptRequest, StructuredResponse,
};
use serde_json::{Map, Value};
use tracing::warn;

/// Build the script-facing request value. The body is decoded exactly once;
/// a missing body becomes the empty string.
pub async fn build_request(
    request: Request,
    params: PathParams,
    remote_addr: Option<SocketAddr>,
) -> ScriptRequest {
    let (parts, body) = request.into_parts();

    let mut query = Map::new();
    if let Some(raw) = parts.uri.query() {
        for (name, value) in form_urlencoded::parse(raw.as_bytes()) {
            insert_multi(&mut query, &name, value.into_owned());
        }
    }

    let mut headers = Map::new();
    for (name, value) in &parts.headers {
        insert_multi(
            &mut headers,
            &canonical_header_name(name.as_str()),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }

    let mut cookies = Map::new();
    for value in parts.headers.get_all(COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        for cookie in cookie::Cookie::split_parse(raw).flatten() {
            cookies.insert(
                cookie.name().to_string(),
                Value::String(cookie.value().to_string()),
            );
        }
    }

    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(error) => {
            warn!(%error, "failed to read request body");
            String::new()
        }
    };

    ScriptRequest {
        method: parts.method.as_str().to_string(),
        url: parts.uri.to_string(),
        path: parts.uri.path().to_string(),
        body,
        query,
        remote_ip: remote_ip(&parts.headers, remote_addr),
        headers,
        cookies,
        params,
    }
}

/// Client address precedence: first `X-Forwarded-For` entry, then
/// `X-Real-IP`, then the transport-level peer address.
fn remote_ip(headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok())
        && let Some(first) = forwarded.split(',').next()
    {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real = real.trim();
        if !real.is_empty() {
            return real.to_string();
        }
    }
    remote_addr
        .map(|addr| addr.ip().to_string())
        .unwrap_or_default()
}

// `x-forwarded-for` -> `X-Forwarded-For`, the casing handler code expects.
fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

// First value stays a string; further values for the same name turn the
// entry into an array. Inserting over an existing key keeps its position.
fn insert_multi(map: &mut Map<String, Value>, name: &str, value: String) {
    match map.get(name).cloned() {
        None => {
            map.insert(name.to_string(), Value::String(value));
        }
        Some(Value::String(first)) => {
            map.insert(
                name.to_string(),
                Value::Array(vec![Value::String(first), Value::String(value)]),
            );
        }
        Some(Value::Array(mut items)) => {
            items.push(Value::String(value));
            map.insert(name.to_string(), Value::Array(items));
        }
        Some(_) => {}
    }
}

/// Turn the dispatcher's reply into the HTTP response.
pub fn reply_to_response(reply: Result<HandlerOutcome, JobError>) -> Response {
    match reply {
        Ok(outcome) => output_to_response(outcome.output, outcome.content_type.as_deref()),
        Err(JobError::Canceled) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        Err(error) => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response(),
    }
}

/// Interpret a handler's exported return value.
///
/// Priority: empty maps to 204; a structured response is unpacked field by
/// field; bytes are written raw as `application/octet-stream`; a string is
/// written with the record's content-type override or a sniffed type; any
/// other value is JSON-encoded.
pub fn output_to_response(output: ScriptOutput, content_type: Option<&str>) -> Response {
    match output {
        ScriptOutput::Empty => StatusCode::NO_CONTENT.into_response(),
        ScriptOutput::Structured(response) => structured_to_response(response),
        ScriptOutput::Bytes(bytes) => {
            ([(CONTENT_TYPE, "application/octet-stream")], bytes).into_response()
        }
        ScriptOutput::Text(text) => {
            let content_type = content_type
                .map(str::to_string)
                .unwrap_or_else(|| sniff_content_type(&text).to_string());
            ([(CONTENT_TYPE, content_type)], text).into_response()
        }
        ScriptOutput::Json(value) => {
            let body = serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string());
            ([(CONTENT_TYPE, "application/json")], body).into_response()
        }
    }
}

fn structured_to_response(response: StructuredResponse) -> Response {
    let mut headers = HeaderMap::new();
    for (name, value) in &response.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(header = %name, "skipping invalid response header"),
        }
    }
    for spec in &response.cookies {
        match HeaderValue::from_str(&build_cookie(spec).to_string()) {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(_) => warn!(cookie = %spec.name, "skipping invalid response cookie"),
        }
    }

    // A redirect drops the body. The status is kept only when it is already
    // a redirection code; anything else (including the 200 default) becomes
    // a 302.
    if let Some(url) = response.redirect.as_deref() {
        match HeaderValue::from_str(url) {
            Ok(location) => {
                let status = match response.status {
                    Some(status) if (300..400).contains(&status) => status,
                    _ => 302,
                };
                headers.insert(LOCATION, location);
                let mut redirect =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::FOUND).into_response();
                redirect.headers_mut().extend(headers);
                return redirect;
            }
            Err(_) => warn!(redirect = %url, "ignoring unusable redirect target"),
        }
    }

    let status =
        StatusCode::from_u16(response.status.unwrap_or(200)).unwrap_or(StatusCode::OK);
    let body = match response.body {
        Some(ResponseBody::Bytes(bytes)) => Body::from(bytes),
        Some(ResponseBody::Text(text)) => Body::from(text),
        Some(ResponseBody::Json(value)) => {
            Body::from(serde_json::to_string(&value).unwrap_or_else(|_| "null".to_string()))
        }
        None => Body::empty(),
    };

    let content_type = response.content_type.as_deref().unwrap_or("application/json");
    let mut out = Response::new(body);
    *out.status_mut() = status;
    out.headers_mut().extend(headers);
    out.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/json")),
    );
    out
}

fn build_cookie(spec: &CookieSpec) -> cookie::Cookie<'static> {
    let mut out = cookie::Cookie::new(spec.name.clone(), spec.value.clone());
    if let Some(path) = &spec.path {
        out.set_path(path.clone());
    }
    if let Some(domain) = &spec.domain {
        out.set_domain(domain.clone());
    }
    if let Some(max_age) = spec.max_age {
        out.set_max_age(cookie::time::Duration::seconds(max_age));
    }
    if spec.secure {
        out.set_secure(true);
    }
    if spec.http_only {
        out.set_http_only(true);
    }
    if let Some(same_site) = spec.same_site {
        out.set_same_site(match same_site {
            SameSite::Strict => cookie::SameSite::Strict,
            SameSite::Lax => cookie::SameSite::Lax,
            SameSite::None => cookie::SameSite::None,
        });
    }
    out
}

/// Sniff the content type of a plain-string response: HTML when it opens
/// like markup, JSON when the endpoints are balanced braces or brackets,
/// plain text otherwise.
pub(crate) fn sniff_content_type(text: &str) -> &'static str {
    let bytes = text.trim_start().as_bytes();
    if starts_with_ignore_case(bytes, b"<!doctype html")
        || starts_with_ignore_case(bytes, b"<html")
        || bytes.starts_with(b"<!")
    {
        return "text/html; charset=utf-8";
    }

    let balanced = text.trim();
    if (balanced.starts_with('{') && balanced.len() > 1 && balanced.ends_with('}'))
        || (balanced.starts_with('[') && balanced.len() > 1 && balanced.ends_with(']'))
    {
        return "application/json";
    }

    "text/plain; charset=utf-8"
}

fn starts_with_ignore_case(bytes: &[u8], prefix: &[u8]) -> bool {
    bytes.len() >= prefix.len() && bytes[..prefix.len()].eq_ignore_ascii_case(prefix)
}
