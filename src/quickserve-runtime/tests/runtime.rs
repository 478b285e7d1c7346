//! Behaviour of the embedded runtime: evaluation, console capture, handler
//! registration and invocation, and the capability bindings.

use std::sync::Arc;

use parking_lot::Mutex;
use quickserve_common::{
    HandlerRegistry, ResponseBody, RouteKey, RouteTarget, ScriptOutput, ScriptRequest,
};
use quickserve_runtime::ScriptRuntime;
use rusqlite::Connection;
use serde_json::json;

fn new_runtime() -> (ScriptRuntime, Arc<HandlerRegistry>) {
    let registry = Arc::new(HandlerRegistry::new());
    let connection = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
    let runtime = ScriptRuntime::new(registry.clone(), connection).unwrap();
    (runtime, registry)
}

fn get(path: &str) -> RouteTarget {
    RouteTarget::Handler(RouteKey::new("GET", path))
}

#[test]
fn eval_returns_completion_value() {
    let (runtime, _) = new_runtime();

    let result = runtime.eval_with_capture("console.log(\"a\", \"b\"); 1 + 1");

    assert_eq!(result.value, json!(2));
    assert_eq!(result.error, None);
    assert_eq!(result.console.len(), 1);
    assert_eq!(result.console[0].to_string(), "[log] a b");
}

#[test]
fn eval_captures_console_levels() {
    let (runtime, _) = new_runtime();

    let result = runtime.eval_with_capture(
        r#"
        console.info("i");
        console.warn("w");
        console.error("e");
        console.debug("d");
        "#,
    );

    let lines: Vec<String> = result.console.iter().map(ToString::to_string).collect();
    assert_eq!(lines, vec!["[info] i", "[warn] w", "[error] e", "[debug] d"]);
}

#[test]
fn capture_is_restored_after_a_failed_eval() {
    let (runtime, _) = new_runtime();

    let failed = runtime.eval_with_capture("console.log(\"before\"); throw new Error(\"boom\")");
    assert!(failed.error.as_deref().unwrap().contains("boom"));
    assert_eq!(failed.console[0].to_string(), "[log] before");

    // Console output outside a capturing evaluation must not leak into the
    // next captured result.
    runtime.eval_raw("console.log(\"between\")").unwrap();

    let next = runtime.eval_with_capture("42");
    assert_eq!(next.value, json!(42));
    assert!(next.console.is_empty());
}

#[test]
fn submissions_do_not_collide_on_declarations() {
    let (runtime, _) = new_runtime();

    assert_eq!(runtime.eval_raw("let counter = 1; counter").unwrap(), json!(1));
    assert_eq!(runtime.eval_raw("let counter = 5; counter").unwrap(), json!(5));
}

#[test]
fn global_state_persists_across_submissions() {
    let (runtime, _) = new_runtime();

    let code = "globalState.count = (globalState.count || 0) + 1; globalState.count";
    assert_eq!(runtime.eval_raw(code).unwrap(), json!(1));
    assert_eq!(runtime.eval_raw(code).unwrap(), json!(2));
}

#[test]
fn register_and_invoke_handler() {
    let (runtime, registry) = new_runtime();

    runtime
        .eval_raw("registerHandler(\"GET\", \"/h\", () => ({ ok: true }));")
        .unwrap();
    assert!(registry.lookup_handler("GET", "/h").is_some());

    let output = runtime.invoke(&get("/h"), &ScriptRequest::default()).unwrap();
    assert_eq!(output, ScriptOutput::Json(json!({ "ok": true })));
}

#[test]
fn handler_sees_path_params() {
    let (runtime, _) = new_runtime();

    runtime
        .eval_raw("registerHandler(\"GET\", \"/u/:id\", (r) => ({ id: r.Params.id }));")
        .unwrap();

    let request = ScriptRequest {
        params: vec![("id".into(), "42".into())],
        ..Default::default()
    };
    let output = runtime
        .invoke(&RouteTarget::Handler(RouteKey::new("GET", "/u/:id")), &request)
        .unwrap();
    assert_eq!(output, ScriptOutput::Json(json!({ "id": "42" })));
}

#[test]
fn re_registration_replaces_the_callable() {
    let (runtime, _) = new_runtime();

    runtime
        .eval_raw("registerHandler(\"GET\", \"/h\", () => \"first\");")
        .unwrap();
    runtime
        .eval_raw("registerHandler(\"GET\", \"/h\", () => \"second\");")
        .unwrap();

    let output = runtime.invoke(&get("/h"), &ScriptRequest::default()).unwrap();
    assert_eq!(output, ScriptOutput::Text("second".into()));
}

#[test]
fn register_handler_rejects_non_function() {
    let (runtime, _) = new_runtime();

    let result = runtime.eval_with_capture("registerHandler(\"GET\", \"/x\", 42)");
    assert!(
        result
            .error
            .as_deref()
            .unwrap()
            .contains("handler must be a function")
    );
}

#[test]
fn register_handler_accepts_content_type_string() {
    let (runtime, registry) = new_runtime();

    runtime
        .eval_raw("registerHandler(\"GET\", \"/csv\", () => \"a,b\", \"text/csv\");")
        .unwrap();

    let record = registry.lookup_handler("GET", "/csv").unwrap();
    assert_eq!(record.content_type.as_deref(), Some("text/csv"));
}

#[test]
fn register_handler_accepts_options_mapping() {
    let (runtime, registry) = new_runtime();

    runtime
        .eval_raw(
            "registerHandler(\"GET\", \"/csv\", () => \"a,b\", { contentType: \"text/csv\" });",
        )
        .unwrap();

    let record = registry.lookup_handler("GET", "/csv").unwrap();
    assert_eq!(record.content_type.as_deref(), Some("text/csv"));
}

#[test]
fn handler_error_carries_the_message() {
    let (runtime, _) = new_runtime();

    runtime
        .eval_raw("registerHandler(\"GET\", \"/bad\", () => { throw new Error(\"x\") });")
        .unwrap();

    let error = runtime
        .invoke(&get("/bad"), &ScriptRequest::default())
        .unwrap_err();
    assert!(error.to_string().contains("x"));

    // The runtime keeps working after a handler failure.
    assert_eq!(runtime.eval_raw("1").unwrap(), json!(1));
}

#[test]
fn undefined_return_exports_as_empty() {
    let (runtime, _) = new_runtime();

    runtime
        .eval_raw("registerHandler(\"GET\", \"/void\", () => {});")
        .unwrap();

    let output = runtime.invoke(&get("/void"), &ScriptRequest::default()).unwrap();
    assert_eq!(output, ScriptOutput::Empty);
}

#[test]
fn byte_return_exports_as_bytes() {
    let (runtime, _) = new_runtime();

    runtime
        .eval_raw("registerHandler(\"GET\", \"/bin\", () => new Uint8Array([1, 2, 3]));")
        .unwrap();

    let output = runtime.invoke(&get("/bin"), &ScriptRequest::default()).unwrap();
    assert_eq!(output, ScriptOutput::Bytes(vec![1, 2, 3]));
}

#[test]
fn structured_fields_win_over_byte_views() {
    let (runtime, _) = new_runtime();

    // A typed array with a response field on it is a structured response,
    // not a byte body.
    runtime
        .eval_raw(
            r#"registerHandler("GET", "/tagged", () => {
                const bytes = new Uint8Array([1, 2]);
                bytes.status = 201;
                return bytes;
            });"#,
        )
        .unwrap();

    let output = runtime.invoke(&get("/tagged"), &ScriptRequest::default()).unwrap();
    let ScriptOutput::Structured(response) = output else {
        panic!("expected a structured response, got {output:?}");
    };
    assert_eq!(response.status, Some(201));
}

#[test]
fn structured_return_is_unpacked() {
    let (runtime, _) = new_runtime();

    runtime
        .eval_raw(
            r#"registerHandler("GET", "/s", () => ({
                status: 201,
                headers: { "X-Custom": "yes" },
                body: { created: true },
                cookies: [{ name: "sid", value: "1", httpOnly: true, sameSite: "Lax" }],
            }));"#,
        )
        .unwrap();

    let output = runtime.invoke(&get("/s"), &ScriptRequest::default()).unwrap();
    let ScriptOutput::Structured(response) = output else {
        panic!("expected a structured response, got {output:?}");
    };
    assert_eq!(response.status, Some(201));
    assert_eq!(response.headers, vec![("X-Custom".to_string(), "yes".to_string())]);
    assert_eq!(response.body, Some(ResponseBody::Json(json!({ "created": true }))));
    assert_eq!(response.cookies.len(), 1);
    assert_eq!(response.cookies[0].name, "sid");
    assert!(response.cookies[0].http_only);
}

#[test]
fn response_helpers_build_structured_objects() {
    let (runtime, _) = new_runtime();

    runtime
        .eval_raw("registerHandler(\"GET\", \"/old\", () => Response.redirect(\"/new\"));")
        .unwrap();

    let output = runtime.invoke(&get("/old"), &ScriptRequest::default()).unwrap();
    let ScriptOutput::Structured(response) = output else {
        panic!("expected a structured response, got {output:?}");
    };
    assert_eq!(response.redirect.as_deref(), Some("/new"));
    assert_eq!(response.status, Some(302));
}

#[test]
fn response_error_helper_defaults_to_500() {
    let (runtime, _) = new_runtime();

    let result = runtime.eval_with_capture("Response.error(\"nope\")");
    assert_eq!(
        result.value,
        json!({
            "status": 500,
            "contentType": "application/json",
            "body": { "error": "nope", "status": 500, "success": false },
        })
    );
}

#[test]
fn http_constants_are_available() {
    let (runtime, _) = new_runtime();

    assert_eq!(runtime.eval_raw("HTTP.NOT_FOUND").unwrap(), json!(404));
    assert_eq!(runtime.eval_raw("HTTP.ACCEPTED").unwrap(), json!(202));
}

#[test]
fn register_file_and_invoke() {
    let (runtime, registry) = new_runtime();

    runtime
        .eval_raw("registerFile(\"/logo.txt\", () => \"logo\");")
        .unwrap();
    assert!(registry.has_file("/logo.txt"));

    let output = runtime
        .invoke(&RouteTarget::File("/logo.txt".into()), &ScriptRequest::default())
        .unwrap();
    assert_eq!(output, ScriptOutput::Text("logo".into()));
}

#[test]
fn db_query_roundtrip_and_arg_spreading() {
    let (runtime, _) = new_runtime();

    runtime
        .eval_raw("db.query(\"CREATE TABLE t (id INTEGER, name TEXT)\");")
        .unwrap();
    runtime
        .eval_raw("db.query(\"INSERT INTO t (id, name) VALUES (?, ?)\", 1, \"one\");")
        .unwrap();
    // A single array argument spreads into positional parameters.
    runtime
        .eval_raw("db.query(\"INSERT INTO t (id, name) VALUES (?, ?)\", [2, \"two\"]);")
        .unwrap();

    let rows = runtime
        .eval_raw("db.query(\"SELECT id, name FROM t ORDER BY id\")")
        .unwrap();
    assert_eq!(
        rows,
        json!([
            { "id": 1, "name": "one" },
            { "id": 2, "name": "two" },
        ])
    );
}

#[test]
fn db_query_error_yields_empty_sequence() {
    let (runtime, _) = new_runtime();

    let rows = runtime.eval_raw("db.query(\"SELECT * FROM missing\")").unwrap();
    assert_eq!(rows, json!([]));
}

#[test]
fn handlers_accumulate_state_across_requests() {
    let (runtime, _) = new_runtime();

    runtime
        .eval_raw(
            r#"registerHandler("GET", "/count", () => {
                globalState.hits = (globalState.hits || 0) + 1;
                return { hits: globalState.hits };
            });"#,
        )
        .unwrap();

    let first = runtime.invoke(&get("/count"), &ScriptRequest::default()).unwrap();
    let second = runtime.invoke(&get("/count"), &ScriptRequest::default()).unwrap();
    assert_eq!(first, ScriptOutput::Json(json!({ "hits": 1 })));
    assert_eq!(second, ScriptOutput::Json(json!({ "hits": 2 })));
}
