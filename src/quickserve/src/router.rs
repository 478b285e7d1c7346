//! The control endpoints and the dynamic router.
//!
//! Static routes (`/v1/execute`, `/admin/scripts`) are ordinary axum routes.
//! Everything else falls through to the dynamic dispatch: exact handler
//! lookup first, then `:name` patterns in registration order, then file
//! registrations, then 404.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{ConnectInfo, Form, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use quickserve_common::{
    EvalJob, ExecSource, HandlerJob, HandlerRegistry, Job, JobError, PathParams, RouteKey,
    RouteTarget,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bridge;
use crate::metrics::METRIC_UNROUTED_TOTAL;
use crate::queue::JobQueue;
use crate::store::{ExecutionStore, ListFilter};

/// Shared state of the HTTP side.
#[derive(Clone)]
pub struct AppState {
    /// Producer handle on the job queue.
    pub queue: JobQueue,
    /// Handler and file registrations.
    pub registry: Arc<HandlerRegistry>,
    /// Execution record store, read by the admin endpoint.
    pub store: ExecutionStore,
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/v1/execute", post(execute_script))
        .route("/admin/scripts", post(list_executions))
        .fallback(dispatch_dynamic)
        .with_state(state)
}

/// `POST /v1/execute`: enqueue the body as a code submission and
/// acknowledge. Script-level failures still acknowledge with 202; they are
/// recorded in the execution store.
async fn execute_script(
    State(state): State<AppState>,
    request: Request,
) -> Response {
    let session_id = request
        .headers()
        .get("x-session-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let code = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(error) => {
            warn!(%error, "failed to read submission body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let (done_tx, done_rx) = oneshot::channel();
    let job = Job::Eval(EvalJob {
        code,
        session_id,
        source: ExecSource::Api,
        result: None,
        done: Some(done_tx),
    });

    if state.queue.submit(job).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    match done_rx.await {
        Ok(Ok(())) => (StatusCode::ACCEPTED, "JavaScript executed").into_response(),
        Ok(Err(JobError::Canceled)) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        Ok(Err(error)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct AdminQuery {
    search: Option<String>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    source: Option<String>,
    limit: Option<i64>,
    page: Option<i64>,
}

/// `POST /admin/scripts`: paginated listing of execution records.
async fn list_executions(
    State(state): State<AppState>,
    Form(query): Form<AdminQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(25).clamp(1, 500);
    let page = query.page.unwrap_or(1).max(1);

    let filter = ListFilter {
        search: query.search,
        session_id: query.session_id,
        source: query.source,
        limit,
        offset: (page - 1) * limit,
    };

    match state.store.list(&filter) {
        Ok((executions, total)) => Json(json!({
            "success": true,
            "executions": executions,
            "total": total,
            "limit": limit,
            "page": page,
            "totalPages": (total + limit - 1) / limit,
        }))
        .into_response(),
        Err(error) => {
            warn!(%error, "failed to list execution records");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": error.to_string() })),
            )
                .into_response()
        }
    }
}

/// Resolve a request against the registry and run the matched callable on
/// the dispatcher.
async fn dispatch_dynamic(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();

    let (target, content_type, params) = match resolve(&state.registry, &method, &path) {
        Some(resolved) => resolved,
        None => {
            metrics::counter!(METRIC_UNROUTED_TOTAL).increment(1);
            debug!(%method, %path, "no registration matched");
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);
    let script_request = bridge::build_request(request, params, remote_addr).await;

    let (respond_tx, respond_rx) = oneshot::channel();
    let job = Job::Handler(HandlerJob {
        target,
        content_type,
        request: script_request,
        respond: respond_tx,
    });

    if state.queue.submit(job).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    match respond_rx.await {
        Ok(reply) => bridge::reply_to_response(reply),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

// Resolution order: exact `(path, method)` match, then patterns in
// registration order, then file registrations. A static path registered
// after a pattern still wins because the exact lookup runs first.
fn resolve(
    registry: &HandlerRegistry,
    method: &str,
    path: &str,
) -> Option<(RouteTarget, Option<String>, PathParams)> {
    if let Some(record) = registry.lookup_handler(method, path) {
        return Some((
            RouteTarget::Handler(RouteKey::new(method, path)),
            record.content_type.clone(),
            PathParams::new(),
        ));
    }

    if let Some((key, params)) = registry.match_pattern(method, path) {
        let content_type = registry
            .record(&key)
            .and_then(|record| record.content_type.clone());
        return Some((RouteTarget::Handler(key), content_type, params));
    }

    if registry.has_file(path) {
        return Some((
            RouteTarget::File(path.to_string()),
            Some("application/octet-stream".to_string()),
            PathParams::new(),
        ));
    }

    None
}
