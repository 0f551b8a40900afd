use crate::app::WorkspaceHandle;
use crate::app::dto::*;
use crate::domain::error::GraphError;
use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct HttpState {
    pub handle: WorkspaceHandle,
}

#[derive(Debug, Clone, Deserialize)]
struct IdQuery {
    id: String,
}

#[derive(Debug, Clone, Serialize)]
struct ApiErrorBody {
    error: String,
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> impl IntoResponse {
    (status, Json(ApiErrorBody { error: msg.into() }))
}

/// Unknown ids are 404; anything else the workspace rejects is a bad request.
fn error_status(e: &anyhow::Error) -> StatusCode {
    match e.downcast_ref::<GraphError>() {
        Some(GraphError::ElementNotFound(_) | GraphError::TestNotFound(_)) => StatusCode::NOT_FOUND,
        None => StatusCode::BAD_REQUEST,
    }
}

/// Map the outcome of a fallible workspace job.
fn reply<T: Serialize>(result: Result<Result<T>>) -> Response {
    match result {
        Ok(Ok(res)) => Json(res).into_response(),
        Ok(Err(e)) => api_error(error_status(&e), format!("{e:#}")).into_response(),
        Err(e) => api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

/// Map the outcome of an infallible workspace job.
fn reply_ok<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(res) => Json(res).into_response(),
        Err(e) => api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

pub fn build_router(handle: WorkspaceHandle) -> Router {
    let state = Arc::new(HttpState { handle });

    Router::new()
        .route("/health", get(health))
        .route("/build", post(build_graph))
        .route("/update", post(update_file))
        .route("/changes", post(detect_changes))
        .route("/events", post(file_event))
        .route("/dependencies", get(dependencies))
        .route("/dependents", get(dependents))
        .route("/impact", post(test_impact))
        .route("/select", post(select))
        .route("/affected", post(affected))
        .route("/export", get(export))
        .route("/results", post(record_results))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn serve(handle: WorkspaceHandle, addr: SocketAddr) -> Result<()> {
    let app = build_router(handle);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<Arc<HttpState>>) -> Response {
    reply_ok(state.handle.call(|ws| ws.health()).await)
}

async fn build_graph(State(state): State<Arc<HttpState>>) -> Response {
    reply(state.handle.call(|ws| ws.build_graph()).await)
}

async fn update_file(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<PathRequest>,
) -> Response {
    reply(state.handle.call(move |ws| ws.update_file(&req.path)).await)
}

async fn detect_changes(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<PathRequest>,
) -> Response {
    reply(state.handle.call(move |ws| ws.detect_changes(&req.path)).await)
}

async fn file_event(State(state): State<Arc<HttpState>>, Json(event): Json<FileEvent>) -> Response {
    reply(state.handle.call(move |ws| ws.handle_file_event(event)).await)
}

async fn dependencies(State(state): State<Arc<HttpState>>, Query(q): Query<IdQuery>) -> Response {
    reply(state.handle.call(move |ws| ws.dependencies(&q.id)).await)
}

async fn dependents(State(state): State<Arc<HttpState>>, Query(q): Query<IdQuery>) -> Response {
    reply(state.handle.call(move |ws| ws.dependents(&q.id)).await)
}

async fn test_impact(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<ImpactRequest>,
) -> Response {
    reply_ok(state.handle.call(move |ws| ws.test_impact(&req)).await)
}

async fn select(State(state): State<Arc<HttpState>>, Json(req): Json<SelectRequest>) -> Response {
    reply_ok(state.handle.call(move |ws| ws.select(&req)).await)
}

async fn affected(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<AffectedRequest>,
) -> Response {
    reply(state.handle.call(move |ws| ws.affected(&req)).await)
}

async fn export(State(state): State<Arc<HttpState>>) -> Response {
    reply_ok(state.handle.call(|ws| ws.export()).await)
}

async fn record_results(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<RecordRequest>,
) -> Response {
    reply(state.handle.call(move |ws| ws.record_results(&req.results)).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fs::FileSourceReader;
    use crate::adapters::parser::PythonOutlineParser;
    use crate::adapters::store::{MemoryHistoryStore, MemorySnapshotStore};
    use crate::app::Workspace;
    use crate::config::ImpactConfig;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_handle(dir: &std::path::Path) -> WorkspaceHandle {
        std::fs::write(
            dir.join("app.py"),
            "def base():\n    \"\"\"\n    >>> base()\n    1\n    \"\"\"\n    return 1\n\n\ndef top():\n    return base()\n",
        )
        .unwrap();
        let ws = Workspace::new(
            dir.to_path_buf(),
            ImpactConfig::default(),
            Arc::new(FileSourceReader::new()),
            Arc::new(PythonOutlineParser::new()),
            Box::new(MemorySnapshotStore::new()),
            Box::new(MemoryHistoryStore::new()),
        );
        WorkspaceHandle::spawn(ws).unwrap()
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json(res: Response) -> serde_json::Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_http_build_query_and_select() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(make_handle(dir.path()));

        let res = app.clone().oneshot(get_req("/health")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app
            .clone()
            .oneshot(post("/build", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json(res).await["elements"], 2);

        let res = app
            .clone()
            .oneshot(get_req("/dependents?id=app.py:base"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json(res).await["elements"], serde_json::json!(["app.py:top"]));

        let res = app
            .clone()
            .oneshot(post("/select", serde_json::json!({ "changed": ["app.py:base"] })))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json(res).await;
        assert_eq!(body["entries"][0]["test_id"], "app.py:base#0");
        assert_eq!(body["entries"][0]["reason"], "direct_change");
    }

    #[tokio::test]
    async fn test_http_unknown_element_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(make_handle(dir.path()));

        let res = app
            .oneshot(get_req("/dependencies?id=app.py:missing"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(
            json(res).await["error"]
                .as_str()
                .unwrap()
                .contains("Element not found")
        );
    }

    #[tokio::test]
    async fn test_http_records_results() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(make_handle(dir.path()));

        let res = app
            .oneshot(post(
                "/results",
                serde_json::json!({ "results": [{
                    "test_id": "app.py:base#0",
                    "status": "fail",
                    "duration_ms": 12,
                    "timestamp": "2026-01-01T00:00:00Z"
                }]}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json(res).await["tracked_test_count"], 1);
    }
}
