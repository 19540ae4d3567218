//! axum `Router` wiring the gateway's ingress surface.

use crate::dispatcher::{self, DispatchRequest};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub started_at: chrono::DateTime<chrono::Utc>,
}

pub fn app() -> Router {
    let state = Arc::new(AppState { started_at: chrono::Utc::now() });
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/chat/completions", post(openai_chat))
        .route("/openai/*path", post(openai_chat))
        .route("/v1/messages", post(claude_messages))
        .route("/claude/*path", post(claude_messages))
        .route("/v1beta/models/:model", post(gemini_generate))
        .route("/v1/models", get(list_models))
        .route("/v1beta/models", get(list_models))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": (chrono::Utc::now() - state.started_at).num_seconds(),
    }))
}

async fn list_models() -> Json<Value> {
    Json(json!({
        "object": "list",
        "data": [
            {"id": "gpt-3.5-turbo", "object": "model"},
            {"id": "gpt-4", "object": "model"},
            {"id": "gemini-1.5-pro", "object": "model"},
            {"id": "gemini-1.5-flash", "object": "model"},
            {"id": "claude-3-5-sonnet-20240620", "object": "model"},
        ]
    }))
}

fn query_string(query: &HashMap<String, String>) -> String {
    query.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&")
}

async fn openai_chat(headers: HeaderMap, Query(query): Query<HashMap<String, String>>, Json(body): Json<Value>) -> Response {
    handle("/v1/chat/completions", headers, query, body).await
}

async fn claude_messages(headers: HeaderMap, Query(query): Query<HashMap<String, String>>, Json(body): Json<Value>) -> Response {
    handle("/v1/messages", headers, query, body).await
}

async fn gemini_generate(
    Path(model_and_action): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(mut body): Json<Value>,
) -> Response {
    let (model, stream) = match model_and_action.split_once(':') {
        Some((m, action)) => (m.to_string(), action == "streamGenerateContent"),
        None => (model_and_action, false),
    };
    if let Value::Object(ref mut map) = body {
        map.entry("model").or_insert(Value::String(model));
        map.insert("stream".to_string(), Value::Bool(stream));
    }
    handle("/v1beta/models/x", headers, query, body).await
}

async fn handle(path: &str, headers: HeaderMap, query: HashMap<String, String>, body: Value) -> Response {
    let req = DispatchRequest { path: path.to_string(), headers, query: query_string(&query), body };
    match dispatcher::dispatch(req).await {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_ok() {
        let app = app();
        let response = app
            .oneshot(axum::http::Request::builder().uri("/healthz").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
