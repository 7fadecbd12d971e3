use std::convert::Infallible;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::error::EngineError;
use crate::generation::ChatRequest;

use super::server::AppState;
use super::types::*;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn list_tools(State(state): State<AppState>) -> Json<ToolsResponse> {
    Json(ToolsResponse {
        tools: state.engine.registry().descriptors(),
    })
}

pub async fn reset_session(State(state): State<AppState>, Path(session_id): Path<String>) -> Json<ResetResponse> {
    state.engine.reset_session(&session_id);
    Json(ResetResponse {
        session_id,
        reset: true,
    })
}

/// Streams `ChatEvent`s as server-sent events. A terminal error becomes a final `{"type":"error"}` event.
pub async fn handle_chat(State(state): State<AppState>, Json(body): Json<ChatBody>) -> Response {
    let session_id = body
        .session_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let history = match state.engine.store().load_messages(&session_id).await {
        Ok(history) => history,
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to load history: {:#}", e),
            );
        }
    };

    let registry = state.engine.registry();
    let tools = match &body.tools {
        Some(names) => registry.descriptors_for(names),
        None => registry.descriptors(),
    };

    let request = ChatRequest {
        session_id,
        message: body.message,
        history,
        tool_outputs: body.tool_outputs,
        tools,
        max_turns: body.max_turns,
        parent_id: body.parent_id,
    };

    let stream = match state.engine.chat_stream(request) {
        Ok(stream) => stream,
        Err(e @ EngineError::InvalidInput(_)) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    let events = stream.map(|item| {
        let payload = match item {
            Ok(event) => serde_json::to_string(&event).unwrap_or_else(|e| {
                warn!("Failed to serialize chat event: {}", e);
                json!({ "type": "error", "message": e.to_string() }).to_string()
            }),
            Err(e) => json!({ "type": "error", "message": e.to_string() }).to_string(),
        };
        Ok::<_, Infallible>(Event::default().data(payload))
    });

    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
