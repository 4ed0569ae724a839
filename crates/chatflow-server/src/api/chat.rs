use axum::{
    Json,
    body::Body,
    extract::{Query, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::Response,
};
use chatflow_ai::{ChatRequest, GenerationStream, StreamProtocol, encode_stream};
use futures::StreamExt;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

pub const SESSION_HEADER: &str = "x-session-id";

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub protocol: Option<String>,
}

fn session_id(request: &ChatRequest, headers: &HeaderMap) -> Option<String> {
    request.session_id.clone().or_else(|| {
        headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}

/// POST /chat-stream and /api/chat
///
/// Failures before the first generated event become a JSON error response.
/// Later failures end the body early.
pub async fn chat_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let protocol = StreamProtocol::parse(query.protocol.as_deref())?;
    let Json(request) = payload?;
    let session_id = session_id(&request, &headers);
    let input = request.into_input()?;

    let request_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(
        request_id = %request_id,
        session_id = session_id.as_deref().unwrap_or("default"),
        messages = input.messages().len(),
        protocol = ?protocol,
        "Chat stream request"
    );

    let mut events = state.driver.stream(input, session_id);
    let events: GenerationStream = match events.next().await {
        Some(Err(err)) => return Err(err.into()),
        Some(Ok(first)) => Box::pin(futures::stream::once(async move { Ok(first) }).chain(events)),
        None => events,
    };

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, protocol.content_type())
        .header(header::CACHE_CONTROL, "no-cache");
    for (name, value) in protocol.headers() {
        response = response.header(*name, *value);
    }

    response
        .body(Body::from_stream(encode_stream(events, protocol)))
        .map_err(|err| ApiError::internal(err.to_string()))
}

/// POST /chat
///
/// Sends the whole conversation to the direct model and returns the reply as
/// a JSON string.
pub async fn chat_direct(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<String>, ApiError> {
    let Json(request) = payload?;
    let input = request.into_input()?;

    tracing::info!(messages = input.messages().len(), "Direct chat request");

    let reply = state.driver.complete_direct(&input).await?;
    Ok(Json(reply.text))
}
