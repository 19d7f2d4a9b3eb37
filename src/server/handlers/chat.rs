use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::error::GatewayError;
use crate::server::AppState;
use crate::server::streaming::stream_chat_completions;
use crate::upstream::GatewayChatCompletionRequest;

/// 本端点只提供有序 SSE 流，非流式请求直接拒绝。
pub async fn chat_completions(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<GatewayChatCompletionRequest>,
) -> Result<Response, GatewayError> {
    let response = stream_chat_completions(State(app_state), Json(request)).await?;
    Ok(response.into_response())
}
