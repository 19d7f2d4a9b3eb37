pub(crate) mod coordinator;
pub(crate) mod pipeline;

use std::{convert::Infallible, sync::Arc};

use axum::extract::{Json, State};
use axum::response::{IntoResponse, Response, Sse};
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::events::RequestContext;
use crate::server::AppState;
use crate::upstream::GatewayChatCompletionRequest;

/// Chat Completions 流式入口：
/// - 先过模型白名单，再要求 `stream=true`
/// - 启动三路调用编排任务，事件经通道转成 SSE 响应
/// - 客户端断开即丢弃接收端，编排任务随之取消全部在飞调用
pub async fn stream_chat_completions(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<GatewayChatCompletionRequest>,
) -> Result<Response, GatewayError> {
    let capability = app_state.registry.resolve(&request.model)?;
    if !request.stream {
        return Err(GatewayError::InvalidRequest("stream=true is required".into()));
    }

    let request_id = request
        .request_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    tracing::info!(request_id = %request_id, model = %request.model, "stream request accepted");

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let ctx = RequestContext::new(request_id.clone(), tx);
    tokio::spawn(pipeline::run_pipeline(
        app_state.clone(),
        ctx,
        request,
        capability,
    ));

    let out_stream = tokio_stream::StreamExt::map(UnboundedReceiverStream::new(rx), move |event| {
        Ok::<_, Infallible>(event.to_sse(&request_id))
    });
    Ok(Sse::new(out_stream)
        .keep_alive(axum::response::sse::KeepAlive::default())
        .into_response())
}
