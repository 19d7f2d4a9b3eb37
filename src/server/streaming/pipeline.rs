use std::sync::Arc;

use chrono::Utc;
use tokio::task::AbortHandle;

use crate::capability::{ModelCapability, ParseStrategy};
use crate::events::{ErrorStage, GatewayEvent, RequestContext};
use crate::parser::TagParser;
use crate::server::AppState;
use crate::server::streaming::coordinator::StreamCoordinator;
use crate::upstream::{
    GatewayChatCompletionRequest, StreamEvent, SummaryTask, UpstreamApi, UpstreamRequest,
    build_main_request, build_prompt_text,
};

/// 取消监督：随编排任务一起销毁，把仍在飞行的子任务一并中止。
/// 客户端断开 → SSE 接收端被丢弃 → 编排器在下一个挂起点返回 → 这里兜底。
struct CancelGuard {
    handles: Vec<AbortHandle>,
}

impl CancelGuard {
    fn new(handles: Vec<AbortHandle>) -> Self {
        Self { handles }
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// 三路调用编排（Call A 提示词摘要 / Call B 带标签流 / Call C 推理摘要）。
///
/// 事件顺序由本函数的控制流保证，与上游各调用的完成先后无关：
/// `summary.prompt` → `summary.reasoning` → `output.delta`* → `output.done`。
/// 每个挂起点都同时监听客户端断开信号。
pub async fn run_pipeline(
    state: Arc<AppState>,
    mut ctx: RequestContext,
    request: GatewayChatCompletionRequest,
    capability: ModelCapability,
) {
    let started = Utc::now();
    let model = request.model.clone();
    let summary_model = request
        .summary_model
        .clone()
        .or_else(|| capability.summary_model_default.clone())
        .unwrap_or_else(|| request.model.clone());

    let prompt_text = build_prompt_text(&request.messages);
    let main_payload = build_main_request(
        &request,
        capability.parse_strategy == ParseStrategy::TagBoundary,
    );
    let max_reasoning_chars = state.config.pipeline.max_reasoning_chars;

    let coordinator = Arc::new(StreamCoordinator::new());

    // Call B：消费任务独占解析器与协调器写入端
    let consume = tokio::spawn(consume_stream(
        state.upstream.clone(),
        main_payload,
        coordinator.clone(),
        capability.native_field_preempts,
    ));

    // Call A：与 Call B 并行，首个事件不等待流
    let prompt_upstream = state.upstream.clone();
    let prompt_summary_model = summary_model.clone();
    let prompt_call = tokio::spawn(async move {
        prompt_upstream
            .complete(SummaryTask::prompt(prompt_text, prompt_summary_model))
            .await
    });

    let _guard = CancelGuard::new(vec![consume.abort_handle(), prompt_call.abort_handle()]);

    // 1) summary.prompt：失败则降级为空文本继续
    let prompt_summary = tokio::select! {
        result = prompt_call => match result {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                tracing::warn!(request_id = %ctx.request_id(), error = %e, "prompt summary failed, emitting empty summary");
                String::new()
            }
            Err(e) => {
                tracing::warn!(request_id = %ctx.request_id(), error = %e, "prompt summary task aborted");
                String::new()
            }
        },
        _ = ctx.client_gone() => {
            tracing::debug!(request_id = %ctx.request_id(), "client disconnected before prompt summary");
            return;
        }
    };
    if !ctx.emit(GatewayEvent::SummaryPrompt {
        text: prompt_summary,
    }) {
        return;
    }

    // 2) 等待推理边界闭合（或流直接结束）
    tokio::select! {
        _ = coordinator.wait_reasoning_boundary() => {}
        _ = ctx.client_gone() => {
            tracing::debug!(request_id = %ctx.request_id(), "client disconnected awaiting reasoning boundary");
            return;
        }
    }

    // 3) summary.reasoning：有推理文本才发起 Call C
    let reasoning_text = coordinator.reasoning_snapshot(max_reasoning_chars);
    if reasoning_text.is_empty() {
        if !ctx.emit(GatewayEvent::SummaryReasoning {
            text: String::new(),
        }) {
            return;
        }
    } else {
        let task = SummaryTask::reasoning(reasoning_text, summary_model);
        let result = tokio::select! {
            result = state.upstream.complete(task) => result,
            _ = ctx.client_gone() => {
                tracing::debug!(request_id = %ctx.request_id(), "client disconnected during reasoning summary");
                return;
            }
        };
        match result {
            Ok(text) => {
                if !ctx.emit(GatewayEvent::SummaryReasoning { text }) {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(request_id = %ctx.request_id(), error = %e, "reasoning summary failed");
                ctx.emit(GatewayEvent::Error {
                    message: "reasoning summary failed".into(),
                    stage: ErrorStage::ReasoningSummary,
                });
                if !ctx.emit(GatewayEvent::SummaryReasoning {
                    text: String::new(),
                }) {
                    return;
                }
            }
        }
    }

    // 4) 冲刷并持续转发最终输出
    let Some(mut final_rx) = coordinator.take_final_receiver() else {
        tracing::error!(request_id = %ctx.request_id(), "final queue already taken");
        return;
    };
    loop {
        tokio::select! {
            chunk = final_rx.recv() => match chunk {
                Some(text) => {
                    if !ctx.emit(GatewayEvent::OutputDelta { text }) {
                        return;
                    }
                }
                None => break,
            },
            _ = ctx.client_gone() => {
                tracing::debug!(request_id = %ctx.request_id(), "client disconnected during output");
                return;
            }
        }
    }

    // 5) 终态：流失败则以 error 收尾，不再发 output.done
    if let Some(message) = coordinator.failure() {
        tracing::error!(request_id = %ctx.request_id(), error = %message, "upstream stream failed");
        ctx.emit(GatewayEvent::Error {
            message,
            stage: ErrorStage::UpstreamStream,
        });
        return;
    }

    ctx.emit(GatewayEvent::OutputDone);
    let elapsed_ms = (Utc::now() - started).num_milliseconds();
    tracing::info!(
        request_id = %ctx.request_id(),
        model = %model,
        events = ctx.emitted(),
        elapsed_ms,
        "stream completed"
    );
}

/// Call B 消费：把上游数据块经解析器分类后写入协调器。
///
/// 原生 reasoning 字段（开启时）优先于标签解析；整条流没有任何标签时，
/// 原始内容整体回退为最终输出。
async fn consume_stream(
    upstream: Arc<dyn UpstreamApi>,
    payload: UpstreamRequest,
    coordinator: Arc<StreamCoordinator>,
    native_field_preempts: bool,
) {
    let mut parser = TagParser::new();
    let mut raw_chunks: Vec<String> = Vec::new();
    let mut used_reasoning_field = false;

    let mut rx = match upstream.open_stream(payload).await {
        Ok(rx) => rx,
        Err(e) => {
            coordinator.finish(Some(e.to_string()));
            return;
        }
    };

    let mut failure: Option<String> = None;
    while let Some(item) = rx.recv().await {
        match item {
            StreamEvent::Delta(delta) => {
                if native_field_preempts
                    && let Some(reasoning) = delta.reasoning.filter(|s| !s.is_empty())
                {
                    used_reasoning_field = true;
                    coordinator.append_reasoning(&reasoning);
                }

                let Some(content) = delta.content.filter(|s| !s.is_empty()) else {
                    continue;
                };
                raw_chunks.push(content.clone());

                if used_reasoning_field {
                    coordinator.mark_analysis_done();
                    coordinator.push_final(content);
                } else {
                    let inc = parser.feed(&content);
                    if !inc.reasoning_delta.is_empty() {
                        coordinator.append_reasoning(&inc.reasoning_delta);
                    }
                    if inc.analysis_done {
                        coordinator.mark_analysis_done();
                    }
                    if !inc.final_delta.is_empty() {
                        // 未见 </analysis> 就出现最终输出（如只有 <final> 段）：
                        // 也视作推理边界已过
                        coordinator.mark_analysis_done();
                        coordinator.push_final(inc.final_delta);
                    }
                }
            }
            StreamEvent::Failed(message) => {
                failure = Some(message);
                break;
            }
        }
    }

    if failure.is_none() {
        if coordinator.has_reasoning() {
            coordinator.mark_analysis_done();
        }

        if !used_reasoning_field {
            let inc = parser.finalize();
            if !inc.reasoning_delta.is_empty() {
                coordinator.append_reasoning(&inc.reasoning_delta);
                coordinator.mark_analysis_done();
            }
            if !inc.final_delta.is_empty() {
                coordinator.push_final(inc.final_delta);
            }

            if !parser.seen_any_tag() && !raw_chunks.is_empty() {
                for chunk in raw_chunks {
                    coordinator.push_final(chunk);
                }
                coordinator.mark_analysis_done();
            }
        }
    }

    coordinator.finish(failure);
}
