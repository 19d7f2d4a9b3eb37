use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedSender;

/// 网关对外事件。单个请求内的事件顺序固定：
/// `summary.prompt` → `summary.reasoning` → `output.delta`* → `output.done`，
/// `error` 可替代后续序列（reasoning_summary 阶段除外，见 pipeline）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    SummaryPrompt { text: String },
    SummaryReasoning { text: String },
    OutputDelta { text: String },
    OutputDone,
    Error { message: String, stage: ErrorStage },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    ReasoningSummary,
    UpstreamStream,
}

impl ErrorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStage::ReasoningSummary => "reasoning_summary",
            ErrorStage::UpstreamStream => "upstream_stream",
        }
    }

    /// reasoning_summary 阶段的错误是唯一不终止流的错误。
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ErrorStage::ReasoningSummary)
    }
}

impl GatewayEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayEvent::SummaryPrompt { .. } => "summary.prompt",
            GatewayEvent::SummaryReasoning { .. } => "summary.reasoning",
            GatewayEvent::OutputDelta { .. } => "output.delta",
            GatewayEvent::OutputDone => "output.done",
            GatewayEvent::Error { .. } => "error",
        }
    }

    pub fn payload(&self, request_id: &str) -> Value {
        match self {
            GatewayEvent::SummaryPrompt { text }
            | GatewayEvent::SummaryReasoning { text }
            | GatewayEvent::OutputDelta { text } => {
                json!({ "text": text, "request_id": request_id })
            }
            GatewayEvent::OutputDone => json!({ "request_id": request_id }),
            GatewayEvent::Error { message, stage } => json!({
                "message": message,
                "stage": stage.as_str(),
                "request_id": request_id,
            }),
        }
    }

    pub fn to_sse(&self, request_id: &str) -> axum::response::sse::Event {
        axum::response::sse::Event::default()
            .event(self.kind())
            .data(self.payload(request_id).to_string())
    }
}

/// 单请求的发射端状态：事件计数与终态标记。
/// 终态一旦设置（output.done 或终止性 error），不再发出任何事件。
/// 通道里走领域事件，SSE 编码在响应边界完成。
pub struct RequestContext {
    request_id: String,
    tx: UnboundedSender<GatewayEvent>,
    emitted: u64,
    terminal: bool,
}

impl RequestContext {
    pub fn new(request_id: String, tx: UnboundedSender<GatewayEvent>) -> Self {
        Self {
            request_id,
            tx,
            emitted: 0,
            terminal: false,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// 发送一条事件；客户端已断开或已达终态时返回 false。
    pub fn emit(&mut self, event: GatewayEvent) -> bool {
        if self.terminal {
            return false;
        }
        let terminal = match &event {
            GatewayEvent::OutputDone => true,
            GatewayEvent::Error { stage, .. } => stage.is_terminal(),
            _ => false,
        };
        if self.tx.send(event).is_err() {
            self.terminal = true;
            return false;
        }
        self.emitted += 1;
        if terminal {
            self.terminal = true;
        }
        true
    }

    pub fn is_client_gone(&self) -> bool {
        self.tx.is_closed()
    }

    /// 挂起直至客户端断开（SSE 接收端被丢弃）。
    pub async fn client_gone(&self) {
        self.tx.closed().await
    }
}
