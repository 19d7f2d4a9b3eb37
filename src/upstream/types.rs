use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Gateway chat completion request envelope.
///
/// 对外端点兼容 OpenAI 风格，但网关额外支持 `summary_model`、`request_id`
/// 等自有字段；未识别的客户端字段收进 `extra`，原样透传给上游。
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default = "default_stream")]
    pub stream: bool,
    /// 摘要调用使用的模型；缺省时依次回退到配置默认值、主模型。
    pub summary_model: Option<String>,
    pub request_id: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    pub stop: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_stream() -> bool {
    true
}

/// 发往上游的请求体。网关自有字段（summary_model/request_id）不出现在这里。
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

const TAG_INSTRUCTION: &str = "Respond with reasoning inside <analysis>...</analysis> and the \
final answer inside <final>...</final>. Output only those tags and their content.";

/// 构造 Call B 请求，强制流式。标签解析策略下注入标签指令作为首条
/// system 消息；原生 reasoning 字段的模型不需要注入。
pub fn build_main_request(
    req: &GatewayChatCompletionRequest,
    inject_tag_instruction: bool,
) -> UpstreamRequest {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    if inject_tag_instruction {
        messages.push(Message::new("system", TAG_INSTRUCTION));
    }
    messages.extend(req.messages.iter().cloned());

    UpstreamRequest {
        model: req.model.clone(),
        messages,
        stream: true,
        temperature: req.temperature,
        max_tokens: req.max_tokens,
        top_p: req.top_p,
        stop: req.stop.clone(),
        extra: req.extra.clone(),
    }
}

/// 拼接摘要输入用的提示词文本。
pub fn build_prompt_text(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryKind {
    Prompt,
    Reasoning,
}

/// 非流式摘要调用的描述，消费一次。
#[derive(Debug, Clone)]
pub struct SummaryTask {
    pub kind: SummaryKind,
    pub text: String,
    pub model: String,
}

impl SummaryTask {
    pub fn prompt(text: String, model: String) -> Self {
        Self {
            kind: SummaryKind::Prompt,
            text,
            model,
        }
    }

    pub fn reasoning(text: String, model: String) -> Self {
        Self {
            kind: SummaryKind::Reasoning,
            text,
            model,
        }
    }

    pub fn to_request(&self) -> UpstreamRequest {
        let (system, user) = match self.kind {
            SummaryKind::Prompt => (
                "You are a concise assistant that summarizes user prompts.",
                format!(
                    "Summarize the following prompt in 1-2 sentences. \
Keep it faithful and brief.\n\nPrompt:\n{}",
                    self.text
                ),
            ),
            SummaryKind::Reasoning => (
                "You are a concise assistant that summarizes reasoning.",
                format!(
                    "Summarize the following reasoning in 2-3 bullet points. \
Focus on the key steps only.\n\nReasoning:\n{}",
                    self.text
                ),
            ),
        };

        UpstreamRequest {
            model: self.model.clone(),
            messages: vec![Message::new("system", system), Message::new("user", user)],
            stream: false,
            temperature: Some(0.2),
            max_tokens: None,
            top_p: None,
            stop: None,
            extra: Map::new(),
        }
    }
}

// ---- 上游 SSE 数据块（宽松解析，兼容 vendor 扩展） ----

#[derive(Debug, Default, Clone, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: StreamDeltaWire,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct StreamDeltaWire {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub reasoning: Option<String>,
}

/// 网关内部消费的单个流增量。
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StreamDelta {
    pub reasoning: Option<String>,
    pub content: Option<String>,
}

impl From<StreamChunk> for StreamDelta {
    fn from(chunk: StreamChunk) -> Self {
        let Some(choice) = chunk.choices.into_iter().next() else {
            return StreamDelta::default();
        };
        StreamDelta {
            reasoning: choice.delta.reasoning_content.or(choice.delta.reasoning),
            content: choice.delta.content,
        }
    }
}

/// Call B 通道上的条目；通道关闭即流正常结束。
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Delta(StreamDelta),
    /// 流中途失败：不可重试，交由编排器收敛。
    Failed(String),
}

// ---- 非流式响应 ----

#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionChoice {
    pub message: Message,
}

impl CompletionResponse {
    pub fn content(self) -> Option<String> {
        self.choices.into_iter().next().map(|c| c.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_collects_unknown_fields() {
        let req: GatewayChatCompletionRequest = serde_json::from_value(json!({
            "model": "reasoning-llm",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
            "summary_model": "fast-llm",
            "frequency_penalty": 0.5
        }))
        .unwrap();

        assert_eq!(req.model, "reasoning-llm");
        assert!(req.stream);
        assert_eq!(req.summary_model.as_deref(), Some("fast-llm"));
        assert_eq!(req.extra.get("frequency_penalty"), Some(&json!(0.5)));
    }

    #[test]
    fn stream_defaults_to_true() {
        let req: GatewayChatCompletionRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": []
        }))
        .unwrap();
        assert!(req.stream);
    }

    #[test]
    fn main_request_injects_tag_instruction_first() {
        let req: GatewayChatCompletionRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "why is the sky blue?"}],
            "temperature": 0.7
        }))
        .unwrap();

        let upstream = build_main_request(&req, true);
        assert!(upstream.stream);
        assert_eq!(upstream.messages.len(), 2);
        assert_eq!(upstream.messages[0].role, "system");
        assert!(upstream.messages[0].content.contains("<analysis>"));
        assert!(upstream.messages[0].content.contains("<final>"));
        assert_eq!(upstream.messages[1].content, "why is the sky blue?");
        assert_eq!(upstream.temperature, Some(0.7));
    }

    #[test]
    fn main_request_without_injection_keeps_messages_untouched() {
        let req: GatewayChatCompletionRequest = serde_json::from_value(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();

        let upstream = build_main_request(&req, false);
        assert!(upstream.stream);
        assert_eq!(upstream.messages.len(), 1);
        assert_eq!(upstream.messages[0].role, "user");
    }

    #[test]
    fn upstream_serialization_skips_absent_fields_and_flattens_extra() {
        let mut extra = Map::new();
        extra.insert("frequency_penalty".into(), json!(0.5));
        let req = UpstreamRequest {
            model: "m".into(),
            messages: vec![Message::new("user", "hi")],
            stream: true,
            temperature: None,
            max_tokens: None,
            top_p: None,
            stop: None,
            extra,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert!(v.get("temperature").is_none());
        assert_eq!(v.get("frequency_penalty"), Some(&json!(0.5)));
        assert!(v.get("summary_model").is_none());
    }

    #[test]
    fn prompt_text_joins_role_and_content() {
        let messages = vec![Message::new("system", "s"), Message::new("user", "u")];
        assert_eq!(build_prompt_text(&messages), "system: s\nuser: u");
    }

    #[test]
    fn summary_tasks_build_expected_requests() {
        let task = SummaryTask::prompt("user: hi".into(), "fast-llm".into());
        let req = task.to_request();
        assert!(!req.stream);
        assert_eq!(req.model, "fast-llm");
        assert_eq!(req.temperature, Some(0.2));
        assert!(req.messages[1].content.starts_with("Summarize the following prompt"));
        assert!(req.messages[1].content.ends_with("Prompt:\nuser: hi"));

        let task = SummaryTask::reasoning("step 1".into(), "fast-llm".into());
        let req = task.to_request();
        assert!(req.messages[1].content.contains("2-3 bullet points"));
        assert!(req.messages[1].content.ends_with("Reasoning:\nstep 1"));
    }

    #[test]
    fn stream_delta_prefers_reasoning_content_field() {
        let chunk: StreamChunk = serde_json::from_value(json!({
            "choices": [{"delta": {"reasoning_content": "a", "reasoning": "b", "content": "c"}}]
        }))
        .unwrap();
        let delta = StreamDelta::from(chunk);
        assert_eq!(delta.reasoning.as_deref(), Some("a"));
        assert_eq!(delta.content.as_deref(), Some("c"));

        let chunk: StreamChunk = serde_json::from_value(json!({
            "choices": [{"delta": {"reasoning": "b"}}]
        }))
        .unwrap();
        assert_eq!(StreamDelta::from(chunk).reasoning.as_deref(), Some("b"));
    }

    #[test]
    fn empty_chunk_yields_empty_delta() {
        let chunk: StreamChunk = serde_json::from_value(json!({"choices": []})).unwrap();
        assert_eq!(StreamDelta::from(chunk), StreamDelta::default());
    }

    #[test]
    fn completion_response_extracts_first_choice_content() {
        let resp: CompletionResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "SUMMARY"}}]
        }))
        .unwrap();
        assert_eq!(resp.content().as_deref(), Some("SUMMARY"));

        let resp: CompletionResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(resp.content().is_none());
    }
}
