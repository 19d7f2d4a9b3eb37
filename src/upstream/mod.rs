pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest_eventsource::{Error as EsError, Event, EventSource, RequestBuilderExt};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::config::UpstreamConfig;
use crate::error::{GatewayError, Result, is_retryable_status};
use crate::http_client;
pub use types::{
    CompletionResponse, GatewayChatCompletionRequest, Message, StreamChunk, StreamDelta,
    StreamEvent, SummaryKind, SummaryTask, UpstreamRequest, build_main_request, build_prompt_text,
};

/// 上游 chat-completions API 的调用接口。以 trait 形式给出，
/// 便于在测试里用桩实现替换真实 HTTP 客户端。
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// 非流式摘要调用，返回 `choices[0].message.content`。
    async fn complete(&self, task: SummaryTask) -> Result<String>;

    /// 打开流式应答调用，返回按序的数据块通道；通道关闭即流结束。
    /// 仅初始连接参与重试，流一旦开始产出数据块，中途失败不再重试。
    async fn open_stream(&self, request: UpstreamRequest) -> Result<UnboundedReceiver<StreamEvent>>;

    /// 上游可达性探测。
    async fn ping(&self) -> bool;
}

/// 指数退避：base * 2^attempt（attempt 从 0 起），不加抖动。
pub fn backoff_delay(base_secs: f64, attempt: u32) -> Duration {
    Duration::from_secs_f64(base_secs * f64::powi(2.0, attempt as i32))
}

pub struct UpstreamClient {
    config: UpstreamConfig,
    /// 摘要调用的客户端：整体超时 = summary_timeout（单次尝试）。
    summary_client: reqwest::Client,
    /// 流式调用的客户端：不设整体超时，初始连接单独用计时器约束。
    stream_client: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self> {
        let summary_client = http_client::client_with_timeout(config.summary_timeout())?;
        let stream_client = http_client::client()?;
        Ok(Self {
            config,
            summary_client,
            stream_client,
        })
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    async fn try_complete(&self, url: &str, payload: &UpstreamRequest) -> Result<String> {
        let builder = self
            .summary_client
            .post(url)
            .header("Content-Type", "application/json")
            .json(payload);
        let response = self.apply_auth(builder).send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::UpstreamTimeout(e.to_string())
            } else {
                GatewayError::Http(e)
            }
        })?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let message = response.text().await.unwrap_or_default();
            if is_retryable_status(status.as_u16()) {
                return Err(GatewayError::UpstreamUnavailable(format!(
                    "status {}: {}",
                    status.as_u16(),
                    message
                )));
            }
            return Err(GatewayError::UpstreamClientError {
                status: status.as_u16(),
                message,
            });
        }

        let data: CompletionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::UpstreamProtocol(e.to_string()))?;
        data.content()
            .ok_or_else(|| GatewayError::UpstreamProtocol("missing choices[0].message.content".into()))
    }

    fn stream_builder(&self, url: &str, payload: &UpstreamRequest) -> reqwest::RequestBuilder {
        let builder = self
            .stream_client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(payload);
        self.apply_auth(builder)
    }
}

#[async_trait]
impl UpstreamApi for UpstreamClient {
    async fn complete(&self, task: SummaryTask) -> Result<String> {
        let url = self.config.completions_url();
        let payload = task.to_request();
        let mut attempt = 0u32;
        loop {
            match self.try_complete(&url, &payload).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(self.config.retry_backoff_secs, attempt);
                    tracing::warn!(
                        error = %e,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "summary call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn open_stream(&self, request: UpstreamRequest) -> Result<UnboundedReceiver<StreamEvent>> {
        let url = self.config.completions_url();
        let mut attempt = 0u32;
        loop {
            let builder = self.stream_builder(&url, &request);
            let mut es = builder
                .eventsource()
                .map_err(|e| GatewayError::Config(format!("cannot build eventsource: {}", e)))?;

            let first = tokio::time::timeout(self.config.request_timeout(), es.next()).await;
            let error = match first {
                Ok(Some(Ok(event))) => {
                    let (tx, rx) = unbounded_channel();
                    match event {
                        Event::Open => {
                            tokio::spawn(forward_stream(es, tx));
                        }
                        // Open 之外的首事件（少见）也一并转发
                        Event::Message(m) => {
                            if forward_message(&m.data, &tx) {
                                tokio::spawn(forward_stream(es, tx));
                            } else {
                                es.close();
                            }
                        }
                    }
                    return Ok(rx);
                }
                Ok(Some(Err(e))) => {
                    es.close();
                    classify_connect_error(e).await
                }
                Ok(None) => {
                    es.close();
                    GatewayError::UpstreamUnavailable("stream closed before open".into())
                }
                Err(_) => {
                    es.close();
                    GatewayError::UpstreamTimeout(format!(
                        "no response within {:.1}s",
                        self.config.request_timeout_secs
                    ))
                }
            };

            if error.is_retryable() && attempt < self.config.max_retries {
                let delay = backoff_delay(self.config.retry_backoff_secs, attempt);
                tracing::warn!(
                    error = %error,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "stream connect failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            return Err(error);
        }
    }

    async fn ping(&self) -> bool {
        let url = format!("{}/", self.config.base_url.trim_end_matches('/'));
        match self.summary_client.get(&url).send().await {
            Ok(resp) => resp.status().as_u16() < 500,
            Err(_) => false,
        }
    }
}

async fn classify_connect_error(e: EsError) -> GatewayError {
    match e {
        EsError::InvalidStatusCode(status, response) => {
            let message = response.text().await.unwrap_or_default();
            if is_retryable_status(status.as_u16()) {
                GatewayError::UpstreamUnavailable(format!(
                    "status {}: {}",
                    status.as_u16(),
                    message
                ))
            } else {
                GatewayError::UpstreamClientError {
                    status: status.as_u16(),
                    message,
                }
            }
        }
        EsError::Transport(e) => GatewayError::Http(e),
        EsError::StreamEnded => GatewayError::UpstreamUnavailable("stream ended before open".into()),
        other => GatewayError::UpstreamProtocol(other.to_string()),
    }
}

/// 把上游 SSE 逐条转发到请求内通道。消费端断开即尽快停止。
async fn forward_stream(mut es: EventSource, tx: UnboundedSender<StreamEvent>) {
    while let Some(ev) = es.next().await {
        match ev {
            Ok(Event::Open) => {}
            Ok(Event::Message(m)) => {
                if !forward_message(&m.data, &tx) {
                    break;
                }
            }
            // 无 [DONE] 直接断流：按正常结束处理
            Err(EsError::StreamEnded) => break,
            Err(e) => {
                tracing::error!("stream error: {}", e);
                let _ = tx.send(StreamEvent::Failed(e.to_string()));
                break;
            }
        }
        if tx.is_closed() {
            break;
        }
    }
    es.close();
}

/// 返回 false 表示流应当结束（[DONE] 或消费端已断开）。
fn forward_message(data: &str, tx: &UnboundedSender<StreamEvent>) -> bool {
    let data = data.trim();
    if data == "[DONE]" {
        return false;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => tx.send(StreamEvent::Delta(chunk.into())).is_ok(),
        // 非 JSON 行：忽略不丢流
        Err(_) => true,
    }
}
