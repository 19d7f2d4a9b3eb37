//! 模拟上游：本地演示与联调用的 chat-completions 替身。
//! 流式请求回放一段带 `<analysis>`/`<final>` 标签的固定文本（按 24 字符切块），
//! 非流式请求返回提示词的缩略摘要。

use std::convert::Infallible;
use std::time::Duration;

use axum::response::{IntoResponse, Response, Sse};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

fn summarize_text(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let snippet = words[..words.len().min(max_words)].join(" ");
    let ellipsis = if words.len() > max_words { "..." } else { "" };
    format!("Summary: {}{}", snippet, ellipsis)
}

fn stream_payload() -> &'static str {
    "<analysis>We need to answer the user's question. \
We'll recall relevant facts and provide a concise explanation.</analysis>\
<final>The sky is blue because shorter blue wavelengths are scattered more \
by the atmosphere, making blue light reach our eyes from many directions.</final>"
}

async fn chat_completions(Json(body): Json<Value>) -> Response {
    let stream = body.get("stream").and_then(|v| v.as_bool()).unwrap_or(false);

    if stream {
        let text = stream_payload();
        let events = text.as_bytes().chunks(24).map(|chunk| {
            let data = json!({
                "choices": [{"delta": {"content": String::from_utf8_lossy(chunk)}}]
            });
            Ok::<_, Infallible>(axum::response::sse::Event::default().data(data.to_string()))
        });
        let done = std::iter::once(Ok(axum::response::sse::Event::default().data("[DONE]")));
        let stream = tokio_stream::StreamExt::throttle(
            tokio_stream::iter(events.chain(done).collect::<Vec<_>>()),
            Duration::from_millis(10),
        );
        return Sse::new(stream).into_response();
    }

    let messages = body
        .get("messages")
        .and_then(|m| m.as_array())
        .cloned()
        .unwrap_or_default();
    let prompt = messages
        .iter()
        .map(|m| {
            format!(
                "{}: {}",
                m.get("role").and_then(|v| v.as_str()).unwrap_or_default(),
                m.get("content").and_then(|v| v.as_str()).unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    Json(json!({
        "choices": [{
            "message": {"role": "assistant", "content": summarize_text(&prompt, 20)}
        }]
    }))
    .into_response()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port: u16 = std::env::var("MOCK_UPSTREAM_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8001);
    let app = Router::new().route("/chat/completions", post(chat_completions));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("Mock upstream running on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_truncates_to_word_budget() {
        assert_eq!(summarize_text("a b c", 2), "Summary: a b...");
        assert_eq!(summarize_text("a b", 2), "Summary: a b");
        assert_eq!(summarize_text("", 2), "Summary: ");
    }
}
