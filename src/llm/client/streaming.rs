//! OpenAI兼容接口的SSE流式输出

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use serde_json::{Value, json};

use crate::config::LLMConfig;
use crate::llm::gateway::TextStream;

/// 单行SSE数据的解析结果
#[derive(Debug, PartialEq)]
pub(crate) enum SseEvent {
    Delta(String),
    Done,
    Skip,
}

/// 发起流式对话请求
pub async fn stream_chat(
    http: &reqwest::Client,
    config: &LLMConfig,
    model: &str,
    system_prompt: &str,
    user_prompt: &str,
) -> Result<TextStream> {
    let url = format!(
        "{}/chat/completions",
        config.api_base_url.trim_end_matches('/')
    );
    let body = json!({
        "model": model,
        "stream": true,
        "temperature": config.temperature,
        "max_tokens": config.max_tokens,
        "messages": [
            {"role": "system", "content": system_prompt},
            {"role": "user", "content": user_prompt},
        ],
    });

    let response = http
        .post(&url)
        .bearer_auth(&config.api_key)
        .json(&body)
        .send()
        .await
        .context("发送流式请求失败")?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        bail!("流式接口返回错误 {}: {}", status, text);
    }

    let mut bytes = Box::pin(response.bytes_stream());
    let stream = async_stream::try_stream! {
        let mut buffer: Vec<u8> = Vec::new();
        'outer: while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(anyhow::Error::from)?;
            buffer.extend_from_slice(&chunk);

            // 只解码完整的行，避免多字节字符被网络分包截断
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                match parse_sse_line(line.trim()) {
                    SseEvent::Delta(text) => {
                        yield text;
                    }
                    SseEvent::Done => break 'outer,
                    SseEvent::Skip => {}
                }
            }
        }
    };

    Ok(Box::pin(stream))
}

/// 解析一行 `data: {...}`
pub(crate) fn parse_sse_line(line: &str) -> SseEvent {
    let Some(payload) = line.strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return SseEvent::Done;
    }

    let Ok(value) = serde_json::from_str::<Value>(payload) else {
        return SseEvent::Skip;
    };
    match value["choices"][0]["delta"]["content"].as_str() {
        Some(text) if !text.is_empty() => SseEvent::Delta(text.to_string()),
        _ => SseEvent::Skip,
    }
}
