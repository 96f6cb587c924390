//! OpenAI兼容的向量化接口
//!
//! `POST {api_base_url}/embeddings`，按`batch_size`分批请求。
//! 429和5xx按指数退避重试，其他4xx直接失败。

use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use serde_json::Value;
use tracing::warn;

use crate::config::EmbeddingConfig;

/// 批量向量化，结果与输入顺序一致
pub async fn embed_texts(
    http: &reqwest::Client,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(config.batch_size.max(1)) {
        vectors.extend(embed_batch(http, config, batch).await?);
    }
    Ok(vectors)
}

async fn embed_batch(
    http: &reqwest::Client,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/embeddings", config.api_base_url.trim_end_matches('/'));
    let body = serde_json::json!({
        "model": config.model,
        "input": texts,
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = http
            .post(&url)
            .bearer_auth(&config.api_key)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let json: Value = response.json().await?;
                    let vectors = parse_embedding_response(&json)?;
                    if vectors.len() != texts.len() {
                        bail!(
                            "Embedding接口返回数量不一致: 期望{}，实际{}",
                            texts.len(),
                            vectors.len()
                        );
                    }
                    return Ok(vectors);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!("⚠️ Embedding接口暂时不可用 ({})，准备重试", status);
                    last_err = Some(anyhow!("Embedding API error {}: {}", status, body_text));
                    continue;
                }
                bail!("Embedding API error {}: {}", status, body_text);
            }
            Err(e) => {
                warn!("⚠️ Embedding请求失败，准备重试: {}", e);
                last_err = Some(e.into());
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("Embedding failed after retries")))
}

/// 解析 `data[].embedding`，有`index`字段时按其排序
pub(crate) fn parse_embedding_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid embedding response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let vector = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid embedding response: missing embedding"))?
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| anyhow!("Invalid embedding response: non-numeric value"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, vector));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}
