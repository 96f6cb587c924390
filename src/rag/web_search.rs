//! 联网搜索
//!
//! 未配置搜索端点时使用[`DisabledWebSearch`]，调用方只看`is_available()`，
//! 不依赖调用时的错误来判断能力。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::WebSearchConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WebSearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImageRef {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub source_url: String,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    fn is_available(&self) -> bool;

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSearchResult>>;

    async fn search_images(&self, _query: &str, _max_results: usize) -> Result<Vec<ImageRef>> {
        Ok(Vec::new())
    }
}

/// 未启用联网搜索
pub struct DisabledWebSearch;

#[async_trait]
impl WebSearch for DisabledWebSearch {
    fn is_available(&self) -> bool {
        false
    }

    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<WebSearchResult>> {
        Ok(Vec::new())
    }
}

/// SearXNG兼容的JSON搜索接口
pub struct SearxngSearch {
    http: reqwest::Client,
    endpoint: String,
}

impl SearxngSearch {
    pub fn new(endpoint: &str, timeout_seconds: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn query(&self, params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}/search", self.endpoint);
        let response = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .with_context(|| format!("搜索请求失败: {}", url))?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

pub(crate) fn parse_search_results(body: &Value, max_results: usize) -> Vec<WebSearchResult> {
    body.get("results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|item| {
                    let url = item.get("url")?.as_str()?.to_string();
                    Some(WebSearchResult {
                        title: text_field(item, "title"),
                        snippet: text_field(item, "content"),
                        url,
                    })
                })
                .take(max_results)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn parse_image_results(body: &Value, max_results: usize) -> Vec<ImageRef> {
    body.get("results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|item| {
                    let url = item.get("img_src")?.as_str()?.to_string();
                    Some(ImageRef {
                        url,
                        title: text_field(item, "title"),
                        source_url: text_field(item, "url"),
                    })
                })
                .take(max_results)
                .collect()
        })
        .unwrap_or_default()
}

fn text_field(item: &Value, key: &str) -> String {
    item.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl WebSearch for SearxngSearch {
    fn is_available(&self) -> bool {
        true
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSearchResult>> {
        debug!("🌐 联网搜索: {}", query);
        let body = self.query(&[("q", query), ("format", "json")]).await?;
        Ok(parse_search_results(&body, max_results))
    }

    async fn search_images(&self, query: &str, max_results: usize) -> Result<Vec<ImageRef>> {
        let body = self
            .query(&[("q", query), ("format", "json"), ("categories", "images")])
            .await?;
        Ok(parse_image_results(&body, max_results))
    }
}

/// 按配置构建搜索实现，构建失败时降级为不可用
pub fn build_web_search(config: &WebSearchConfig) -> Arc<dyn WebSearch> {
    let endpoint = config
        .endpoint
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty());
    match (config.enabled, endpoint) {
        (true, Some(endpoint)) => match SearxngSearch::new(endpoint, config.timeout_seconds) {
            Ok(search) => {
                info!("🌐 联网搜索已启用: {}", endpoint);
                Arc::new(search)
            }
            Err(e) => {
                tracing::warn!("⚠️ 联网搜索初始化失败，已禁用: {}", e);
                Arc::new(DisabledWebSearch)
            }
        },
        _ => {
            info!("🌐 未配置搜索端点，联网搜索不可用");
            Arc::new(DisabledWebSearch)
        }
    }
}
