//! LLM客户端 - 提供统一的LLM服务接口

use std::future::Future;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::{Config, LLMConfig};
use crate::llm::gateway::{LlmGateway, TextStream};

mod embedding;
mod providers;
mod streaming;
pub mod utils;

use providers::ProviderClient;
use utils::evaluate_befitting_model;

/// LLM客户端 - 提供统一的LLM服务接口
#[derive(Clone)]
pub struct LLMClient {
    config: Config,
    client: ProviderClient,
    http: reqwest::Client,
    stream_http: reqwest::Client,
    embedding_enabled: bool,
}

/// 流式请求专用的HTTP客户端
///
/// 不设整体超时，长回答只要持续有数据就不会被截断；
/// 连接建立和两次读取之间的间隔仍受`timeout_seconds`约束。
pub(crate) fn streaming_http_client(config: &LLMConfig) -> Result<reqwest::Client> {
    let timeout = Duration::from_secs(config.timeout_seconds.max(1));
    Ok(reqwest::Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()?)
}

impl LLMClient {
    /// 创建新的LLM客户端
    pub fn new(config: Config) -> Result<Self> {
        let client = ProviderClient::new(&config.llm)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.llm.timeout_seconds))
            .build()?;
        let stream_http = streaming_http_client(&config.llm)?;

        let embedding_enabled =
            config.embedding.enabled && !config.embedding.api_key.trim().is_empty();
        if config.embedding.enabled && !embedding_enabled {
            warn!("⚠️ 未配置Embedding API KEY，向量检索已禁用，将只使用关键词与图谱检索");
        }

        Ok(Self {
            config,
            client,
            http,
            stream_http,
            embedding_enabled,
        })
    }

    /// 检查模型连接和功能是否正常
    pub async fn check_connection(&self) -> Result<()> {
        info!("🔄 正在检查模型连接...");
        match self
            .complete("You are a helpful assistant.", "Hello", None)
            .await
        {
            Ok(_) => {
                info!("✅ 模型连接正常");
                Ok(())
            }
            Err(e) => {
                warn!("❌ 模型连接失败: {}", e);
                Err(e)
            }
        }
    }

    /// 通用重试逻辑，用于处理异步操作的重试机制
    async fn retry_with_backoff<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, anyhow::Error>>,
    {
        let llm_config = &self.config.llm;
        let max_retries = llm_config.retry_attempts.max(1);
        let retry_delay_ms = llm_config.retry_delay_ms;
        let mut retries = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    retries += 1;
                    warn!(
                        "❌ 调用模型服务出错，重试中 (第 {} / {}次尝试): {}",
                        retries, max_retries, err
                    );
                    if retries >= max_retries {
                        return Err(err);
                    }
                    tokio::time::sleep(Duration::from_millis(retry_delay_ms)).await;
                }
            }
        }
    }

    /// 使用指定模型完成一次对话
    async fn prompt_with_model(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f64,
    ) -> Result<String> {
        let llm_config = &self.config.llm;
        let agent = self
            .client
            .create_agent(model, system_prompt, temperature, llm_config);
        let timeout = Duration::from_secs(llm_config.timeout_seconds);

        self.retry_with_backoff(|| async {
            match tokio::time::timeout(timeout, agent.prompt(user_prompt)).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!("模型调用超时（{}秒）", timeout.as_secs())),
            }
        })
        .await
    }
}

#[async_trait]
impl LlmGateway for LLMClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: Option<f64>,
    ) -> Result<String> {
        let temperature = temperature.unwrap_or(self.config.llm.temperature);
        let (befitting_model, fallover_model) =
            evaluate_befitting_model(&self.config.llm, system_prompt, user_prompt);

        match self
            .prompt_with_model(&befitting_model, system_prompt, user_prompt, temperature)
            .await
        {
            Ok(text) => Ok(text),
            Err(e) => match fallover_model {
                Some(model) => {
                    warn!(
                        "❌ 调用模型服务出错，尝试 {} 次均失败，尝试使用备选模型{}...{}",
                        self.config.llm.retry_attempts, model, e
                    );
                    self.prompt_with_model(&model, system_prompt, user_prompt, temperature)
                        .await
                }
                None => Err(e),
            },
        }
    }

    async fn stream(&self, system_prompt: &str, user_prompt: &str) -> Result<TextStream> {
        if !self.config.llm.provider.supports_openai_streaming() {
            // 没有兼容的流式接口时退化为单个片段
            let text = self.complete(system_prompt, user_prompt, None).await?;
            return Ok(Box::pin(futures::stream::once(async move { Ok(text) })));
        }

        let (model, _) = evaluate_befitting_model(&self.config.llm, system_prompt, user_prompt);
        streaming::stream_chat(
            &self.stream_http,
            &self.config.llm,
            &model,
            system_prompt,
            user_prompt,
        )
        .await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Embedding接口返回为空"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if !self.embedding_enabled {
            bail!("向量化服务未启用");
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        embedding::embed_texts(&self.http, &self.config.embedding, texts).await
    }

    fn embedding_available(&self) -> bool {
        self.embedding_enabled
    }
}
