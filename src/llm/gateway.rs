//! 大模型网关抽象
//!
//! 业务模块只依赖这个trait：文本生成、流式生成与向量化。
//! 真实实现见 [`crate::llm::client::LLMClient`]，测试中使用脚本化的替身。

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;

/// 流式生成的文本片段序列，只能消费一次
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// 单轮生成，`temperature`为空时使用配置中的默认值
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: Option<f64>,
    ) -> Result<String>;

    /// 流式生成
    async fn stream(&self, system_prompt: &str, user_prompt: &str) -> Result<TextStream>;

    /// 文本向量化
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 批量向量化，结果与输入一一对应
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// 向量化能力是否可用，构造时确定
    fn embedding_available(&self) -> bool;
}
