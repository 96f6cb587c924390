//! 测试用的脚本化网关

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::llm::gateway::{LlmGateway, TextStream};

type Responder = Box<dyn Fn(&str, &str) -> Result<String> + Send + Sync>;

/// 按(system, user)决定回复的网关替身
pub struct ScriptedGateway {
    responder: Responder,
    embeddings: bool,
    embed_broken: AtomicBool,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedGateway {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            embeddings: true,
            embed_broken: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 固定回复
    pub fn fixed(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(move |_, _| Ok(reply.clone()))
    }

    pub fn without_embeddings(mut self) -> Self {
        self.embeddings = false;
        self
    }

    /// 之后的向量化调用全部报错，但仍声明向量化可用
    pub fn break_embeddings(&self) {
        self.embed_broken.store(true, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    pub fn user_prompts(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.iter().map(|(_, user)| user.clone()).collect())
            .unwrap_or_default()
    }
}

/// 词袋哈希向量，相同词汇的文本相似度更高
pub fn toy_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; 64];
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let hash = word
            .bytes()
            .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
        vector[(hash % 64) as usize] += 1.0;
    }
    vector
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        _temperature: Option<f64>,
    ) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((system_prompt.to_string(), user_prompt.to_string()));
        }
        (self.responder)(system_prompt, user_prompt)
    }

    async fn stream(&self, system_prompt: &str, user_prompt: &str) -> Result<TextStream> {
        let text = self.complete(system_prompt, user_prompt, None).await?;
        let pieces: Vec<Result<String>> = text
            .split_inclusive(' ')
            .map(|piece| Ok(piece.to_string()))
            .collect();
        Ok(Box::pin(futures::stream::iter(pieces)))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if !self.embeddings {
            bail!("embeddings disabled");
        }
        if self.embed_broken.load(Ordering::SeqCst) {
            bail!("embedding endpoint unavailable");
        }
        Ok(toy_embedding(text))
    }

    fn embedding_available(&self) -> bool {
        self.embeddings
    }
}
