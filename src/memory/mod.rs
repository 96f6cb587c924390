//! 对话记忆
//!
//! 保存单个会话的消息缓冲、滚动摘要和关键实体。消息过多（或估算token超限）时，
//! 较早的消息由模型压缩进摘要，只保留最近几条原文。
//! 一个会话的轮次按顺序处理，记忆只由所属会话写入，因此方法直接取`&mut self`。

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;
use crate::llm::LlmGateway;
use crate::rag::significant_words;
use crate::rag::vector_store::cosine_similarity;
use crate::utils::token_estimator::TokenEstimator;

pub const EMPTY_HISTORY: &str = "No conversation history yet.";

const SUMMARY_PROMPT: &str = "Summarize the following conversation concisely, preserving key requirements, decisions, and context:";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// 需要长期记住的实体（如生成的需求条目）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationEntity {
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// 记忆统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub total_turns: usize,
    pub summarizations: usize,
}

impl Default for MemoryMetadata {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            last_updated: Utc::now(),
            total_turns: 0,
            summarizations: 0,
        }
    }
}

pub struct ConversationMemory {
    llm: Arc<dyn LlmGateway>,
    config: MemoryConfig,
    embedding_available: bool,
    estimator: TokenEstimator,
    messages: Vec<ChatMessage>,
    summary: String,
    entities: Vec<ConversationEntity>,
    metadata: MemoryMetadata,
}

impl ConversationMemory {
    pub fn new(llm: Arc<dyn LlmGateway>, config: MemoryConfig) -> Self {
        let embedding_available = llm.embedding_available();
        Self {
            llm,
            config,
            embedding_available,
            estimator: TokenEstimator::new(),
            messages: Vec::new(),
            summary: String::new(),
            entities: Vec::new(),
            metadata: MemoryMetadata::default(),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn entities(&self) -> &[ConversationEntity] {
        &self.entities
    }

    pub fn metadata(&self) -> &MemoryMetadata {
        &self.metadata
    }

    pub async fn add_message(&mut self, role: MessageRole, content: &str) {
        self.messages.push(ChatMessage::new(role, content));
        self.metadata.last_updated = Utc::now();
        if self.needs_summary() {
            self.summarize().await;
        }
    }

    /// 记录一轮完整的(用户, 助手)对话
    pub async fn save_turn(&mut self, user: &str, assistant: &str) {
        self.messages.push(ChatMessage::new(MessageRole::User, user));
        self.messages
            .push(ChatMessage::new(MessageRole::Assistant, assistant));
        self.metadata.total_turns += 1;
        self.metadata.last_updated = Utc::now();
        if self.needs_summary() {
            self.summarize().await;
        }
    }

    fn needs_summary(&self) -> bool {
        if self.messages.len() <= self.config.keep_recent {
            return false;
        }
        self.messages.len() > self.config.max_messages
            || self
                .estimator
                .estimate_all(self.messages.iter().map(|m| m.content.as_str()))
                > self.config.token_limit
    }

    /// 把较早的消息折叠进摘要；失败时保留原消息，下次再试
    async fn summarize(&mut self) {
        let split = self.messages.len() - self.config.keep_recent;
        let conversation = render_messages(&self.messages[..split]);

        match self.llm.complete(SUMMARY_PROMPT, &conversation, Some(0.3)).await {
            Ok(new_summary) => {
                let new_summary = new_summary.trim();
                self.summary = if self.summary.is_empty() {
                    new_summary.to_string()
                } else {
                    format!("{}\n\nAdditional context: {}", self.summary, new_summary)
                };
                self.messages.drain(..split);
                self.metadata.summarizations += 1;
                debug!("🧠 已将 {} 条消息压缩进对话摘要", split);
            }
            Err(e) => warn!("⚠️ 对话摘要失败，保留原始消息: {}", e),
        }
    }

    /// 摘要加最近消息的文本形式
    pub fn history_text(&self) -> String {
        let mut parts = Vec::new();
        if !self.summary.is_empty() {
            parts.push(format!("Previous context: {}", self.summary));
        }
        if !self.messages.is_empty() {
            parts.push(format!(
                "Recent conversation:\n{}",
                render_messages(&self.messages)
            ));
        }
        if parts.is_empty() {
            EMPTY_HISTORY.to_string()
        } else {
            parts.join("\n\n")
        }
    }

    /// 供prompt使用的完整上下文：历史加最近的关键实体
    pub fn conversation_context(&self) -> String {
        let mut context = self.history_text();
        if !self.entities.is_empty() {
            let start = self
                .entities
                .len()
                .saturating_sub(self.config.entity_context_count);
            let lines: Vec<String> = self.entities[start..]
                .iter()
                .map(|e| format!("- {}", e.text))
                .collect();
            context.push_str("\n\nKey Entities:\n");
            context.push_str(&lines.join("\n"));
        }
        context
    }

    /// 保存实体，返回是否同时保存了向量
    ///
    /// 向量化不可用或失败时实体仍以纯文本保存，此时返回`false`。
    pub async fn store_entity(&mut self, text: &str, metadata: BTreeMap<String, String>) -> bool {
        let mut entity = ConversationEntity {
            text: text.to_string(),
            metadata,
            embedding: None,
        };
        if !self.embedding_available {
            self.entities.push(entity);
            return false;
        }

        let stored = match self.llm.embed(text).await {
            Ok(vector) => {
                entity.embedding = Some(vector);
                true
            }
            Err(e) => {
                warn!("⚠️ 实体向量化失败，以纯文本保存: {}", e);
                false
            }
        };
        self.entities.push(entity);
        stored
    }

    /// 按相似度召回实体
    ///
    /// 没有向量时退化为关键词重叠排序，连关键词都不命中时返回最早的`top_k`个。
    pub async fn retrieve_entities(&self, query: &str, top_k: usize) -> Vec<ConversationEntity> {
        if self.entities.is_empty() || top_k == 0 {
            return Vec::new();
        }

        if self.embedding_available {
            match self.llm.embed(query).await {
                Ok(query_vector) => {
                    let mut scored: Vec<(f32, &ConversationEntity)> = self
                        .entities
                        .iter()
                        .filter_map(|e| {
                            e.embedding
                                .as_ref()
                                .map(|v| (cosine_similarity(&query_vector, v), e))
                        })
                        .collect();
                    if !scored.is_empty() {
                        scored.sort_by(|a, b| {
                            b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal)
                        });
                        return scored
                            .into_iter()
                            .take(top_k)
                            .map(|(_, e)| e.clone())
                            .collect();
                    }
                }
                Err(e) => warn!("⚠️ 实体检索向量化失败，改用关键词匹配: {}", e),
            }
        }

        let words = significant_words(query);
        let mut scored: Vec<(usize, &ConversationEntity)> = self
            .entities
            .iter()
            .map(|e| {
                let lower = e.text.to_lowercase();
                (words.iter().filter(|w| lower.contains(w.as_str())).count(), e)
            })
            .filter(|(score, _)| *score > 0)
            .collect();
        if scored.is_empty() {
            return self.entities.iter().take(top_k).cloned().collect();
        }
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(top_k)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.summary.clear();
        self.entities.clear();
        self.metadata = MemoryMetadata::default();
        info!("🧹 对话记忆已清空");
    }
}

fn render_messages(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests;
