//! 文档检索：切分、向量/关键词/图谱索引与混合检索链

pub mod chain;
pub mod graph_store;
pub mod index;
pub mod parser;
pub mod splitter;
pub mod types;
pub mod vector_store;
pub mod web_search;

use std::sync::LazyLock;

use regex::Regex;

pub use chain::{HybridRetrievalChain, RagResponse, RagStatus};
pub use index::DocumentIndex;
pub use types::*;

static REQUIREMENT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[a-z]{2,}-\d+\b").expect("valid requirement id pattern"));

/// 提取文本中的需求编号（如 REQ-001、FR-12），统一为大写
pub fn extract_requirement_ids(text: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for m in REQUIREMENT_ID.find_iter(text) {
        let id = m.as_str().to_uppercase();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// 查询中长度大于2的词
pub(crate) fn significant_words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| c.is_whitespace() || (c.is_ascii_punctuation() && c != '-'))
        .filter(|w| w.chars().count() > 2)
        .map(|w| w.to_string())
        .collect()
}

#[cfg(test)]
mod tests;
