//! 内存向量存储
//!
//! 余弦相似度暴力检索。没有向量的块（向量化不可用时写入）不参与相似度检索，
//! 但仍参与关键词检索。

use serde::{Deserialize, Serialize};

use super::types::DocumentChunk;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorStore {
    chunks: Vec<DocumentChunk>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 一次性追加一批块
    pub fn extend(&mut self, chunks: Vec<DocumentChunk>) {
        self.chunks.extend(chunks);
    }

    pub fn chunks(&self) -> &[DocumentChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    /// 最近邻检索，返回(相似度, 块)，按相似度降序
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(f32, DocumentChunk)> {
        let mut scored: Vec<(f32, &DocumentChunk)> = self
            .chunks
            .iter()
            .filter_map(|chunk| {
                chunk
                    .embedding
                    .as_ref()
                    .map(|vector| (cosine_similarity(query, vector), chunk))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(k)
            .map(|(score, chunk)| (score, chunk.clone()))
            .collect()
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}
