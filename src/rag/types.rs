use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::{hash_text, truncate_chars};

/// 文档块，创建后不可变
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    pub text: String,
    pub source_file: String,
    pub filename: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl DocumentChunk {
    /// 去重键：正文前`prefix_chars`个字符的哈希
    pub fn dedup_key(&self, prefix_chars: usize) -> String {
        hash_text(truncate_chars(&self.text, prefix_chars))
    }
}

/// 已索引文件记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedFileRecord {
    pub file_path: String,
    pub filename: String,
    pub chunk_count: usize,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub parser: String,
    #[serde(default)]
    pub tables_count: usize,
    #[serde(default)]
    pub images_count: usize,
    #[serde(default = "Utc::now")]
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedFile {
    pub file_path: String,
    pub error: String,
}

/// 一次索引调用的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexReport {
    pub success: Vec<String>,
    pub failed: Vec<FailedFile>,
    pub skipped: Vec<String>,
    pub total_chunks: usize,
    /// 向量化失败时记录原因，块仍会以无向量形式写入
    pub index_error: Option<String>,
}

#[derive(Debug, Error, PartialEq)]
pub enum IndexError {
    #[error("没有提供需要索引的文件")]
    EmptyFileList,

    #[error("导入数据格式错误: {0}")]
    InvalidImport(String),
}

/// 图谱实体类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Requirement,
    Table,
    Technology,
    Concept,
}

const TECH_KEYWORDS: [&str; 7] = [
    "API", "DATABASE", "SERVER", "CLIENT", "MODULE", "SYSTEM", "SERVICE",
];

impl EntityType {
    /// 按名称特征推断实体类型
    pub fn detect(name: &str) -> Self {
        let upper = name.to_uppercase();
        if starts_with_requirement_id(&upper) {
            return EntityType::Requirement;
        }
        if upper.contains("TABLE") || name.contains('表') {
            return EntityType::Table;
        }
        if TECH_KEYWORDS.iter().any(|kw| upper.contains(kw)) {
            return EntityType::Technology;
        }
        EntityType::Concept
    }
}

/// `^[A-Z]{2,}-\d+`
fn starts_with_requirement_id(upper: &str) -> bool {
    let letters = upper.chars().take_while(|c| c.is_ascii_uppercase()).count();
    if letters < 2 {
        return false;
    }
    let mut rest = upper[letters..].chars();
    rest.next() == Some('-') && rest.next().is_some_and(|c| c.is_ascii_digit())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl GraphEntity {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let entity_type = EntityType::detect(&name);
        Self {
            name,
            entity_type,
            source: None,
        }
    }
}

/// 关系三元组，序列化为 `[source, relation, target]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "(String, String, String)", into = "(String, String, String)")]
pub struct GraphRelationship {
    pub source: String,
    pub relation: String,
    pub target: String,
}

impl GraphRelationship {
    pub fn new(
        source: impl Into<String>,
        relation: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            relation: relation.into(),
            target: target.into(),
        }
    }

    /// 关系是否涉及该实体（忽略大小写）
    pub fn touches(&self, entity: &str) -> bool {
        self.source.eq_ignore_ascii_case(entity) || self.target.eq_ignore_ascii_case(entity)
    }
}

impl From<(String, String, String)> for GraphRelationship {
    fn from((source, relation, target): (String, String, String)) -> Self {
        Self {
            source,
            relation,
            target,
        }
    }
}

impl From<GraphRelationship> for (String, String, String) {
    fn from(rel: GraphRelationship) -> Self {
        (rel.source, rel.relation, rel.target)
    }
}

/// 图谱的可序列化快照
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub entities: Vec<GraphEntity>,
    #[serde(default)]
    pub relationships: Vec<GraphRelationship>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSearchResult {
    pub entities: Vec<String>,
    pub relationships: Vec<GraphRelationship>,
    pub context_text: String,
    pub found: bool,
}

/// 索引统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_files: usize,
    pub total_chunks: usize,
    pub files: Vec<IndexedFileRecord>,
    pub graph_entities: usize,
    pub graph_relationships: usize,
    pub graph_backend: String,
    pub embedding_available: bool,
    pub needs_graph_update: bool,
}

/// 导入结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported_files: Vec<String>,
    pub skipped_files: Vec<String>,
    pub imported_chunks: usize,
    pub imported_entities: usize,
}
