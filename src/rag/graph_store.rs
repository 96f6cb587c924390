//! 实体关系图谱存储
//!
//! [`GraphStore`]是图谱后端的窄接口：幂等合并、模糊检索、邻居查询、清空，
//! 以及与[`GraphSnapshot`]之间的导入导出。外部图数据库按同一接口接入，
//! 进程内实现见[`InMemoryGraphStore`]。

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::types::{GraphEntity, GraphRelationship, GraphSnapshot};
use super::{extract_requirement_ids, significant_words};

#[async_trait]
pub trait GraphStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// 合并实体，返回新增数量
    async fn add_entities(&self, names: &[String], source: &str) -> Result<usize>;

    /// 合并关系（端点实体不存在时一并创建），返回新增数量
    async fn add_relationships(
        &self,
        relationships: &[GraphRelationship],
        source: &str,
    ) -> Result<usize>;

    /// 按编号、子串匹配查找实体
    async fn search_entities(&self, query: &str, limit: usize) -> Result<Vec<GraphEntity>>;

    /// 与实体相连的关系
    async fn neighbors(&self, entity: &str, limit: usize) -> Result<Vec<GraphRelationship>>;

    async fn clear(&self) -> Result<()>;

    async fn export(&self) -> Result<GraphSnapshot>;

    /// 合并导入快照，返回新增实体数量
    async fn import(&self, snapshot: GraphSnapshot) -> Result<usize>;

    /// (实体数, 关系数)
    async fn counts(&self) -> Result<(usize, usize)>;
}

/// 进程内图谱
#[derive(Default)]
pub struct InMemoryGraphStore {
    graph: RwLock<GraphSnapshot>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// 实体名称是否与查询匹配
pub(crate) fn entity_matches(entity: &str, query: &str) -> bool {
    let entity_lower = entity.to_lowercase();
    let query_lower = query.to_lowercase();

    let entity_upper = entity.to_uppercase();
    if extract_requirement_ids(query)
        .iter()
        .any(|id| *id == entity_upper)
    {
        return true;
    }

    if significant_words(query)
        .iter()
        .any(|word| entity_lower.contains(word.as_str()))
    {
        return true;
    }

    significant_words(entity)
        .iter()
        .any(|word| query_lower.contains(word.as_str()))
}

fn merge_entity(graph: &mut GraphSnapshot, name: &str, source: &str) -> bool {
    let name = name.trim();
    if name.is_empty()
        || graph
            .entities
            .iter()
            .any(|e| e.name.eq_ignore_ascii_case(name))
    {
        return false;
    }
    let mut entity = GraphEntity::new(name);
    entity.source = Some(source.to_string());
    graph.entities.push(entity);
    true
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    fn backend_name(&self) -> &'static str {
        "in_memory"
    }

    async fn add_entities(&self, names: &[String], source: &str) -> Result<usize> {
        let mut graph = self.graph.write().await;
        Ok(names
            .iter()
            .filter(|name| merge_entity(&mut graph, name, source))
            .count())
    }

    async fn add_relationships(
        &self,
        relationships: &[GraphRelationship],
        source: &str,
    ) -> Result<usize> {
        let mut graph = self.graph.write().await;
        let mut added = 0;
        for rel in relationships {
            let rel = GraphRelationship::new(
                rel.source.trim(),
                rel.relation.trim(),
                rel.target.trim(),
            );
            if rel.source.is_empty() || rel.target.is_empty() || rel.relation.is_empty() {
                continue;
            }
            merge_entity(&mut graph, &rel.source, source);
            merge_entity(&mut graph, &rel.target, source);
            if !graph.relationships.contains(&rel) {
                graph.relationships.push(rel);
                added += 1;
            }
        }
        Ok(added)
    }

    async fn search_entities(&self, query: &str, limit: usize) -> Result<Vec<GraphEntity>> {
        let graph = self.graph.read().await;
        Ok(graph
            .entities
            .iter()
            .filter(|e| entity_matches(&e.name, query))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn neighbors(&self, entity: &str, limit: usize) -> Result<Vec<GraphRelationship>> {
        let graph = self.graph.read().await;
        Ok(graph
            .relationships
            .iter()
            .filter(|rel| rel.touches(entity))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut graph = self.graph.write().await;
        *graph = GraphSnapshot::default();
        Ok(())
    }

    async fn export(&self) -> Result<GraphSnapshot> {
        Ok(self.graph.read().await.clone())
    }

    async fn import(&self, snapshot: GraphSnapshot) -> Result<usize> {
        let mut graph = self.graph.write().await;
        let mut added = 0;
        for entity in snapshot.entities {
            let source = entity.source.clone().unwrap_or_else(|| "import".to_string());
            if merge_entity(&mut graph, &entity.name, &source) {
                added += 1;
            }
        }
        for rel in snapshot.relationships {
            if !graph.relationships.contains(&rel) {
                merge_entity(&mut graph, &rel.source, "import");
                merge_entity(&mut graph, &rel.target, "import");
                graph.relationships.push(rel);
            }
        }
        Ok(added)
    }

    async fn counts(&self) -> Result<(usize, usize)> {
        let graph = self.graph.read().await;
        Ok((graph.entities.len(), graph.relationships.len()))
    }
}
