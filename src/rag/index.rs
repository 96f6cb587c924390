//! 文档索引
//!
//! 负责把文件变成可检索的文本块，并回答三类查询：
//! - 向量相似度检索（[`DocumentIndex::similarity_search`]）
//! - 关键词检索，弥补向量检索对编号类精确词的盲区（[`DocumentIndex::keyword_search`]）
//! - 实体关系图谱检索（[`DocumentIndex::graph_search`]）
//!
//! 同一路径只索引一次；要更新文件内容，需要清空索引或换一个路径。
//! 每次变更后整体持久化到`storage_dir`（如果配置了）。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::RagConfig;
use crate::llm::LlmGateway;
use crate::utils::json_extract::{ParseFailure, extract_json_value};
use crate::utils::threads::do_parallel_with_limit;
use crate::utils::truncate_chars;

use super::graph_store::{GraphStore, InMemoryGraphStore};
use super::parser::{DocumentParser, PlainTextParser};
use super::splitter::TextSplitter;
use super::types::*;
use super::vector_store::VectorStore;
use super::{extract_requirement_ids, significant_words};

const EXPORT_VERSION: &str = "1.0";
const GRAPH_EXTRACTION_PARALLELS: usize = 3;

const GRAPH_EXTRACTION_PROMPT: &str = r#"You extract a knowledge graph from requirement documents.
Return ONLY a JSON object of the form:
{"entities": ["name", ...], "relationships": [["source", "relation", "target"], ...]}
Entities are requirement IDs (e.g. REQ-001), tables, technologies, components and key domain concepts.
Relationships connect two extracted entities with a short verb phrase."#;

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexState {
    store: VectorStore,
    files: Vec<IndexedFileRecord>,
    /// 已经参与过图谱抽取的块数量
    graph_doc_count: usize,
}

impl IndexState {
    fn contains(&self, file_path: &str) -> bool {
        self.files.iter().any(|f| f.file_path == file_path)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ExportMetadata {
    source: String,
    filename: String,
    chunk_index: usize,
    total_chunks: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    embedding: Option<Vec<f32>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ExportDocument {
    page_content: String,
    metadata: ExportMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexExport {
    version: String,
    indexed_files: Vec<IndexedFileRecord>,
    documents: Vec<ExportDocument>,
    #[serde(default)]
    graph_index: GraphSnapshot,
}

/// 单个文本块的图谱抽取结果
#[derive(Debug, Default)]
pub(crate) struct GraphExtraction {
    pub entities: Vec<String>,
    pub relationships: Vec<GraphRelationship>,
}

impl GraphExtraction {
    /// 宽松解析：实体可以是字符串或带name的对象，关系只接受三元组
    pub(crate) fn from_model_output(text: &str) -> Result<Self, ParseFailure> {
        let value = extract_json_value(text)?;
        let Some(object) = value.as_object() else {
            return Err(ParseFailure::Mismatch("expected a JSON object".to_string()));
        };

        let entities = object
            .get("entities")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(name) => Some(name.trim().to_string()),
                        Value::Object(obj) => obj
                            .get("name")
                            .and_then(Value::as_str)
                            .map(|name| name.trim().to_string()),
                        _ => None,
                    })
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let relationships = object
            .get("relationships")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let triple = item.as_array()?;
                        if triple.len() != 3 {
                            return None;
                        }
                        Some(GraphRelationship::new(
                            triple[0].as_str()?,
                            triple[1].as_str()?,
                            triple[2].as_str()?,
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            entities,
            relationships,
        })
    }
}

/// 文档索引
pub struct DocumentIndex {
    llm: Arc<dyn LlmGateway>,
    parser: Arc<dyn DocumentParser>,
    graph: Arc<dyn GraphStore>,
    splitter: TextSplitter,
    config: RagConfig,
    storage_dir: Option<PathBuf>,
    embedding_available: bool,
    state: RwLock<IndexState>,
}

impl DocumentIndex {
    /// 使用纯文本解析器和进程内图谱创建索引
    pub fn new(llm: Arc<dyn LlmGateway>, config: RagConfig) -> Self {
        let embedding_available = llm.embedding_available();
        if !embedding_available {
            warn!("⚠️ 向量化不可用，文档索引仅支持关键词与图谱检索");
        }
        Self {
            llm,
            parser: Arc::new(PlainTextParser),
            graph: Arc::new(InMemoryGraphStore::new()),
            splitter: TextSplitter::new(config.chunk_size, config.chunk_overlap),
            config,
            storage_dir: None,
            embedding_available,
            state: RwLock::new(IndexState::default()),
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn DocumentParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_graph_store(mut self, graph: Arc<dyn GraphStore>) -> Self {
        self.graph = graph;
        self
    }

    /// 持久化目录，变更后写入 `index.json` 与 `graph.json`
    pub fn with_storage(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    pub fn embedding_available(&self) -> bool {
        self.embedding_available
    }

    /// 从持久化目录恢复索引
    pub async fn load(&self) -> Result<bool> {
        let Some(dir) = &self.storage_dir else {
            return Ok(false);
        };
        let index_path = dir.join("index.json");
        if !index_path.exists() {
            return Ok(false);
        }

        let content = tokio::fs::read_to_string(&index_path)
            .await
            .with_context(|| format!("无法读取索引文件: {}", index_path.display()))?;
        let loaded: IndexState =
            serde_json::from_str(&content).context("索引文件格式错误")?;

        let graph_path = dir.join("graph.json");
        let snapshot = if graph_path.exists() {
            let content = tokio::fs::read_to_string(&graph_path).await?;
            serde_json::from_str(&content).context("图谱文件格式错误")?
        } else {
            GraphSnapshot::default()
        };

        let mut state = self.state.write().await;
        self.graph.clear().await?;
        self.graph.import(snapshot).await?;
        info!(
            "📂 已加载索引：{} 个文件，{} 个文本块",
            loaded.files.len(),
            loaded.store.len()
        );
        *state = loaded;
        Ok(true)
    }

    /// 索引一批文件
    ///
    /// 已索引过的路径（包括同一批次中重复出现的路径）记入`skipped`；单个文件失败
    /// 记入`failed`，不影响其他文件。新块在全部文件处理完后一次性向量化并写入。
    pub async fn index(&self, file_paths: &[PathBuf]) -> Result<IndexReport> {
        if file_paths.is_empty() {
            return Err(IndexError::EmptyFileList.into());
        }

        let known: HashSet<String> = {
            let state = self.state.read().await;
            state.files.iter().map(|f| f.file_path.clone()).collect()
        };

        let mut report = IndexReport::default();
        let mut seen = HashSet::new();
        let mut pending: Vec<(IndexedFileRecord, Vec<DocumentChunk>)> = Vec::new();

        for path in file_paths {
            let key = path_key(path);
            if known.contains(&key) || !seen.insert(key.clone()) {
                info!("⏭️ 文件已索引，跳过: {}", key);
                report.skipped.push(key);
                continue;
            }

            match self.prepare_file(path).await {
                Ok(prepared) => {
                    debug!("📄 {} 切分为 {} 个文本块", key, prepared.1.len());
                    pending.push(prepared);
                }
                Err(e) => {
                    warn!("❌ 文件索引失败 {}: {}", key, e);
                    report.failed.push(FailedFile {
                        file_path: key,
                        error: e.to_string(),
                    });
                }
            }
        }

        if pending.is_empty() {
            return Ok(report);
        }

        let mut chunks: Vec<DocumentChunk> = pending
            .iter()
            .flat_map(|(_, chunks)| chunks.iter().cloned())
            .collect();
        if let Err(e) = self.attach_embeddings(&mut chunks).await {
            warn!("⚠️ 向量化失败，文本块将仅用于关键词检索: {}", e);
            report.index_error = Some(e.to_string());
        }

        {
            let mut state = self.state.write().await;
            let mut chunks = chunks.into_iter();
            for (record, original) in pending {
                let file_chunks: Vec<DocumentChunk> = chunks.by_ref().take(original.len()).collect();
                // 并发的另一次调用可能已经写入了同一文件
                if state.contains(&record.file_path) {
                    report.skipped.push(record.file_path);
                    continue;
                }
                report.total_chunks += file_chunks.len();
                report.success.push(record.file_path.clone());
                state.files.push(record);
                state.store.extend(file_chunks);
            }
        }

        if let Err(e) = self.persist().await {
            warn!("⚠️ 索引持久化失败: {}", e);
            report.index_error.get_or_insert_with(|| e.to_string());
        }

        info!(
            "✅ 索引完成：成功 {}，失败 {}，跳过 {}，新增 {} 个文本块",
            report.success.len(),
            report.failed.len(),
            report.skipped.len(),
            report.total_chunks
        );
        Ok(report)
    }

    async fn prepare_file(&self, path: &Path) -> Result<(IndexedFileRecord, Vec<DocumentChunk>)> {
        let parsed = self.parser.parse(path).await?;
        if parsed.metadata.placeholder {
            bail!("{}", parsed.text);
        }
        if parsed.text.trim().chars().count() < 10 {
            bail!("No content extracted");
        }

        let pieces = self.splitter.split_text(&parsed.text);
        if pieces.is_empty() {
            bail!("No content extracted");
        }

        let file_path = path_key(path);
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file_path.clone());
        let file_size = tokio::fs::metadata(path)
            .await
            .map(|m| m.len())
            .unwrap_or_default();

        let total_chunks = pieces.len();
        let chunks = pieces
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| DocumentChunk {
                text,
                source_file: file_path.clone(),
                filename: filename.clone(),
                chunk_index,
                total_chunks,
                embedding: None,
            })
            .collect();

        let record = IndexedFileRecord {
            file_path,
            filename,
            chunk_count: total_chunks,
            file_size,
            parser: parsed.metadata.parser_name,
            tables_count: parsed.metadata.tables,
            images_count: parsed.metadata.images,
            indexed_at: chrono::Utc::now(),
        };
        Ok((record, chunks))
    }

    /// 给没有向量的块补上向量
    async fn attach_embeddings(&self, chunks: &mut [DocumentChunk]) -> Result<()> {
        if !self.embedding_available {
            return Ok(());
        }
        let missing: Vec<usize> = chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.embedding.is_none())
            .map(|(i, _)| i)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = missing.iter().map(|&i| chunks[i].text.clone()).collect();
        let vectors = self.llm.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            bail!(
                "向量数量({})与文本块数量({})不一致",
                vectors.len(),
                texts.len()
            );
        }
        for (i, vector) in missing.into_iter().zip(vectors) {
            chunks[i].embedding = Some(vector);
        }
        Ok(())
    }

    /// 向量相似度检索；索引为空或向量化不可用时返回空列表
    pub async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<DocumentChunk>> {
        if k == 0 || !self.embedding_available || self.is_empty().await {
            return Ok(Vec::new());
        }

        let query_vector = self.llm.embed(query).await?;
        let state = self.state.read().await;
        Ok(state
            .store
            .search(&query_vector, k)
            .into_iter()
            .map(|(_, chunk)| chunk)
            .collect())
    }

    /// 关键词检索
    ///
    /// 查询中的需求编号每命中一次计10分，长度大于2的词每命中一次计1分。
    pub async fn keyword_search(&self, query: &str, k: usize) -> Vec<DocumentChunk> {
        let ids = extract_requirement_ids(query);
        // 编号只按整词匹配，避免REQ-1命中REQ-12
        let words: Vec<String> = significant_words(query)
            .into_iter()
            .filter(|w| !ids.contains(&w.to_uppercase()))
            .collect();
        if ids.is_empty() && words.is_empty() {
            return Vec::new();
        }

        let state = self.state.read().await;
        let mut scored: Vec<(usize, &DocumentChunk)> = state
            .store
            .chunks()
            .iter()
            .filter_map(|chunk| {
                let chunk_ids: HashSet<String> =
                    extract_requirement_ids(&chunk.text).into_iter().collect();
                let lower = chunk.text.to_lowercase();
                let score = ids.iter().filter(|id| chunk_ids.contains(*id)).count() * 10
                    + words.iter().filter(|w| lower.contains(w.as_str())).count();
                (score > 0).then_some((score, chunk))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(k)
            .map(|(_, chunk)| chunk.clone())
            .collect()
    }

    /// 构建（增量更新）实体关系图谱
    ///
    /// 只处理上次构建之后新增的块，最多抽样`graph_sample_size`个。
    /// 单个块抽取失败会被跳过；只要有一个块成功合并就返回`true`。
    /// 图谱已是最新时同样返回`true`，没有任何文档时返回`false`。
    pub async fn build_graph_index(&self, force_rebuild: bool) -> Result<bool> {
        let (sample, total) = {
            let mut state = self.state.write().await;
            if state.store.is_empty() {
                warn!("⚠️ 没有已索引的文档，无法构建图谱");
                return Ok(false);
            }
            if force_rebuild {
                self.graph.clear().await?;
                state.graph_doc_count = 0;
            }
            if state.graph_doc_count >= state.store.len() {
                info!("✅ 图谱已是最新");
                return Ok(true);
            }
            let sample: Vec<DocumentChunk> = state.store.chunks()[state.graph_doc_count..]
                .iter()
                .take(self.config.graph_sample_size)
                .cloned()
                .collect();
            (sample, state.store.len())
        };

        info!("🕸️ 开始从 {} 个文本块中抽取实体关系...", sample.len());
        let futures = sample
            .iter()
            .map(|chunk| self.extract_graph(chunk))
            .collect::<Vec<_>>();
        let results = do_parallel_with_limit(futures, GRAPH_EXTRACTION_PARALLELS).await;

        let mut updated = false;
        for (chunk, result) in sample.iter().zip(results) {
            let extraction = match result {
                Ok(extraction) => extraction,
                Err(e) => {
                    warn!(
                        "⚠️ 图谱抽取失败 {}#{}: {}",
                        chunk.filename, chunk.chunk_index, e
                    );
                    continue;
                }
            };
            let merged = async {
                self.graph
                    .add_entities(&extraction.entities, &chunk.filename)
                    .await?;
                self.graph
                    .add_relationships(&extraction.relationships, &chunk.filename)
                    .await
            }
            .await;
            match merged {
                Ok(_) => updated = true,
                Err(e) => warn!("⚠️ 图谱合并失败 {}: {}", chunk.filename, e),
            }
        }

        if updated {
            {
                let mut state = self.state.write().await;
                state.graph_doc_count = state.graph_doc_count.max(total);
            }
            if let Err(e) = self.persist().await {
                warn!("⚠️ 图谱持久化失败: {}", e);
            }
            let (entities, relationships) = self.graph.counts().await?;
            info!(
                "✅ 图谱更新完成：{} 个实体，{} 条关系",
                entities, relationships
            );
        }
        Ok(updated)
    }

    async fn extract_graph(&self, chunk: &DocumentChunk) -> Result<GraphExtraction> {
        let user_prompt = format!(
            "Document: {}\n\nText:\n{}",
            chunk.filename,
            truncate_chars(&chunk.text, self.config.graph_sample_chars)
        );
        let output = self
            .llm
            .complete(GRAPH_EXTRACTION_PROMPT, &user_prompt, Some(0.0))
            .await?;
        Ok(GraphExtraction::from_model_output(&output)?)
    }

    /// 是否有尚未参与图谱抽取的块
    pub async fn needs_graph_update(&self) -> bool {
        let state = self.state.read().await;
        state.graph_doc_count < state.store.len()
    }

    /// 图谱检索：匹配实体，再取与之相连的关系，拼成可注入prompt的上下文
    pub async fn graph_search(&self, query: &str) -> Result<GraphSearchResult> {
        let entities = self
            .graph
            .search_entities(query, self.config.graph_max_entities)
            .await?;
        if entities.is_empty() {
            return Ok(GraphSearchResult::default());
        }

        let max_relationships = self.config.graph_max_relationships;
        let mut relationships: Vec<GraphRelationship> = Vec::new();
        for entity in &entities {
            if relationships.len() >= max_relationships {
                break;
            }
            for rel in self.graph.neighbors(&entity.name, max_relationships).await? {
                if !relationships.contains(&rel) {
                    relationships.push(rel);
                }
            }
        }
        relationships.truncate(max_relationships);

        let names: Vec<String> = entities.into_iter().map(|e| e.name).collect();
        let mut context_text = format!("Related entities: {}", names.join(", "));
        if !relationships.is_empty() {
            let rendered: Vec<String> = relationships
                .iter()
                .map(|r| format!("{} {} {}", r.source, r.relation, r.target))
                .collect();
            context_text.push_str(&format!("\nRelationships: {}", rendered.join("; ")));
        }

        Ok(GraphSearchResult {
            entities: names,
            relationships,
            context_text,
            found: true,
        })
    }

    /// 清空全部索引内容（向量、块、文件记录、图谱与持久化文件）
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().await;
        self.graph.clear().await?;
        *state = IndexState::default();

        if let Some(dir) = &self.storage_dir {
            for name in ["index.json", "graph.json"] {
                let path = dir.join(name);
                if path.exists() {
                    tokio::fs::remove_file(&path)
                        .await
                        .with_context(|| format!("无法删除 {}", path.display()))?;
                }
            }
        }
        info!("🗑️ 索引已清空");
        Ok(())
    }

    /// 导出为JSON文档（包含向量，导入时无需重新向量化）
    pub async fn export(&self) -> Result<String> {
        let state = self.state.read().await;
        let export = IndexExport {
            version: EXPORT_VERSION.to_string(),
            indexed_files: state.files.clone(),
            documents: state
                .store
                .chunks()
                .iter()
                .map(|chunk| ExportDocument {
                    page_content: chunk.text.clone(),
                    metadata: ExportMetadata {
                        source: chunk.source_file.clone(),
                        filename: chunk.filename.clone(),
                        chunk_index: chunk.chunk_index,
                        total_chunks: chunk.total_chunks,
                        embedding: chunk.embedding.clone(),
                    },
                })
                .collect(),
            graph_index: self.graph.export().await?,
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// 导入导出的JSON，只合并尚未索引的文件，图谱实体取并集
    pub async fn import(&self, json: &str) -> Result<ImportReport> {
        let export: IndexExport = serde_json::from_str(json)
            .map_err(|e| IndexError::InvalidImport(e.to_string()))?;

        let mut report = ImportReport::default();
        let mut accepted: HashSet<String> = HashSet::new();
        let mut records = Vec::new();
        {
            let state = self.state.read().await;
            for record in export.indexed_files {
                if state.contains(&record.file_path) || accepted.contains(&record.file_path) {
                    report.skipped_files.push(record.file_path);
                } else {
                    accepted.insert(record.file_path.clone());
                    report.imported_files.push(record.file_path.clone());
                    records.push(record);
                }
            }
        }

        let mut chunks: Vec<DocumentChunk> = export
            .documents
            .into_iter()
            .filter(|doc| accepted.contains(&doc.metadata.source))
            .map(|doc| DocumentChunk {
                text: doc.page_content,
                source_file: doc.metadata.source,
                filename: doc.metadata.filename,
                chunk_index: doc.metadata.chunk_index,
                total_chunks: doc.metadata.total_chunks,
                embedding: doc.metadata.embedding,
            })
            .collect();
        if let Err(e) = self.attach_embeddings(&mut chunks).await {
            warn!("⚠️ 导入数据向量化失败: {}", e);
        }
        report.imported_chunks = chunks.len();

        {
            let mut state = self.state.write().await;
            state.files.extend(records);
            state.store.extend(chunks);
            report.imported_entities = self.graph.import(export.graph_index).await?;
        }

        if let Err(e) = self.persist().await {
            warn!("⚠️ 索引持久化失败: {}", e);
        }
        info!(
            "📥 导入完成：{} 个文件，{} 个文本块，{} 个新实体",
            report.imported_files.len(),
            report.imported_chunks,
            report.imported_entities
        );
        Ok(report)
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let state = self.state.read().await;
        let (graph_entities, graph_relationships) = self.graph.counts().await?;
        Ok(IndexStats {
            total_files: state.files.len(),
            total_chunks: state.store.len(),
            files: state.files.clone(),
            graph_entities,
            graph_relationships,
            graph_backend: self.graph.backend_name().to_string(),
            embedding_available: self.embedding_available,
            needs_graph_update: state.graph_doc_count < state.store.len(),
        })
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.store.is_empty()
    }

    pub async fn chunk_count(&self) -> usize {
        self.state.read().await.store.len()
    }

    pub async fn indexed_files(&self) -> Vec<IndexedFileRecord> {
        self.state.read().await.files.clone()
    }

    async fn persist(&self) -> Result<()> {
        let Some(dir) = &self.storage_dir else {
            return Ok(());
        };
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("无法创建索引目录 {}", dir.display()))?;

        let index_json = {
            let state = self.state.read().await;
            serde_json::to_string(&*state)?
        };
        let graph_json = serde_json::to_string(&self.graph.export().await?)?;

        tokio::fs::write(dir.join("index.json"), index_json).await?;
        tokio::fs::write(dir.join("graph.json"), graph_json).await?;
        debug!("💾 索引已保存到 {}", dir.display());
        Ok(())
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
