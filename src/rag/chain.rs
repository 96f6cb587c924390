//! 混合检索问答链
//!
//! 执行顺序：查询改写 → 多策略并行检索 → 前缀哈希去重 → LLM重排 → 截断 →
//! （本地无结果时）联网搜索 → 答案合成。
//! 除答案合成外，每一步都是可选增强：失败时记录告警并退化，不会中断整个查询。

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::RagConfig;
use crate::llm::LlmGateway;
use crate::utils::json_extract::extract_json_value;
use crate::utils::preview;

use super::index::DocumentIndex;
use super::types::{DocumentChunk, GraphSearchResult};
use super::web_search::{WebSearch, WebSearchResult};

pub const NO_DOCUMENTS: &str = "No relevant documents found.";
pub const NO_GRAPH_CONTEXT: &str = "No graph context available.";
pub const NO_WEB_SEARCH: &str = "No web search performed.";
pub const NO_HISTORY: &str = "No previous conversation.";

const NO_INDEX_ANSWER: &str =
    "⚠️ No documents have been indexed yet. Please upload documents first.";
const WEB_SEARCH_MARKER: &str = "NEEDS_WEBSEARCH:";
const SOURCE_PREVIEW_CHARS: usize = 200;
const RANK_PREVIEW_CHARS: usize = 300;

static RANK_INDEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+").expect("valid rank index pattern"));

const REWRITE_PROMPT: &str = r#"You rewrite search queries for a requirements document retrieval system.
Expand abbreviations, keep every requirement ID (such as REQ-001) verbatim and add close synonyms.
Reply with the rewritten query only, on a single line."#;

const RANK_PROMPT: &str = r#"You rank document excerpts by relevance to a question.
Reply with the excerpt indices ordered from most to least relevant, comma-separated (for example: 2,0,1)."#;

const WEB_EVALUATION_PROMPT: &str = r#"The local document index returned nothing for the user's question.
Decide whether searching the web would help answer it.
If it would, reply exactly `NEEDS_WEBSEARCH: <search query>`.
Otherwise reply `NO_WEBSEARCH`."#;

const SYNTHESIS_PROMPT: &str = r#"You are a requirements analysis assistant answering questions about the user's documents.
Ground the answer in the provided document, knowledge graph and web context.
Cite source filenames where relevant and say clearly when the context does not contain the answer."#;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RagStatus {
    NoIndex,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub filename: String,
    pub chunk_index: usize,
    pub preview: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebSourceRef {
    pub title: String,
    pub url: String,
}

/// 检索问答结果，`status`反映降级状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    /// 实际注入答案合成的文档上下文
    pub context: String,
    pub graph_entities: Vec<String>,
    pub graph_context: String,
    pub web_sources: Vec<WebSourceRef>,
    pub query_rewritten: bool,
    pub rewritten_query: String,
    pub web_search_triggered: bool,
    pub search_methods: Vec<String>,
    pub status: RagStatus,
    pub error: Option<String>,
}

impl RagResponse {
    fn empty(question: &str, status: RagStatus, answer: String) -> Self {
        Self {
            answer,
            sources: Vec::new(),
            context: String::new(),
            graph_entities: Vec::new(),
            graph_context: String::new(),
            web_sources: Vec::new(),
            query_rewritten: false,
            rewritten_query: question.to_string(),
            web_search_triggered: false,
            search_methods: Vec::new(),
            status,
            error: None,
        }
    }

    pub fn no_index(question: &str) -> Self {
        Self::empty(question, RagStatus::NoIndex, NO_INDEX_ANSWER.to_string())
    }

    pub fn error(question: &str, err: &anyhow::Error) -> Self {
        let mut response = Self::empty(
            question,
            RagStatus::Error,
            format!("❌ Error processing query: {}", err),
        );
        response.error = Some(err.to_string());
        response
    }
}

/// 多策略检索的合并结果
struct HybridHits {
    documents: Vec<DocumentChunk>,
    graph: GraphSearchResult,
    methods: Vec<String>,
}

pub struct HybridRetrievalChain {
    llm: Arc<dyn LlmGateway>,
    index: Arc<DocumentIndex>,
    web: Arc<dyn WebSearch>,
    config: RagConfig,
    web_max_results: usize,
    web_available: bool,
}

impl HybridRetrievalChain {
    pub fn new(
        llm: Arc<dyn LlmGateway>,
        index: Arc<DocumentIndex>,
        web: Arc<dyn WebSearch>,
        config: RagConfig,
        web_max_results: usize,
    ) -> Self {
        let web_available = web.is_available();
        Self {
            llm,
            index,
            web,
            config,
            web_max_results,
            web_available,
        }
    }

    pub fn index(&self) -> &Arc<DocumentIndex> {
        &self.index
    }

    /// 回答问题，总是返回结果对象
    pub async fn query(&self, question: &str, history: &str) -> RagResponse {
        self.query_with(question, history, true).await
    }

    /// 只使用本地文档回答，不触发联网搜索
    pub async fn query_documents_only(&self, question: &str, history: &str) -> RagResponse {
        self.query_with(question, history, false).await
    }

    async fn query_with(&self, question: &str, history: &str, allow_web: bool) -> RagResponse {
        if self.index.is_empty().await {
            info!("📭 索引为空，无法进行文档问答");
            return RagResponse::no_index(question);
        }

        match self.answer(question, history, allow_web).await {
            Ok(response) => response,
            Err(e) => {
                error!("❌ 文档问答失败: {}", e);
                RagResponse::error(question, &e)
            }
        }
    }

    async fn answer(&self, question: &str, history: &str, allow_web: bool) -> Result<RagResponse> {
        let rewritten = self.rewrite_query(question).await;
        let search_query = rewritten.as_deref().unwrap_or(question);

        let hits = self
            .hybrid_search(search_query, rewritten.as_ref().map(|_| question))
            .await;
        let mut documents = hits.documents;
        if documents.len() > self.config.rank_threshold && self.config.enable_ranking {
            documents = self.rank_documents(question, documents).await;
        }
        documents.truncate(self.config.max_context_docs);

        let mut web_results: Vec<WebSearchResult> = Vec::new();
        let mut web_search_triggered = false;
        if allow_web
            && documents.is_empty()
            && self.config.enable_web_escalation
            && self.web_available
        {
            if let Some(web_query) = self.evaluate_web_need(question).await {
                web_search_triggered = true;
                info!("🌐 本地文档无结果，联网搜索: {}", web_query);
                match self.web.search(&web_query, self.web_max_results).await {
                    Ok(results) => web_results = results,
                    Err(e) => warn!("⚠️ 联网搜索失败: {}", e),
                }
            }
        }

        let document_context = if documents.is_empty() {
            NO_DOCUMENTS.to_string()
        } else {
            format_document_context(&documents)
        };
        let graph_context = if hits.graph.found {
            hits.graph.context_text.clone()
        } else {
            NO_GRAPH_CONTEXT.to_string()
        };
        let web_context = if web_results.is_empty() {
            NO_WEB_SEARCH.to_string()
        } else {
            format_web_context(&web_results)
        };
        let history = if history.trim().is_empty() {
            NO_HISTORY
        } else {
            history
        };

        let user_prompt = format!(
            "Conversation history:\n{history}\n\nDocument context:\n{document_context}\n\nKnowledge graph context:\n{graph_context}\n\nWeb search results:\n{web_context}\n\nQuestion: {question}"
        );
        let answer = self.llm.complete(SYNTHESIS_PROMPT, &user_prompt, None).await?;

        let sources = documents
            .iter()
            .take(self.config.max_sources)
            .map(|chunk| SourceRef {
                filename: chunk.filename.clone(),
                chunk_index: chunk.chunk_index,
                preview: preview(&chunk.text, SOURCE_PREVIEW_CHARS),
            })
            .collect();
        let web_sources = web_results
            .iter()
            .map(|r| WebSourceRef {
                title: r.title.clone(),
                url: r.url.clone(),
            })
            .collect();

        Ok(RagResponse {
            answer,
            sources,
            context: if documents.is_empty() {
                String::new()
            } else {
                document_context
            },
            graph_entities: hits.graph.entities,
            graph_context: if hits.graph.found {
                hits.graph.context_text
            } else {
                String::new()
            },
            web_sources,
            query_rewritten: rewritten.is_some(),
            rewritten_query: search_query.to_string(),
            web_search_triggered,
            search_methods: hits.methods,
            status: RagStatus::Success,
            error: None,
        })
    }

    /// 查询改写；失败或结果过短时返回`None`，继续使用原查询
    async fn rewrite_query(&self, question: &str) -> Option<String> {
        if !self.config.enable_query_rewrite {
            return None;
        }
        match self.llm.complete(REWRITE_PROMPT, question, Some(0.0)).await {
            Ok(reply) => {
                let rewritten = reply.trim().trim_matches('"').trim();
                if rewritten.chars().count() > 3 && rewritten != question.trim() {
                    debug!("✏️ 查询改写: {} → {}", question, rewritten);
                    Some(rewritten.to_string())
                } else {
                    None
                }
            }
            Err(e) => {
                warn!("⚠️ 查询改写失败，使用原查询: {}", e);
                None
            }
        }
    }

    /// 并行执行图谱、向量、关键词检索；改写过的查询额外用原查询再检索一次
    async fn hybrid_search(&self, query: &str, original: Option<&str>) -> HybridHits {
        let rag = &self.config;

        let graph = async {
            if !rag.enable_graph {
                return GraphSearchResult::default();
            }
            self.index.graph_search(query).await.unwrap_or_else(|e| {
                warn!("⚠️ 图谱检索失败: {}", e);
                GraphSearchResult::default()
            })
        };
        let vector = self.vector_search(query, rag.vector_top_k);
        let keyword = self.index.keyword_search(query, rag.keyword_top_k);
        let vector_original = async {
            match original {
                Some(q) => self.vector_search(q, rag.original_query_top_k).await,
                None => Vec::new(),
            }
        };
        let keyword_original = async {
            match original {
                Some(q) => self.index.keyword_search(q, rag.original_query_top_k).await,
                None => Vec::new(),
            }
        };

        let (graph, vector, keyword, vector_original, keyword_original) =
            tokio::join!(graph, vector, keyword, vector_original, keyword_original);

        let mut methods = Vec::new();
        if self.index.embedding_available() {
            methods.push("vector".to_string());
        }
        methods.push("keyword".to_string());
        if graph.found {
            methods.push("graph".to_string());
        }
        if original.is_some() {
            methods.push("original_query".to_string());
        }

        let merged = vector
            .into_iter()
            .chain(keyword)
            .chain(vector_original)
            .chain(keyword_original)
            .collect();
        let documents = dedup_chunks(merged, rag.dedup_prefix_chars);
        debug!("🔎 混合检索得到 {} 个候选文本块", documents.len());

        HybridHits {
            documents,
            graph,
            methods,
        }
    }

    async fn vector_search(&self, query: &str, k: usize) -> Vec<DocumentChunk> {
        self.index
            .similarity_search(query, k)
            .await
            .unwrap_or_else(|e| {
                warn!("⚠️ 向量检索失败: {}", e);
                Vec::new()
            })
    }

    /// LLM重排：只把前`rank_preview_docs`个候选交给模型，其余保持原顺序排在后面
    async fn rank_documents(
        &self,
        question: &str,
        documents: Vec<DocumentChunk>,
    ) -> Vec<DocumentChunk> {
        let window = documents.len().min(self.config.rank_preview_docs);
        let previews: Vec<String> = documents[..window]
            .iter()
            .enumerate()
            .map(|(i, chunk)| format!("[{}] {}", i, preview(&chunk.text, RANK_PREVIEW_CHARS)))
            .collect();
        let user_prompt = format!(
            "Question: {}\n\nExcerpts:\n{}",
            question,
            previews.join("\n\n")
        );

        let order = match self.llm.complete(RANK_PROMPT, &user_prompt, Some(0.0)).await {
            Ok(reply) => complete_permutation(&reply, window),
            Err(e) => {
                warn!("⚠️ 相关性排序失败，保持原顺序: {}", e);
                return documents;
            }
        };

        let mut slots: Vec<Option<DocumentChunk>> = documents.into_iter().map(Some).collect();
        let mut ranked: Vec<DocumentChunk> = order
            .into_iter()
            .filter_map(|i| slots[i].take())
            .collect();
        ranked.extend(slots.into_iter().flatten());
        ranked
    }

    /// 判断是否值得联网搜索，返回建议的搜索词；否定或调用失败时不搜索
    async fn evaluate_web_need(&self, question: &str) -> Option<String> {
        match self
            .llm
            .complete(WEB_EVALUATION_PROMPT, question, Some(0.0))
            .await
        {
            Ok(reply) => {
                let reply = reply.trim();
                let query = reply.strip_prefix(WEB_SEARCH_MARKER)?.trim();
                if query.is_empty() {
                    Some(question.to_string())
                } else {
                    Some(query.to_string())
                }
            }
            Err(e) => {
                warn!("⚠️ 联网搜索评估失败，跳过联网: {}", e);
                None
            }
        }
    }
}

/// 按正文前缀哈希去重，保留首次出现的顺序
pub fn dedup_chunks(chunks: Vec<DocumentChunk>, prefix_chars: usize) -> Vec<DocumentChunk> {
    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .filter(|chunk| seen.insert(chunk.dedup_key(prefix_chars)))
        .collect()
}

/// 把模型给出的（可能残缺的）排序补全为`0..n`的排列
///
/// 优先按JSON数组解析，否则提取文本中的所有整数；越界和重复的下标被忽略，
/// 缺失的下标按原顺序追加。
pub fn complete_permutation(raw: &str, n: usize) -> Vec<usize> {
    let candidates: Vec<usize> = match extract_json_value(raw) {
        Ok(Value::Array(items)) => items
            .iter()
            .filter_map(|v| {
                v.as_u64()
                    .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            })
            .map(|v| v as usize)
            .collect(),
        // 带符号解析，负数不会被当成正序号
        _ => RANK_INDEX
            .find_iter(raw)
            .filter_map(|m| m.as_str().parse::<i64>().ok())
            .filter_map(|v| usize::try_from(v).ok())
            .collect(),
    };

    let mut used = vec![false; n];
    let mut order = Vec::with_capacity(n);
    for i in candidates {
        if i < n && !used[i] {
            used[i] = true;
            order.push(i);
        }
    }
    order.extend((0..n).filter(|i| !used[*i]));
    order
}

fn format_document_context(documents: &[DocumentChunk]) -> String {
    documents
        .iter()
        .map(|chunk| format!("[Source: {}]\n{}", chunk.filename, chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_web_context(results: &[WebSearchResult]) -> String {
    results
        .iter()
        .map(|r| format!("[Web: {}]\n{}\nSource: {}", r.title, r.snippet, r.url))
        .collect::<Vec<_>>()
        .join("\n\n")
}
