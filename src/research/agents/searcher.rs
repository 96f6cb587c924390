use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::ResearchConfig;
use crate::llm::LlmGateway;
use crate::rag::web_search::{ImageRef, WebSearch, WebSearchResult};
use crate::research::types::{ResearchState, ResearchStatus, ResearchTask, TaskImage};
use crate::utils::threads::do_parallel_with_limit;
use crate::utils::truncate_chars;

use super::ResearchStage;

const SYNTHESIS_PROMPT: &str = "You are a research synthesizer. Combine the search results into a thorough, factual analysis of the research task. \
Cite sources by their [n] markers. Write in the same language as the original user query.";

const KNOWLEDGE_PROMPT: &str = "You are a knowledgeable research assistant. Web search is unavailable, so provide a comprehensive analysis \
based on your training knowledge. Write in the same language as the original user query.";

const KNOWLEDGE_NOTE: &str = "*Note: based on general model knowledge, not live search results.*";

/// 单个任务的执行结果
#[derive(Debug, Default)]
struct TaskOutcome {
    completed: bool,
    result: String,
    images: Vec<ImageRef>,
    error: Option<String>,
}

/// 按来源站点给搜索结果打标签
pub fn source_label(url: &str) -> &'static str {
    const ACADEMIC: [&str; 6] = [
        "arxiv.org",
        "scholar.google",
        "researchgate",
        "ieee.org",
        "acm.org",
        "springer",
    ];
    const DOCS: [&str; 4] = ["docs.", "developer.", "documentation", "github.com"];

    if ACADEMIC.iter().any(|s| url.contains(s)) {
        "Academic/Paper"
    } else if DOCS.iter().any(|s| url.contains(s)) {
        "Official Docs"
    } else {
        "General"
    }
}

pub fn format_hits(hits: &[WebSearchResult]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "[{}] [{}] {}\n    {}\n    Source: {}",
                i + 1,
                source_label(&hit.url),
                hit.title,
                hit.snippet,
                hit.url
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// 去掉标点并截断到60个字符，供检索重试使用
pub fn simplify_query(task: &str) -> String {
    let cleaned: String = task
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { ' ' })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, 60).trim_end().to_string()
}

/// `case_studies` -> `Case Studies`
pub fn category_title(category: &str) -> String {
    category
        .split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// 汇总到`all_results`中的一条发现，失败任务同样保留并标注
pub fn format_finding(index: usize, task: &ResearchTask) -> String {
    let status = if task.completed { "" } else { " (failed)" };
    format!(
        "## Research Finding {}: {}{}\n**Research Focus:** {}\n\n{}\n\n---\n",
        index + 1,
        category_title(&task.category),
        status,
        task.task,
        task.result
    )
}

/// 并行执行全部调研任务
pub struct Searcher {
    llm: Arc<dyn LlmGateway>,
    web: Arc<dyn WebSearch>,
    config: ResearchConfig,
}

impl Searcher {
    pub fn new(llm: Arc<dyn LlmGateway>, web: Arc<dyn WebSearch>, config: ResearchConfig) -> Self {
        Self { llm, web, config }
    }

    async fn run_task(&self, index: usize, task: &str, original_query: &str) -> TaskOutcome {
        match self.search_and_synthesize(task, original_query).await {
            Ok(outcome) => {
                debug!("✓ 调研任务 {} 完成", index + 1);
                outcome
            }
            Err(e) => {
                warn!("⚠️ 调研任务 {} 失败: {}", index + 1, e);
                TaskOutcome {
                    completed: false,
                    result: format!("Search error for task: {}. Error: {}", task, e),
                    images: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn search_once(&self, query: &str, timeout: Duration) -> Result<Vec<WebSearchResult>> {
        tokio::time::timeout(
            timeout,
            self.web.search(query, self.config.search_results_per_task),
        )
        .await
        .map_err(|_| anyhow!("search timed out after {}s", timeout.as_secs()))?
    }

    /// 没有可用的搜索结果时，依靠模型自身知识完成任务
    async fn knowledge_outcome(&self, task: &str, original_query: &str) -> Result<TaskOutcome> {
        let user_prompt = format!(
            "Original user query: {}\n\nResearch task: {}\n\nNo web search results are available. Provide a detailed analysis of this topic.",
            original_query, task
        );
        let synthesis = self.llm.complete(KNOWLEDGE_PROMPT, &user_prompt, Some(0.3)).await?;
        Ok(TaskOutcome {
            completed: true,
            result: format!("{}\n\n{}", KNOWLEDGE_NOTE, synthesis),
            ..TaskOutcome::default()
        })
    }

    async fn search_and_synthesize(&self, task: &str, original_query: &str) -> Result<TaskOutcome> {
        if !self.web.is_available() {
            return self.knowledge_outcome(task, original_query).await;
        }

        let timeout = Duration::from_secs(self.config.search_timeout_seconds.max(1));
        let hits = match self.search_once(task, timeout).await {
            Ok(hits) if !hits.is_empty() => hits,
            first => {
                // 原任务描述检索失败或无结果时，用简化后的查询再试一次
                let simplified = simplify_query(task);
                let retried = if simplified.is_empty() || simplified == task {
                    first
                } else {
                    debug!("🔁 使用简化查询重试: {}", simplified);
                    self.search_once(&simplified, timeout).await
                };
                retried?
            }
        };

        if hits.is_empty() {
            debug!("搜索无结果，改用模型知识: {}", task);
            return self.knowledge_outcome(task, original_query).await;
        }

        let user_prompt = format!(
            "Original user query: {}\n\nResearch task: {}\n\nSearch results:\n{}",
            original_query,
            task,
            format_hits(&hits)
        );
        let synthesis = self.llm.complete(SYNTHESIS_PROMPT, &user_prompt, Some(0.3)).await?;

        // 图片检索失败不影响任务结果
        let images = if self.config.images_per_task > 0 {
            let image_query = truncate_chars(task, 100);
            match tokio::time::timeout(
                timeout,
                self.web.search_images(image_query, self.config.images_per_task),
            )
            .await
            {
                Ok(Ok(images)) => images,
                Ok(Err(e)) => {
                    debug!("图片检索失败: {}", e);
                    Vec::new()
                }
                Err(_) => Vec::new(),
            }
        } else {
            Vec::new()
        };

        Ok(TaskOutcome {
            completed: true,
            result: synthesis,
            images,
            error: None,
        })
    }
}

#[async_trait]
impl ResearchStage for Searcher {
    fn name(&self) -> &'static str {
        "Searcher"
    }

    async fn execute(&self, state: &mut ResearchState) -> Result<()> {
        let original_query = state.query.clone();
        let descriptions: Vec<String> = state.tasks.iter().map(|t| t.task.clone()).collect();

        info!(
            "🔎 并行执行 {} 个调研任务（并发度 {}）",
            descriptions.len(),
            self.config.parallel_searchers
        );

        let futures = descriptions
            .iter()
            .enumerate()
            .map(|(i, task)| self.run_task(i, task, &original_query))
            .collect::<Vec<_>>();
        let outcomes = do_parallel_with_limit(futures, self.config.parallel_searchers).await;

        state.all_results.clear();
        state.all_images.clear();
        for (index, (task, outcome)) in state.tasks.iter_mut().zip(outcomes).enumerate() {
            task.completed = outcome.completed;
            task.result = outcome.result;
            task.error = outcome.error;
            task.images = outcome.images;

            state.all_results.push(format_finding(index, task));
            state
                .all_images
                .extend(task.images.iter().cloned().map(|image| TaskImage {
                    image,
                    category: task.category.clone(),
                    task_index: index,
                }));
        }

        info!(
            "✓ 调研任务完成 {}/{}",
            state.completed_tasks(),
            state.tasks.len()
        );
        state.advance(ResearchStatus::SearchingComplete);
        Ok(())
    }
}
