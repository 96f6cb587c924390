use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::llm::LlmGateway;
use crate::research::types::{QueryAnalysis, ResearchState, ResearchStatus};
use crate::utils::json_extract::extract_json;

use super::ResearchStage;

const ANALYZER_PROMPT: &str = r#"You analyze research queries before they are planned and searched.
Detect the query language, its intent and key concepts, then expand it into a richer English search query.
Return ONLY a JSON object:
{"detected_language": "...", "intent": "...", "key_concepts": ["..."], "expanded_query": "...", "search_dimensions": ["..."], "suggested_focus_areas": ["..."]}"#;

/// 查询分析与扩写，失败时沿用原查询
pub struct QueryAnalyzer {
    llm: Arc<dyn LlmGateway>,
}

impl QueryAnalyzer {
    pub fn new(llm: Arc<dyn LlmGateway>) -> Self {
        Self { llm }
    }

    pub async fn analyze(&self, query: &str) -> Result<QueryAnalysis> {
        let reply = self.llm.complete(ANALYZER_PROMPT, query, Some(0.3)).await?;
        let mut analysis: QueryAnalysis = extract_json(&reply)?;
        if analysis.expanded_query.trim().is_empty() {
            analysis.expanded_query = query.to_string();
        }
        Ok(analysis)
    }
}

#[async_trait]
impl ResearchStage for QueryAnalyzer {
    fn name(&self) -> &'static str {
        "QueryAnalyzer"
    }

    async fn execute(&self, state: &mut ResearchState) -> Result<()> {
        match self.analyze(&state.query).await {
            Ok(analysis) => {
                info!(
                    "🔍 查询扩写完成 | 语言: {} | 关键概念: {}",
                    analysis.detected_language,
                    analysis.key_concepts.len()
                );
                state.expanded_query = analysis.expanded_query.clone();
                state.query_analysis = Some(analysis);
            }
            Err(e) => {
                warn!("⚠️ 查询分析失败，使用原始查询: {}", e);
                state.expanded_query = state.query.clone();
                state.query_analysis = None;
            }
        }
        state.advance(ResearchStatus::QueryAnalyzed);
        Ok(())
    }
}
