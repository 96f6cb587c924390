use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::ResearchConfig;
use crate::llm::LlmGateway;
use crate::research::types::{ResearchState, ResearchStatus};
use crate::utils::truncate_chars;

use super::ResearchStage;

/// 分章节撰写时传给模型的发现上限
const SECTION_RESULTS_LIMIT: usize = 30_000;

const REPORT_PROMPT: &str = "You are a professional research report writer. Turn the research findings into a complete, \
well-structured Markdown report with an executive summary, analysis sections, conclusions and references. \
Write in narrative paragraphs, cite findings inline, and use the same language as the research query.";

const SECTION_PROMPT: &str = "You are a professional academic report writer. Write only the requested section of a research report \
in narrative paragraphs with inline citations. Use ## for the section header and ### for subsections. \
Write in the same language as the research topic, but keep references in their original language.";

/// (标题, 撰写要求)
const REPORT_SECTIONS: [(&str, &str); 11] = [
    (
        "Executive Summary",
        "Summarize objectives, methodology, key findings and recommendations in 500-800 words of prose.",
    ),
    (
        "1. Introduction",
        "Cover background, research questions, methodology and report structure.",
    ),
    (
        "2. Background and Literature Review",
        "Discuss historical context, theoretical framework and prior research with citations.",
    ),
    (
        "3. Current State Analysis",
        "Analyze current trends and key players. Include at most one table of key statistics.",
    ),
    (
        "4. Technical Analysis",
        "Explain the methodologies and technologies involved. A mermaid flowchart of the architecture is welcome.",
    ),
    (
        "5. Case Studies",
        "Present two or three detailed case studies in narrative form.",
    ),
    (
        "6. Comparative Analysis",
        "Compare the approaches in prose with one comparison table.",
    ),
    (
        "7. Challenges and Solutions",
        "Discuss the main challenges and how they are addressed.",
    ),
    (
        "8. Future Outlook",
        "Describe trends and predictions for the field.",
    ),
    (
        "9. Conclusions",
        "Summarize findings and recommendations in paragraphs without bullet points.",
    ),
    (
        "References",
        "List every cited source as a numbered entry in APA or IEEE style. Do not translate entries.",
    ),
];

pub fn combine_findings(results: &[String]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("**Finding {}:**\n{}", i + 1, r))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// 报告生成失败时，直接把原始发现整理成报告
pub fn fallback_report(query: &str, results: &[String], error: &str) -> String {
    let mut report = format!(
        "# {}\n\n*Note: the full report could not be generated ({}). The raw research findings are listed below.*\n\n",
        query, error
    );
    for (i, result) in results.iter().enumerate() {
        report.push_str(&format!("## Finding {}\n\n{}\n\n", i + 1, result));
    }
    report
}

/// 把调研发现撰写为完整报告
pub struct Writer {
    llm: Arc<dyn LlmGateway>,
    config: ResearchConfig,
}

impl Writer {
    pub fn new(llm: Arc<dyn LlmGateway>, config: ResearchConfig) -> Self {
        Self { llm, config }
    }

    /// 总是返回非空报告
    pub async fn write(&self, query: &str, results: &[String]) -> String {
        let combined = combine_findings(results);

        if combined.chars().count() > self.config.section_mode_threshold_chars {
            info!("📝 发现内容较多，按章节撰写报告");
            return self.write_by_sections(query, &combined).await;
        }

        let user_prompt = format!(
            "Research Query: {}\n\nResearch Results:\n{}",
            query, combined
        );
        match self.llm.complete(REPORT_PROMPT, &user_prompt, None).await {
            Ok(report) if report.chars().count() < self.config.min_report_chars => {
                warn!(
                    "⚠️ 报告过短（{} 字符），改为按章节撰写",
                    report.chars().count()
                );
                self.write_by_sections(query, &combined).await
            }
            Ok(report) => {
                info!("✓ 报告撰写完成（{} 字符）", report.chars().count());
                report
            }
            Err(e) => {
                warn!("⚠️ 报告撰写失败，使用原始发现: {}", e);
                fallback_report(query, results, &e.to_string())
            }
        }
    }

    /// 逐章节撰写，单个章节失败只影响该章节
    async fn write_by_sections(&self, query: &str, combined: &str) -> String {
        let results = truncate_chars(combined, SECTION_RESULTS_LIMIT);
        let mut parts = vec![format!("# {}\n", query)];

        for (title, instructions) in REPORT_SECTIONS {
            let user_prompt = format!(
                "Research Topic: {}\n\nSection to Write: {}\nInstructions: {}\n\nResearch Findings to Incorporate:\n{}",
                query, title, instructions, results
            );
            match self.llm.complete(SECTION_PROMPT, &user_prompt, None).await {
                Ok(content) => {
                    if content.trim_start().starts_with('#') {
                        parts.push(content);
                    } else {
                        parts.push(format!("# {}\n\n{}", title, content));
                    }
                    parts.push("\n\n".to_string());
                }
                Err(e) => {
                    warn!("⚠️ 章节 {} 撰写失败: {}", title, e);
                    parts.push(format!(
                        "# {}\n\n[Section generation failed: {}]\n\n",
                        title, e
                    ));
                }
            }
        }

        parts.concat()
    }
}

#[async_trait]
impl ResearchStage for Writer {
    fn name(&self) -> &'static str {
        "Writer"
    }

    async fn execute(&self, state: &mut ResearchState) -> Result<()> {
        state.report = self.write(&state.query, &state.all_results).await;
        state.advance(ResearchStatus::WritingComplete);
        Ok(())
    }
}
