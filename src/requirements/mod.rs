//! 需求生成
//!
//! 生成 → 评审 →（改进 → 评审）*，改进次数受`max_refinement_iterations`限制，
//! 评审总分达到`quality_threshold`即停止。

pub mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use schemars::{JsonSchema, schema_for};
use serde::de::DeserializeOwned;
use tracing::{error, info};

use crate::config::RequirementsConfig;
use crate::llm::LlmGateway;
use crate::utils::json_extract::extract_json;

pub use types::*;

const GENERATION_PROMPT: &str = r#"You are an expert software requirements engineer. Generate comprehensive software requirements from the role context, conversation history and focus area you are given.
Requirements must be SMART (Specific, Measurable, Achievable, Relevant, Time-bound) and follow ISO 29148 / IEEE-830 conventions.
Annotate ambiguous or inconsistent items with [AMBIGUOUS] or [NEEDS CLARIFICATION]."#;

const VALIDATION_PROMPT: &str = r#"You are a quality control expert for software requirements. Rate the requirements from 1 to 10 on:
ambiguity (10 = no ambiguity), completeness, consistency and clarity.
If any score is below 7, give specific improvement suggestions.
overall_score is the average of the four scores."#;

const REFINEMENT_PROMPT: &str = r#"You are an expert software requirements engineer. Refine the requirements using the quality assessment feedback.
Address every suggestion while keeping the original intent, and make each requirement more SMART compliant."#;

const VALIDATION_TEMPERATURE: f64 = 0.3;

pub struct RequirementsGenerator {
    llm: Arc<dyn LlmGateway>,
    config: RequirementsConfig,
}

impl RequirementsGenerator {
    pub fn new(llm: Arc<dyn LlmGateway>, config: RequirementsConfig) -> Self {
        Self { llm, config }
    }

    /// 生成需求，任何失败都折叠为`status = error`的结果
    pub async fn generate(&self, role_prompt: &str, history: &str, focus: &str) -> RequirementsResult {
        match self.generate_inner(role_prompt, history, focus).await {
            Ok(result) => result,
            Err(e) => {
                error!("❌ 需求生成失败: {}", e);
                RequirementsResult::failed(&e)
            }
        }
    }

    async fn generate_inner(
        &self,
        role_prompt: &str,
        history: &str,
        focus: &str,
    ) -> Result<RequirementsResult> {
        let user_prompt = format!(
            "Role Context:\n{}\n\nConversation History:\n{}\n\nFocus Area:\n{}\n\nGenerate the software requirements document.",
            role_prompt, history, focus
        );
        let mut requirements: RequirementsDocument = self
            .request(GENERATION_PROMPT, &user_prompt, None)
            .await?;
        let mut validation = self.validate(&requirements).await?;

        let mut iteration = 0;
        while validation.overall_score < self.config.quality_threshold
            && iteration < self.config.max_refinement_iterations
        {
            info!(
                "🔁 需求质量 {:.1} 低于阈值 {:.1}，第 {} 次改进",
                validation.overall_score,
                self.config.quality_threshold,
                iteration + 1
            );
            requirements = self.refine(&requirements, &validation).await?;
            validation = self.validate(&requirements).await?;
            iteration += 1;
        }

        info!(
            "✅ 需求生成完成，质量得分 {:.1}，改进 {} 次",
            validation.overall_score, iteration
        );
        Ok(RequirementsResult {
            requirements,
            validation,
            refinement_iterations: iteration,
            status: GenerationStatus::Success,
            error: None,
        })
    }

    async fn validate(&self, requirements: &RequirementsDocument) -> Result<ValidationReport> {
        let user_prompt = format!(
            "Requirements to evaluate:\n{}",
            serde_json::to_string_pretty(requirements)?
        );
        self.request(VALIDATION_PROMPT, &user_prompt, Some(VALIDATION_TEMPERATURE))
            .await
    }

    async fn refine(
        &self,
        requirements: &RequirementsDocument,
        validation: &ValidationReport,
    ) -> Result<RequirementsDocument> {
        let user_prompt = format!(
            "Original Requirements:\n{}\n\nQuality Assessment:\n- Scores: {}\n- Suggestions: {}",
            serde_json::to_string_pretty(requirements)?,
            serde_json::to_string(&validation.scores)?,
            serde_json::to_string(&validation.suggestions)?
        );
        self.request(REFINEMENT_PROMPT, &user_prompt, None).await
    }

    /// 在prompt末尾附上JSON Schema，并从回复中解析出对应结构
    async fn request<T>(&self, system_prompt: &str, user_prompt: &str, temperature: Option<f64>) -> Result<T>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let schema = serde_json::to_string_pretty(&schema_for!(T))?;
        let system_prompt = format!(
            "{}\n\nRespond with a single JSON object that conforms to this JSON Schema:\n{}",
            system_prompt, schema
        );
        let reply = self
            .llm
            .complete(&system_prompt, user_prompt, temperature)
            .await?;
        Ok(extract_json(&reply)?)
    }
}

/// 渲染为需求规格说明书（SRS）Markdown
pub fn to_markdown(result: &RequirementsResult) -> String {
    let mut lines: Vec<String> = vec![
        "# Software Requirements Specification (SRS)".to_string(),
        String::new(),
        "## Document Information".to_string(),
        format!("- **Generation Status**: {}", result.status),
        format!(
            "- **Refinement Iterations**: {}",
            result.refinement_iterations
        ),
        String::new(),
    ];

    if let Some(scores) = &result.validation.scores {
        lines.extend([
            "## Quality Assessment".to_string(),
            format!("- **Ambiguity Score**: {}/10", scores.ambiguity),
            format!("- **Completeness Score**: {}/10", scores.completeness),
            format!("- **Consistency Score**: {}/10", scores.consistency),
            format!("- **Clarity Score**: {}/10", scores.clarity),
            format!("- **Overall Score**: {}/10", result.validation.overall_score),
            String::new(),
        ]);
    }

    let requirements = &result.requirements;
    let sections = [
        ("## 1. Functional Requirements", "FR", &requirements.functional_requirements),
        (
            "## 2. Non-Functional Requirements",
            "NFR",
            &requirements.non_functional_requirements,
        ),
        ("## 3. Business Rules", "BR", &requirements.business_rules),
        ("## 4. Use Cases", "UC", &requirements.use_cases),
    ];
    for (heading, prefix, items) in sections {
        if items.is_empty() {
            continue;
        }
        lines.push(heading.to_string());
        lines.push(String::new());
        for (i, item) in items.iter().enumerate() {
            lines.push(format!("### {}", numbered_id(prefix, i)));
            lines.push(item.clone());
            lines.push(String::new());
        }
    }

    push_bullets(&mut lines, "## 5. Assumptions", &requirements.assumptions);
    push_bullets(
        &mut lines,
        "## Quality Improvement Suggestions",
        &result.validation.suggestions,
    );

    lines.push("---".to_string());
    lines.push("*Generated by reqpilot*".to_string());
    lines.join("\n")
}

fn push_bullets(lines: &mut Vec<String>, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    lines.push(heading.to_string());
    lines.push(String::new());
    lines.extend(items.iter().map(|item| format!("- {}", item)));
    lines.push(String::new());
}

fn numbered_id(prefix: &str, index: usize) -> String {
    format!("{}-{:03}", prefix, index + 1)
}

/// 展开为可存入对话记忆的(文本, 元数据)，只包含功能需求、非功能需求与业务规则
pub fn extract_entities_for_storage(
    result: &RequirementsResult,
) -> Vec<(String, BTreeMap<String, String>)> {
    let requirements = &result.requirements;
    let groups = [
        ("FR", "functional_requirement", &requirements.functional_requirements),
        (
            "NFR",
            "non_functional_requirement",
            &requirements.non_functional_requirements,
        ),
        ("BR", "business_rule", &requirements.business_rules),
    ];

    groups
        .into_iter()
        .flat_map(|(prefix, kind, items)| {
            items.iter().enumerate().map(move |(i, item)| {
                let id = numbered_id(prefix, i);
                let metadata = BTreeMap::from([
                    ("type".to_string(), kind.to_string()),
                    ("id".to_string(), id.clone()),
                ]);
                (format!("{}: {}", id, item), metadata)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests;
