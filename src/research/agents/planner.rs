use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::ResearchConfig;
use crate::llm::LlmGateway;
use crate::research::types::{ResearchState, ResearchStatus, ResearchTask};
use crate::utils::json_extract::{ParseFailure, extract_json};

use super::ResearchStage;

#[derive(Debug, Deserialize)]
struct PlannedTask {
    #[serde(default)]
    task: String,
    #[serde(default)]
    priority: Value,
    #[serde(default)]
    category: Value,
}

/// 优先级可能是整数、小数或数字字符串，其它情况按3处理
fn lenient_priority(value: &Value) -> u32 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(p) if p.is_finite() && p >= 0.0 => p.round() as u32,
        _ => 3,
    }
}

/// 解析规划结果：容忍前后文字与代码块，按优先级升序排列，最多保留`max_tasks`个
pub fn parse_plan(raw: &str, max_tasks: usize) -> Result<Vec<ResearchTask>, ParseFailure> {
    let planned: Vec<PlannedTask> = extract_json(raw)?;
    let mut tasks: Vec<ResearchTask> = planned
        .into_iter()
        .filter(|t| !t.task.trim().is_empty())
        .map(|t| {
            ResearchTask::new(
                t.task.trim(),
                lenient_priority(&t.priority),
                t.category
                    .as_str()
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .unwrap_or("general"),
            )
        })
        .collect();
    tasks.sort_by_key(|t| t.priority);
    tasks.truncate(max_tasks.max(1));
    Ok(tasks)
}

pub fn fallback_task(query: &str) -> ResearchTask {
    ResearchTask::new(format!("General research on: {}", query), 1, "general")
}

/// 把查询拆解为可独立检索的子任务
pub struct Planner {
    llm: Arc<dyn LlmGateway>,
    config: ResearchConfig,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmGateway>, config: ResearchConfig) -> Self {
        Self { llm, config }
    }

    /// 总是至少返回一个任务
    pub async fn plan(&self, query: &str) -> Vec<ResearchTask> {
        let system_prompt = format!(
            "You are a research planner. Break the research query into {}-{} independent, web-searchable tasks.\n\
             Return ONLY a JSON array: [{{\"task\": \"...\", \"priority\": 1-5 (1 = highest), \"category\": \"overview|technical|case_studies|comparison|trends|challenges\"}}]",
            self.config.min_tasks, self.config.max_tasks
        );

        let reply = match self.llm.complete(&system_prompt, query, Some(0.3)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("⚠️ 任务规划失败，使用兜底任务: {}", e);
                return vec![fallback_task(query)];
            }
        };

        match parse_plan(&reply, self.config.max_tasks) {
            Ok(tasks) if !tasks.is_empty() => tasks,
            Ok(_) => {
                warn!("⚠️ 任务规划结果为空，使用兜底任务");
                vec![fallback_task(query)]
            }
            Err(e) => {
                warn!("⚠️ 任务规划结果无法解析，使用兜底任务: {}", e);
                vec![fallback_task(query)]
            }
        }
    }
}

#[async_trait]
impl ResearchStage for Planner {
    fn name(&self) -> &'static str {
        "Planner"
    }

    async fn execute(&self, state: &mut ResearchState) -> Result<()> {
        let tasks = self.plan(state.planning_query()).await;
        info!("📋 生成了 {} 个调研任务", tasks.len());
        state.tasks = tasks;
        state.all_results.clear();
        state.all_images.clear();
        state.advance(ResearchStatus::PlanningComplete);
        Ok(())
    }
}
