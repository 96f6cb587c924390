use serde::{Deserialize, Serialize};

use crate::rag::web_search::ImageRef;

fn default_priority() -> u32 {
    3
}

fn default_category() -> String {
    "general".to_string()
}

/// 调研子任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchTask {
    pub task: String,
    /// 1为最高优先级
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResearchTask {
    pub fn new(task: impl Into<String>, priority: u32, category: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            priority,
            category: category.into(),
            completed: false,
            result: String::new(),
            images: Vec::new(),
            error: None,
        }
    }
}

/// 查询分析结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryAnalysis {
    pub detected_language: String,
    pub intent: String,
    pub key_concepts: Vec<String>,
    pub expanded_query: String,
    pub search_dimensions: Vec<String>,
    pub suggested_focus_areas: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    Started,
    QueryAnalyzed,
    PlanningComplete,
    SearchingComplete,
    WritingComplete,
    Complete,
    Error,
}

/// 带归属信息的图片
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskImage {
    #[serde(flatten)]
    pub image: ImageRef,
    pub category: String,
    pub task_index: usize,
}

/// 报告导出结果，未生成的格式为空字符串
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReportPaths {
    pub markdown_path: String,
    pub html_path: String,
    pub pdf_path: String,
    pub docx_path: String,
}

/// 在各阶段之间传递的调研状态
///
/// 每个阶段独占`&mut`访问；`revision`在每次阶段推进时加一。
/// 调用方应先检查`status`，只有`Complete`时`report`和各路径才有意义。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchState {
    pub revision: u32,
    pub query: String,
    pub expanded_query: String,
    pub query_analysis: Option<QueryAnalysis>,
    pub tasks: Vec<ResearchTask>,
    pub all_results: Vec<String>,
    pub all_images: Vec<TaskImage>,
    pub report: String,
    pub paths: ReportPaths,
    pub status: ResearchStatus,
    pub error: String,
}

impl ResearchState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            revision: 0,
            query: query.into(),
            expanded_query: String::new(),
            query_analysis: None,
            tasks: Vec::new(),
            all_results: Vec::new(),
            all_images: Vec::new(),
            report: String::new(),
            paths: ReportPaths::default(),
            status: ResearchStatus::Started,
            error: String::new(),
        }
    }

    /// 规划与检索使用的查询，扩写为空时退回原查询
    pub fn planning_query(&self) -> &str {
        if self.expanded_query.trim().is_empty() {
            &self.query
        } else {
            &self.expanded_query
        }
    }

    pub fn advance(&mut self, status: ResearchStatus) {
        self.status = status;
        self.revision += 1;
    }

    /// 进入终止的错误状态，清空报告与路径
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = error.into();
        self.report.clear();
        self.paths = ReportPaths::default();
        self.advance(ResearchStatus::Error);
    }

    pub fn completed_tasks(&self) -> usize {
        self.tasks.iter().filter(|t| t.completed).count()
    }
}
