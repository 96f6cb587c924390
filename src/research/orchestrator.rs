use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::config::ResearchConfig;
use crate::llm::LlmGateway;
use crate::rag::web_search::WebSearch;

use super::agents::ResearchStage;
use super::agents::planner::Planner;
use super::agents::query_analyzer::QueryAnalyzer;
use super::agents::report_exporter::ReportExporter;
use super::agents::searcher::Searcher;
use super::agents::writer::Writer;
use super::report::ReportRenderer;
use super::types::{ResearchState, ResearchStatus};

/// 深度调研工作流：分析 → 规划 → 并行检索 → 撰写 → 导出
pub struct DeepResearchWorkflow {
    analyzer: QueryAnalyzer,
    planner: Planner,
    searcher: Searcher,
    writer: Writer,
    exporter: ReportExporter,
    export_report: bool,
}

impl DeepResearchWorkflow {
    pub fn new(
        llm: Arc<dyn LlmGateway>,
        web: Arc<dyn WebSearch>,
        renderer: Arc<dyn ReportRenderer>,
        config: ResearchConfig,
    ) -> Self {
        Self {
            analyzer: QueryAnalyzer::new(llm.clone()),
            planner: Planner::new(llm.clone(), config.clone()),
            searcher: Searcher::new(llm.clone(), web, config.clone()),
            writer: Writer::new(llm, config.clone()),
            exporter: ReportExporter::new(renderer),
            export_report: config.export_report,
        }
    }

    /// 执行完整调研流程，失败以`Error`状态返回而不是抛出
    pub async fn run(&self, query: &str) -> ResearchState {
        let mut state = ResearchState::new(query);
        info!("🚀 开始深度调研: {}", query);

        if let Err(e) = self.execute_pipeline(&mut state).await {
            error!("❌ 深度调研失败: {}", e);
            state.fail(e.to_string());
            return state;
        }

        info!(
            "✓ 深度调研完成 | 任务 {}/{} | 报告 {} 字符",
            state.completed_tasks(),
            state.tasks.len(),
            state.report.chars().count()
        );
        state
    }

    async fn execute_pipeline(&self, state: &mut ResearchState) -> Result<()> {
        self.execute_stage(&self.analyzer, state).await?;
        self.execute_stage(&self.planner, state).await?;
        self.execute_stage(&self.searcher, state).await?;
        self.execute_stage(&self.writer, state).await?;

        if self.export_report {
            self.execute_stage(&self.exporter, state).await?;
        } else if state.report.trim().is_empty() {
            anyhow::bail!("Report is empty");
        } else {
            state.advance(ResearchStatus::Complete);
        }
        Ok(())
    }

    async fn execute_stage<T>(&self, stage: &T, state: &mut ResearchState) -> Result<()>
    where
        T: ResearchStage,
    {
        info!("🤖 执行 {} ...", stage.name());
        stage.execute(state).await?;
        info!("✓ {} 完成", stage.name());
        Ok(())
    }
}
