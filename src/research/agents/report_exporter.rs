use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::rag::web_search::ImageRef;
use crate::research::report::ReportRenderer;
use crate::research::types::{ResearchState, ResearchStatus};
use crate::utils::truncate_chars;

use super::ResearchStage;

pub fn report_title(query: &str) -> String {
    format!("Research Report: {}", truncate_chars(query, 50))
}

/// 导出报告文件，空报告视为失败
pub struct ReportExporter {
    renderer: Arc<dyn ReportRenderer>,
}

impl ReportExporter {
    pub fn new(renderer: Arc<dyn ReportRenderer>) -> Self {
        Self { renderer }
    }
}

#[async_trait]
impl ResearchStage for ReportExporter {
    fn name(&self) -> &'static str {
        "ReportExporter"
    }

    async fn execute(&self, state: &mut ResearchState) -> Result<()> {
        if state.report.trim().is_empty() {
            bail!("Report is empty, nothing to export");
        }

        let images: Vec<ImageRef> = state.all_images.iter().map(|i| i.image.clone()).collect();
        state.paths = self
            .renderer
            .render(&report_title(&state.query), &state.report, &images)
            .await?;
        state.advance(ResearchStatus::Complete);
        Ok(())
    }
}
