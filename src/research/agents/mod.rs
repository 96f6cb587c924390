//! 深度调研的各阶段智能体

pub mod planner;
pub mod query_analyzer;
pub mod report_exporter;
pub mod searcher;
pub mod writer;

use anyhow::Result;
use async_trait::async_trait;

use super::types::ResearchState;

/// 调研流水线中的一个阶段
///
/// 阶段按顺序独占状态；返回`Err`会让整个流程进入`Error`终态。
#[async_trait]
pub trait ResearchStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, state: &mut ResearchState) -> Result<()>;
}
