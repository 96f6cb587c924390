//! 深度调研
//!
//! 多阶段工作流，每个阶段是一个[`agents::ResearchStage`]，
//! 按顺序读写同一个[`types::ResearchState`]。

pub mod agents;
pub mod orchestrator;
pub mod report;
pub mod types;

pub use orchestrator::DeepResearchWorkflow;
pub use report::{MarkdownReportRenderer, ReportRenderer};
pub use types::{ResearchState, ResearchStatus, ResearchTask};
