//! Mermaid图表生成

use std::sync::Arc;

use tracing::{info, warn};

use crate::llm::LlmGateway;

const CHART_KEYWORDS: [&str; 30] = [
    "chart",
    "diagram",
    "visualize",
    "visualization",
    "mermaid",
    "sequence diagram",
    "flowchart",
    "flow chart",
    "class diagram",
    "er diagram",
    "entity relationship",
    "draw",
    "show me a diagram",
    "generate diagram",
    "use case",
    "uml",
    "workflow",
    "process flow",
    "图",
    "流程",
    "时序",
    "类图",
    "用例",
    "画",
    "绘制",
    "可视化",
    "示意图",
    "架构图",
    "数据流",
    "数据模型",
];

const CHART_SYSTEM_PROMPT: &str = "You are an expert at creating Mermaid diagrams. Generate clean, valid Mermaid syntax. \
Always use English for all text in diagrams, since CJK characters break rendering.";

const CHART_TEMPERATURE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagramType {
    Sequence,
    Flowchart,
    Class,
    Er,
}

impl DiagramType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagramType::Sequence => "sequence",
            DiagramType::Flowchart => "flowchart",
            DiagramType::Class => "class",
            DiagramType::Er => "er",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            DiagramType::Sequence => "Sequence",
            DiagramType::Flowchart => "Flowchart",
            DiagramType::Class => "Class",
            DiagramType::Er => "ER",
        }
    }

    fn instructions(&self) -> &'static str {
        match self {
            DiagramType::Sequence => {
                "generate a Mermaid sequence diagram describing the user flow. Identify the actors, the sequence of interactions, decision points and alternative flows."
            }
            DiagramType::Flowchart => {
                "generate a Mermaid flowchart (flowchart TD or flowchart LR) describing the system flow. Identify the main processes, decision points and conditional branches."
            }
            DiagramType::Class => {
                "generate a Mermaid class diagram describing the system structure. Identify the main classes, their attributes and methods, and the relationships between them."
            }
            DiagramType::Er => {
                "generate a Mermaid ER diagram describing the data model. Identify the entities, their attributes and the relationships with cardinality."
            }
        }
    }
}

/// 用户是否明确要求生成图表
pub fn should_generate_chart(user_input: &str) -> bool {
    let lower = user_input.to_lowercase();
    CHART_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

/// 根据用户输入判断图表类型，默认时序图
pub fn detect_diagram_type(user_input: &str) -> DiagramType {
    let lower = user_input.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    let has_word = |word: &str| {
        lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|token| token == word)
    };

    // flowchart优先，"flow"也出现在"user flow"中
    if has(&["flowchart", "flow chart", "process flow", "workflow", "流程图"]) {
        DiagramType::Flowchart
    } else if has(&["sequence", "时序", "interaction", "user flow", "交互"]) {
        DiagramType::Sequence
    } else if has(&["class", "类图", "structure", "object", "uml", "对象"]) {
        DiagramType::Class
    } else if has_word("er")
        || has(&["entity", "database", "data model", "实体", "数据模型"])
    {
        DiagramType::Er
    } else {
        DiagramType::Sequence
    }
}

/// 把模型输出规范为```mermaid代码块
pub fn normalize_mermaid(raw: &str) -> String {
    let mut code = raw.trim().to_string();
    if !code.starts_with("```mermaid") {
        code = match code.strip_prefix("```") {
            Some(rest) => format!("```mermaid\n{}", rest.trim_start()),
            None => format!("```mermaid\n{}", code),
        };
    }
    if !code.ends_with("```") || code.len() <= "```mermaid".len() {
        code = format!("{}\n```", code);
    }
    code
}

pub fn error_diagram(error: &str) -> String {
    let reason: String = error
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | '"' | '\n'))
        .collect();
    format!(
        "```mermaid\ngraph TD\n    A[Error] --> B[Failed to generate diagram: {}]\n```",
        reason
    )
}

/// 从需求文本生成Mermaid图表，失败时返回错误图
pub struct MermaidChartTool {
    llm: Arc<dyn LlmGateway>,
}

impl MermaidChartTool {
    pub fn new(llm: Arc<dyn LlmGateway>) -> Self {
        Self { llm }
    }

    pub async fn generate(&self, requirements: &str, diagram_type: DiagramType) -> String {
        let user_prompt = format!(
            "Based on the following requirements, {}\n\nRequirements:\n{}\n\nOutput ONLY the Mermaid code block, no explanations. Start with ```mermaid and end with ```.",
            diagram_type.instructions(),
            requirements
        );

        info!("📊 生成 {} 图表", diagram_type.as_str());
        match self
            .llm
            .complete(CHART_SYSTEM_PROMPT, &user_prompt, Some(CHART_TEMPERATURE))
            .await
        {
            Ok(reply) => normalize_mermaid(&reply),
            Err(e) => {
                warn!("⚠️ 图表生成失败: {}", e);
                error_diagram(&e.to_string())
            }
        }
    }
}
