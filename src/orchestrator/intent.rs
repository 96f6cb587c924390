use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 单一意图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    RequirementsGeneration,
    RagQa,
    DeepResearch,
    GeneralChat,
}

impl Intent {
    pub const ALL: [Intent; 4] = [
        Intent::RequirementsGeneration,
        Intent::RagQa,
        Intent::DeepResearch,
        Intent::GeneralChat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::RequirementsGeneration => "requirements_generation",
            Intent::RagQa => "rag_qa",
            Intent::DeepResearch => "deep_research",
            Intent::GeneralChat => "general_chat",
        }
    }
}

impl Display for Intent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Intent::ALL
            .into_iter()
            .find(|intent| intent.as_str() == s)
            .ok_or(())
    }
}

/// 一轮对话的路由结果：单一意图，或按顺序执行的组合意图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntentPlan {
    Single(Intent),
    Mixed(Vec<Intent>),
}

impl IntentPlan {
    /// 解析分类器输出，无法识别的内容一律视为`general_chat`
    ///
    /// `a+b[+c]`中只有非`general_chat`的合法部分计数：
    /// 两个及以上为组合意图，一个为单一意图，零个为`general_chat`。
    pub fn parse(raw: &str) -> Self {
        let normalized = raw
            .trim()
            .trim_matches(|c: char| c == '`' || c == '"' || c == '\'' || c == '.')
            .trim()
            .to_lowercase();

        if !normalized.contains('+') {
            return match normalized.parse::<Intent>() {
                Ok(intent) => IntentPlan::Single(intent),
                Err(_) => IntentPlan::Single(Intent::GeneralChat),
            };
        }

        let parts: Vec<Intent> = normalized
            .split('+')
            .filter_map(|part| part.trim().parse::<Intent>().ok())
            .filter(|intent| *intent != Intent::GeneralChat)
            .collect();

        match parts.len() {
            0 => IntentPlan::Single(Intent::GeneralChat),
            1 => IntentPlan::Single(parts[0]),
            _ => IntentPlan::Mixed(parts),
        }
    }

    pub fn is_mixed(&self) -> bool {
        matches!(self, IntentPlan::Mixed(_))
    }

    pub fn steps(&self) -> Vec<Intent> {
        match self {
            IntentPlan::Single(intent) => vec![*intent],
            IntentPlan::Mixed(steps) => steps.clone(),
        }
    }
}

impl Display for IntentPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IntentPlan::Single(intent) => write!(f, "{}", intent),
            IntentPlan::Mixed(steps) => {
                let joined = steps
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join("+");
                f.write_str(&joined)
            }
        }
    }
}
