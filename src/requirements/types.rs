use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// 列表项宽松解析：字符串原样保留，对象或数字转为紧凑JSON文本，单个值视为一项
fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    fn stringify(value: Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }

    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().filter_map(stringify).collect(),
        other => stringify(other).into_iter().collect(),
    })
}

/// 结构化需求
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RequirementsDocument {
    /// 功能需求
    #[serde(default, deserialize_with = "lenient_strings")]
    #[schemars(with = "Vec<String>")]
    pub functional_requirements: Vec<String>,
    /// 非功能需求
    #[serde(default, deserialize_with = "lenient_strings")]
    #[schemars(with = "Vec<String>")]
    pub non_functional_requirements: Vec<String>,
    /// 业务规则
    #[serde(default, deserialize_with = "lenient_strings")]
    #[schemars(with = "Vec<String>")]
    pub business_rules: Vec<String>,
    /// 用例
    #[serde(default, deserialize_with = "lenient_strings")]
    #[schemars(with = "Vec<String>")]
    pub use_cases: Vec<String>,
    /// 前提假设
    #[serde(default, deserialize_with = "lenient_strings")]
    #[schemars(with = "Vec<String>")]
    pub assumptions: Vec<String>,
}

impl RequirementsDocument {
    pub fn is_empty(&self) -> bool {
        self.functional_requirements.is_empty()
            && self.non_functional_requirements.is_empty()
            && self.business_rules.is_empty()
            && self.use_cases.is_empty()
            && self.assumptions.is_empty()
    }
}

/// 质量评分，1-10分，越高越好
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct QualityScores {
    /// 10 = 没有歧义
    pub ambiguity: f64,
    pub completeness: f64,
    pub consistency: f64,
    pub clarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ValidationReport {
    #[serde(default)]
    pub scores: Option<QualityScores>,
    #[serde(default, deserialize_with = "lenient_strings")]
    #[schemars(with = "Vec<String>")]
    pub suggestions: Vec<String>,
    /// 模型未给出时视为满分，不再触发改进
    #[serde(default = "default_overall_score")]
    pub overall_score: f64,
}

fn default_overall_score() -> f64 {
    10.0
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Success,
    Error,
}

impl std::fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationStatus::Success => write!(f, "success"),
            GenerationStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementsResult {
    pub requirements: RequirementsDocument,
    pub validation: ValidationReport,
    pub refinement_iterations: u32,
    pub status: GenerationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RequirementsResult {
    /// 生成失败时的兜底结果，错误信息放进改进建议
    pub fn failed(err: &anyhow::Error) -> Self {
        Self {
            requirements: RequirementsDocument::default(),
            validation: ValidationReport {
                scores: None,
                suggestions: vec![err.to_string()],
                overall_score: 0.0,
            },
            refinement_iterations: 0,
            status: GenerationStatus::Error,
            error: Some(err.to_string()),
        }
    }
}
