use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// LLM Provider类型
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub enum LLMProvider {
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "moonshot")]
    Moonshot,
    #[serde(rename = "deepseek")]
    #[default]
    DeepSeek,
    #[serde(rename = "mistral")]
    Mistral,
    #[serde(rename = "openrouter")]
    OpenRouter,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "ollama")]
    Ollama,
}

impl LLMProvider {
    /// 是否提供OpenAI兼容的 `/chat/completions` 流式接口
    pub fn supports_openai_streaming(&self) -> bool {
        !matches!(self, LLMProvider::Anthropic)
    }
}

impl std::fmt::Display for LLMProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LLMProvider::OpenAI => write!(f, "openai"),
            LLMProvider::Moonshot => write!(f, "moonshot"),
            LLMProvider::DeepSeek => write!(f, "deepseek"),
            LLMProvider::Mistral => write!(f, "mistral"),
            LLMProvider::OpenRouter => write!(f, "openrouter"),
            LLMProvider::Anthropic => write!(f, "anthropic"),
            LLMProvider::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for LLMProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(LLMProvider::OpenAI),
            "moonshot" => Ok(LLMProvider::Moonshot),
            "deepseek" => Ok(LLMProvider::DeepSeek),
            "mistral" => Ok(LLMProvider::Mistral),
            "openrouter" => Ok(LLMProvider::OpenRouter),
            "anthropic" => Ok(LLMProvider::Anthropic),
            "ollama" => Ok(LLMProvider::Ollama),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// 应用程序配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    /// 文档索引持久化目录
    pub data_dir: PathBuf,

    /// 调研报告输出目录
    pub output_dir: PathBuf,

    /// 默认角色
    pub default_role: String,

    /// 是否启用详细日志
    pub verbose: bool,

    /// LLM模型配置
    pub llm: LLMConfig,

    /// 向量化配置
    pub embedding: EmbeddingConfig,

    /// 检索配置
    pub rag: RagConfig,

    /// 联网搜索配置
    pub web_search: WebSearchConfig,

    /// 对话记忆配置
    pub memory: MemoryConfig,

    /// 深度调研配置
    pub research: ResearchConfig,

    /// 需求生成配置
    pub requirements: RequirementsConfig,

    /// 会话配置
    pub session: SessionConfig,
}

/// LLM模型配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LLMConfig {
    /// LLM Provider类型
    pub provider: LLMProvider,

    /// LLM API KEY
    pub api_key: String,

    /// LLM API基地址
    pub api_base_url: String,

    /// 高能效模型，用于常规推理
    pub model_efficient: String,

    /// 高质量模型，用于长上下文推理，以及作为efficient失效时的兜底
    pub model_powerful: String,

    /// 最大tokens
    pub max_tokens: u32,

    /// 温度
    pub temperature: f64,

    /// 重试次数
    pub retry_attempts: u32,

    /// 重试间隔（毫秒）
    pub retry_delay_ms: u64,

    /// 超时时间（秒）
    pub timeout_seconds: u64,
}

/// 向量化配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// 是否启用向量检索
    pub enabled: bool,

    /// Embedding API KEY
    pub api_key: String,

    /// Embedding API基地址（OpenAI兼容）
    pub api_base_url: String,

    /// Embedding模型
    pub model: String,

    /// 单次请求的文本条数
    pub batch_size: usize,

    /// 最大重试次数
    pub max_retries: u32,

    /// 超时时间（秒）
    pub timeout_seconds: u64,
}

/// 混合检索配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RagConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub vector_top_k: usize,
    pub keyword_top_k: usize,
    /// 查询被改写后，对原始查询追加检索的数量
    pub original_query_top_k: usize,
    pub max_context_docs: usize,
    pub max_sources: usize,
    /// 候选文档数超过该值才调用模型重排
    pub rank_threshold: usize,
    pub rank_preview_docs: usize,
    pub dedup_prefix_chars: usize,
    pub enable_query_rewrite: bool,
    pub enable_ranking: bool,
    pub enable_graph: bool,
    pub enable_web_escalation: bool,
    pub graph_sample_size: usize,
    pub graph_sample_chars: usize,
    pub graph_max_entities: usize,
    pub graph_max_relationships: usize,
}

/// 联网搜索配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct WebSearchConfig {
    pub enabled: bool,
    /// SearXNG兼容的搜索服务地址
    pub endpoint: Option<String>,
    pub max_results: usize,
    pub timeout_seconds: u64,
}

/// 对话记忆配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    /// 超过该消息数时触发摘要
    pub max_messages: usize,
    /// 摘要后保留的最近消息数
    pub keep_recent: usize,
    /// 超过该估算token数时触发摘要
    pub token_limit: usize,
    /// 上下文中附带的实体数量
    pub entity_context_count: usize,
}

/// 深度调研配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ResearchConfig {
    pub parallel_searchers: usize,
    pub search_results_per_task: usize,
    pub images_per_task: usize,
    pub search_timeout_seconds: u64,
    pub min_tasks: usize,
    pub max_tasks: usize,
    /// 汇总发现超过该字符数时分章节撰写
    pub section_mode_threshold_chars: usize,
    /// 单次撰写的报告短于该字符数时改为分章节撰写
    pub min_report_chars: usize,
    pub export_report: bool,
}

/// 需求生成配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RequirementsConfig {
    pub max_refinement_iterations: u32,
    pub quality_threshold: f64,
}

/// 会话配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    /// 空闲超时（分钟）
    pub timeout_minutes: i64,
}

impl Config {
    /// 从文件加载配置
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut file =
            File::open(path).context(format!("Failed to open config file: {:?}", path))?;
        let mut content = String::new();
        file.read_to_string(&mut content)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// 索引文件路径
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join("index.json")
    }

    /// 图谱文件路径
    pub fn graph_path(&self) -> PathBuf {
        self.data_dir.join("graph.json")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./.reqpilot"),
            output_dir: PathBuf::from("./reqpilot.reports"),
            default_role: String::from("Requirements Analyst"),
            verbose: false,
            llm: LLMConfig::default(),
            embedding: EmbeddingConfig::default(),
            rag: RagConfig::default(),
            web_search: WebSearchConfig::default(),
            memory: MemoryConfig::default(),
            research: ResearchConfig::default(),
            requirements: RequirementsConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::default(),
            api_key: std::env::var("REQPILOT_LLM_API_KEY").unwrap_or_default(),
            api_base_url: String::from("https://api.deepseek.com"),
            model_efficient: String::from("deepseek-chat"),
            model_powerful: String::from("deepseek-chat"),
            max_tokens: 8192,
            temperature: 0.7,
            retry_attempts: 3,
            retry_delay_ms: 2000,
            timeout_seconds: 120,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: std::env::var("REQPILOT_EMBEDDING_API_KEY").unwrap_or_default(),
            api_base_url: String::from("https://api.openai.com/v1"),
            model: String::from("text-embedding-3-small"),
            batch_size: 64,
            max_retries: 3,
            timeout_seconds: 60,
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            vector_top_k: 8,
            keyword_top_k: 8,
            original_query_top_k: 5,
            max_context_docs: 10,
            max_sources: 3,
            rank_threshold: 3,
            rank_preview_docs: 10,
            dedup_prefix_chars: 200,
            enable_query_rewrite: true,
            enable_ranking: true,
            enable_graph: true,
            enable_web_escalation: true,
            graph_sample_size: 20,
            graph_sample_chars: 2000,
            graph_max_entities: 15,
            graph_max_relationships: 10,
        }
    }
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: std::env::var("REQPILOT_SEARCH_ENDPOINT").ok(),
            max_results: 3,
            timeout_seconds: 30,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            keep_recent: 5,
            token_limit: 2000,
            entity_context_count: 5,
        }
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            parallel_searchers: 4,
            search_results_per_task: 10,
            images_per_task: 2,
            search_timeout_seconds: 30,
            min_tasks: 8,
            max_tasks: 12,
            section_mode_threshold_chars: 50_000,
            min_report_chars: 15_000,
            export_report: true,
        }
    }
}

impl Default for RequirementsConfig {
    fn default() -> Self {
        Self {
            max_refinement_iterations: 2,
            quality_threshold: 7.0,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 60,
        }
    }
}
