use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use walkdir::WalkDir;

use crate::config::{Config, LLMProvider};

pub mod commands;

/// ReqPilot - 由Rust与AI驱动的对话式需求分析助手
#[derive(Parser, Debug)]
#[command(name = "reqpilot")]
#[command(
    about = "Conversational requirements-analysis assistant. Generates requirements, answers questions over your documents, and runs multi-agent deep research."
)]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// 配置文件路径
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 索引持久化目录
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// 报告输出目录
    #[arg(short, long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// 是否启用详细日志
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// 高能效模型，用于常规推理任务
    #[arg(long, global = true)]
    pub model_efficient: Option<String>,

    /// 高质量模型，用于长提示词，以及efficient失效时的兜底
    #[arg(long, global = true)]
    pub model_powerful: Option<String>,

    /// LLM API基地址
    #[arg(long, global = true)]
    pub llm_api_base_url: Option<String>,

    /// LLM API KEY
    #[arg(long, global = true)]
    pub llm_api_key: Option<String>,

    /// 温度参数
    #[arg(long, global = true)]
    pub temperature: Option<f64>,

    /// LLM Provider (openai, moonshot, deepseek, mistral, openrouter, anthropic, ollama)
    #[arg(long, global = true)]
    pub llm_provider: Option<String>,

    /// 禁用联网搜索
    #[arg(long, global = true)]
    pub no_web_search: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// 交互式对话
    Chat {
        /// 角色 (Requirements Analyst, Software Architect, Software Developer, Test Engineer)
        #[arg(short, long)]
        role: Option<String>,
    },
    /// 基于已索引文档回答问题
    Ask {
        question: String,
        /// 文档中找不到答案时不联网
        #[arg(long)]
        documents_only: bool,
    },
    /// 索引文件、目录或glob模式
    Index {
        #[arg(required = true)]
        paths: Vec<String>,
        /// 索引后构建知识图谱
        #[arg(long)]
        build_graph: bool,
    },
    /// 深度调研并导出报告
    Research {
        query: String,
        /// 只打印报告，不写文件
        #[arg(long)]
        no_export: bool,
    },
    /// 根据描述生成结构化需求
    Requirements {
        description: String,
        #[arg(short, long)]
        role: Option<String>,
        #[arg(short, long)]
        focus: Option<String>,
        /// 输出JSON而非Markdown
        #[arg(long)]
        json: bool,
    },
    /// 索引统计
    Stats,
    /// 导出索引为JSON
    Export { output: PathBuf },
    /// 从JSON导入索引
    Import { input: PathBuf },
    /// 清空索引
    Clear,
    /// 检查模型连接
    Check,
}

impl Args {
    /// 将CLI参数转换为配置
    pub fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(config_path) => Config::from_file(config_path)
                .with_context(|| format!("无法读取配置文件 {:?}", config_path))?,
            None => {
                let default_config_path = std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join("reqpilot.toml");
                if default_config_path.exists() {
                    Config::from_file(&default_config_path)?
                } else {
                    Config::default()
                }
            }
        };

        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(output_dir) = self.output_dir {
            config.output_dir = output_dir;
        }

        // 覆盖LLM配置
        if let Some(provider_str) = self.llm_provider {
            match provider_str.parse::<LLMProvider>() {
                Ok(provider) => config.llm.provider = provider,
                Err(_) => eprintln!(
                    "⚠️ 警告: 未知的provider: {}，使用默认provider",
                    provider_str
                ),
            }
        }
        if let Some(llm_api_base_url) = self.llm_api_base_url {
            config.llm.api_base_url = llm_api_base_url;
        }
        if let Some(llm_api_key) = self.llm_api_key {
            config.llm.api_key = llm_api_key;
        }
        if let Some(model_efficient) = self.model_efficient {
            config.llm.model_efficient = model_efficient;
        }
        if let Some(model_powerful) = self.model_powerful {
            config.llm.model_powerful = model_powerful;
        }
        if let Some(temperature) = self.temperature {
            config.llm.temperature = temperature;
        }

        if self.no_web_search {
            config.web_search.enabled = false;
        }
        if let Command::Research { no_export: true, .. } = self.command {
            config.research.export_report = false;
        }
        config.verbose = config.verbose || self.verbose;

        Ok(config)
    }
}

/// 展开命令行给出的路径：glob模式、目录（递归）或单个文件
///
/// 结果保持输入顺序，重复路径交给索引去报告为跳过。
pub fn expand_paths(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        if pattern.contains(['*', '?', '[']) {
            let mut matched: Vec<PathBuf> = glob::glob(pattern)
                .with_context(|| format!("无效的glob模式: {}", pattern))?
                .filter_map(|entry| entry.ok())
                .filter(|path| path.is_file())
                .collect();
            matched.sort();
            paths.extend(matched);
            continue;
        }

        let path = PathBuf::from(pattern);
        if path.is_dir() {
            let mut files: Vec<PathBuf> = WalkDir::new(&path)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
                .map(|entry| entry.into_path())
                .collect();
            files.sort();
            paths.extend(files);
        } else {
            paths.push(path);
        }
    }
    Ok(paths)
}
