//! 文档解析
//!
//! PDF/Word/Excel等格式的抽取由外部解析器实现[`DocumentParser`]接入；
//! 内置的[`PlainTextParser`]处理纯文本类格式，其他格式返回说明性的占位文本。

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 解析元数据
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParseMetadata {
    pub tables: usize,
    pub images: usize,
    pub parser_name: String,
    /// 格式不受支持，`text`只是占位说明
    pub placeholder: bool,
}

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub text: String,
    pub metadata: ParseMetadata,
}

#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// 解析文件；不支持的格式返回占位文本而不是错误
    async fn parse(&self, path: &Path) -> Result<ParsedDocument>;
}

const TEXT_EXTENSIONS: [&str; 14] = [
    "txt", "md", "markdown", "rst", "log", "json", "yaml", "yml", "toml", "xml", "html", "htm",
    "csv", "tsv",
];

/// 纯文本解析器
#[derive(Debug, Default, Clone)]
pub struct PlainTextParser;

#[async_trait]
impl DocumentParser for PlainTextParser {
    async fn parse(&self, path: &Path) -> Result<ParsedDocument> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if !extension.is_empty() && !TEXT_EXTENSIONS.contains(&extension.as_str()) {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            return Ok(ParsedDocument {
                text: format!(
                    "[Unsupported document format: .{} ({}) - configure an external parser to extract its content]",
                    extension, filename
                ),
                metadata: ParseMetadata {
                    parser_name: "placeholder".to_string(),
                    placeholder: true,
                    ..Default::default()
                },
            });
        }

        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("无法读取文件: {}", path.display()))?;
        let tables = usize::from(matches!(extension.as_str(), "csv" | "tsv"));

        Ok(ParsedDocument {
            text,
            metadata: ParseMetadata {
                tables,
                images: 0,
                parser_name: "plain_text".to_string(),
                placeholder: false,
            },
        })
    }
}
