//! 调研报告导出

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;

use crate::rag::web_search::ImageRef;

use super::types::ReportPaths;

/// 把报告正文渲染为文件，返回各格式的路径（未生成的为空字符串）
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(&self, title: &str, body: &str, images: &[ImageRef]) -> Result<ReportPaths>;
}

/// 输出Markdown与HTML，PDF/DOCX留给外部渲染器
pub struct MarkdownReportRenderer {
    output_dir: PathBuf,
}

impl MarkdownReportRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

/// 文件名：标题中的字母数字，其余替换为下划线
pub fn file_stem(title: &str) -> String {
    let slug: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    let slug = if slug.is_empty() {
        "research_report".to_string()
    } else {
        slug.chars().take(60).collect()
    };
    format!("{}_{}", slug, chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

/// 报告正文加上图片附录
pub fn compose_markdown(title: &str, body: &str, images: &[ImageRef]) -> String {
    let mut markdown = if body.trim_start().starts_with('#') {
        body.to_string()
    } else {
        format!("# {}\n\n{}", title, body)
    };

    let figures: Vec<&ImageRef> = images.iter().filter(|i| !i.url.is_empty()).collect();
    if !figures.is_empty() {
        markdown.push_str("\n\n## Figures\n\n");
        for (i, image) in figures.iter().enumerate() {
            let caption = if image.title.is_empty() {
                format!("Figure {}", i + 1)
            } else {
                image.title.clone()
            };
            markdown.push_str(&format!("![{}]({})\n", caption, image.url));
            if !image.source_url.is_empty() {
                markdown.push_str(&format!("\n*Source: {}*\n", image.source_url));
            }
            markdown.push('\n');
        }
    }
    markdown
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn to_html_page(title: &str, markdown: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        escape_html(title),
        markdown::to_html(markdown)
    )
}

#[async_trait]
impl ReportRenderer for MarkdownReportRenderer {
    async fn render(&self, title: &str, body: &str, images: &[ImageRef]) -> Result<ReportPaths> {
        fs::create_dir_all(&self.output_dir).context(format!(
            "Failed to create report directory: {:?}",
            self.output_dir
        ))?;

        let stem = file_stem(title);
        let markdown = compose_markdown(title, body, images);

        let markdown_path = self.output_dir.join(format!("{}.md", stem));
        fs::write(&markdown_path, &markdown)
            .context(format!("Failed to write report: {:?}", markdown_path))?;

        let html_path = self.output_dir.join(format!("{}.html", stem));
        fs::write(&html_path, to_html_page(title, &markdown))
            .context(format!("Failed to write report: {:?}", html_path))?;

        info!("💾 已保存报告: {}", markdown_path.display());

        Ok(ReportPaths {
            markdown_path: markdown_path.display().to_string(),
            html_path: html_path.display().to_string(),
            pdf_path: String::new(),
            docx_path: String::new(),
        })
    }
}
