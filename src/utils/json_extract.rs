//! 从模型输出中提取JSON
//!
//! 模型经常把JSON包在```json代码块里，或者前后夹带解释性文字。这里按顺序尝试：
//! 1. ```json 代码块
//! 2. 任意 ``` 代码块
//! 3. 文本中第一个能完整解析的 `{...}` / `[...]` 片段

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// JSON提取失败
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseFailure {
    #[error("模型输出中没有找到JSON内容")]
    NotFound,

    #[error("JSON结构与期望类型不匹配: {0}")]
    Mismatch(String),
}

/// 提取第一个合法的JSON值
pub fn extract_json_value(text: &str) -> Result<Value, ParseFailure> {
    for candidate in fenced_blocks(text) {
        if let Ok(value) = serde_json::from_str::<Value>(candidate.trim()) {
            return Ok(value);
        }
        if let Some(value) = scan_balanced(candidate) {
            return Ok(value);
        }
    }

    scan_balanced(text).ok_or(ParseFailure::NotFound)
}

/// 提取JSON并反序列化为目标类型
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T, ParseFailure> {
    let value = extract_json_value(text)?;
    serde_json::from_value(value).map_err(|e| ParseFailure::Mismatch(e.to_string()))
}

/// 代码块内容，```json优先
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut tagged = Vec::new();
    let mut plain = Vec::new();

    let mut rest = text;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        let (lang, body_start) = match after.find('\n') {
            Some(pos) => (after[..pos].trim(), pos + 1),
            None => ("", 0),
        };
        let body = &after[body_start..];
        let Some(end) = body.find("```") else {
            break;
        };
        let block = &body[..end];
        if lang.eq_ignore_ascii_case("json") {
            tagged.push(block);
        } else {
            plain.push(block);
        }
        rest = &body[end + 3..];
    }

    tagged.extend(plain);
    tagged
}

/// 从每个左括号开始找配对的右括号，返回第一个能解析的片段
fn scan_balanced(text: &str) -> Option<Value> {
    for (start, ch) in text.char_indices() {
        if ch != '{' && ch != '[' {
            continue;
        }
        if let Some(end) = matching_close(&text[start..]) {
            let slice = &text[start..start + end];
            if let Ok(value) = serde_json::from_str::<Value>(slice) {
                return Some(value);
            }
        }
    }
    None
}

/// 返回与开头括号配对的结束位置（字节偏移，不含）
fn matching_close(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}
