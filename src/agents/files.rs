//! 文件生成（file-creator 使用）：只产出纯文本格式（CSV / Markdown / TXT）
//!
//! Excel 请求输出 CSV。文件内容以 base64 放入 AgentOutcome 的 data。

use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::store::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Markdown,
    Text,
}

impl FileFormat {
    /// 根据话语猜测格式；表格类请求一律为 CSV
    pub fn detect(utterance: &str) -> Self {
        let lower = utterance.to_lowercase();
        const TABLE_WORDS: &[&str] = &[
            "csv", "excel", "xlsx", "xls", "spreadsheet", "sheet", "tableur", "إكسل", "اكسل",
            "جدول",
        ];
        const MD_WORDS: &[&str] = &["markdown", ".md", " md "];
        if TABLE_WORDS.iter().any(|w| lower.contains(w)) {
            FileFormat::Csv
        } else if MD_WORDS.iter().any(|w| lower.contains(w)) {
            FileFormat::Markdown
        } else {
            FileFormat::Text
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Markdown => "md",
            FileFormat::Text => "txt",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FileFormat::Csv => "CSV (comma separated, header row first)",
            FileFormat::Markdown => "Markdown",
            FileFormat::Text => "plain text",
        }
    }
}

fn csv_field(value: &Value) -> String {
    let raw = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw
    }
}

/// 文档列表转 CSV；列为所有文档键的并集（按字母序），内部字段 `_id` 省略
pub fn documents_to_csv(docs: &[Document]) -> String {
    let columns: Vec<&str> = docs
        .iter()
        .flat_map(|d| d.keys().map(String::as_str))
        .filter(|k| *k != "_id")
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut lines = vec![columns.join(",")];
    for doc in docs {
        lines.push(
            columns
                .iter()
                .map(|c| doc.get(*c).map(csv_field).unwrap_or_default())
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    lines.join("\n") + "\n"
}

/// 去掉 LLM 偶尔包裹的 ``` 围栏
pub fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// 生成的文件
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedFile {
    pub file_name: String,
    pub content: String,
}

impl GeneratedFile {
    pub fn new(stem: &str, format: FileFormat, content: impl Into<String>) -> Self {
        Self {
            file_name: format!("{}.{}", stem, format.extension()),
            content: content.into(),
        }
    }

    /// AgentOutcome.data 的形状
    pub fn to_data(&self) -> Value {
        json!({
            "file_name": self.file_name,
            "file_content": STANDARD.encode(self.content.as_bytes()),
        })
    }
}
