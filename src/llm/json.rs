//! Oracle 输出解析
//!
//! LLM 不保证返回合法 JSON：先整体解析，再去掉 ```json 围栏，最后在文本中寻找括号配对的
//! `{...}` 片段，取能解析成功的最长者。结果用 OracleOutcome 标记，调用方必须处理 ParseError 分支。

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Oracle 边界的标记结果
#[derive(Debug, Clone, PartialEq)]
pub enum OracleOutcome<T> {
    Parsed(T),
    /// 原始文本，用于日志与降级
    ParseError(String),
}

impl<T> OracleOutcome<T> {
    pub fn is_parsed(&self) -> bool {
        matches!(self, OracleOutcome::Parsed(_))
    }
}

/// 从原始文本中提取 JSON 对象
pub fn extract_json_object(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(fenced) = strip_code_fence(trimmed) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(fenced) {
            return Some(value);
        }
    }

    let mut islands = brace_islands(trimmed);
    islands.sort_by(|a, b| b.len().cmp(&a.len()));
    islands
        .into_iter()
        .find_map(|island| match serde_json::from_str::<Value>(island) {
            Ok(value @ Value::Object(_)) => Some(value),
            _ => None,
        })
}

/// 提取并反序列化为 T
pub fn parse_oracle<T: DeserializeOwned>(raw: &str) -> OracleOutcome<T> {
    match extract_json_object(raw).map(serde_json::from_value::<T>) {
        Some(Ok(parsed)) => OracleOutcome::Parsed(parsed),
        Some(Err(e)) => {
            tracing::debug!(error = %e, "oracle JSON did not match expected shape");
            OracleOutcome::ParseError(raw.to_string())
        }
        None => OracleOutcome::ParseError(raw.to_string()),
    }
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let rest = &text[start + 3..];
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

/// 找出所有顶层括号配对片段；字符串内部的括号与转义字符不参与计数
fn brace_islands(text: &str) -> Vec<&str> {
    let mut islands = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        islands.push(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    islands
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        let v = extract_json_object(r#"{"intent": "send"}"#).unwrap();
        assert_eq!(v["intent"], "send");
    }

    #[test]
    fn test_fenced_json() {
        let raw = "Here you go:\n```json\n{\"intent\": \"read\"}\n```\nthanks";
        let v = extract_json_object(raw).unwrap();
        assert_eq!(v["intent"], "read");
    }

    #[test]
    fn test_largest_island_wins() {
        let raw = r#"note {"a": 1} and the answer {"intent": "create", "entities": {"name": "x"}} end"#;
        let v = extract_json_object(raw).unwrap();
        assert_eq!(v["intent"], "create");
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let raw = r#"prefix {"text": "use } and { freely", "ok": true} suffix"#;
        let v = extract_json_object(raw).unwrap();
        assert_eq!(v["ok"], true);
    }

    #[test]
    fn test_unparseable_returns_none() {
        assert!(extract_json_object("I cannot help with that").is_none());
        assert!(extract_json_object("{not: json}").is_none());
    }

    #[test]
    fn test_parse_oracle_tags_failures() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Sample {
            value: u32,
        }
        assert_eq!(
            parse_oracle::<Sample>(r#"{"value": 3}"#),
            OracleOutcome::Parsed(Sample { value: 3 })
        );
        assert!(!parse_oracle::<Sample>("nope").is_parsed());
        assert!(!parse_oracle::<Sample>(r#"{"value": "three"}"#).is_parsed());
    }
}
