//! 网页抓取（web-analyser 使用）
//!
//! HTML 响应用 html2text 转为可读文本，失败时回退为简单去标签；超长内容按字符截断。

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

const USER_AGENT: &str = "hive-web-analyser/0.1";

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"'）)]+"#).expect("static url pattern"))
}

/// 话语中出现的第一个 URL（去掉句尾标点）
pub fn find_url(text: &str) -> Option<String> {
    url_re().find(text).map(|m| {
        m.as_str()
            .trim_end_matches(['.', ',', ';', '!', '?', '،', '؟'])
            .to_string()
    })
}

/// html2text 失败时的回退
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    let head: String = s.chars().take(512).collect::<String>().to_lowercase();
    head.starts_with("<!") || head.starts_with("<html")
        || (head.contains('<') && (head.contains("</") || head.contains("<head") || head.contains("<title")))
}

/// 可读文本；非 HTML 原样返回
pub fn readable_text(body: &str) -> String {
    let body = body.trim_start_matches('\u{FEFF}');
    if !looks_like_html(body) {
        return body.to_string();
    }
    match html2text::from_read(body.as_bytes(), 120) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => strip_html_tags(body),
    }
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    }
}

/// 简单的页面抓取器
#[derive(Clone)]
pub struct WebFetcher {
    client: reqwest::Client,
    max_chars: usize,
}

impl WebFetcher {
    pub fn new(timeout: Duration, max_chars: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, max_chars }
    }

    pub async fn fetch(&self, url: &str) -> Result<String, String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| format!("read body: {}", e))?;
        Ok(truncate_chars(&readable_text(&body), self.max_chars))
    }
}

impl Default for WebFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(20), 8000)
    }
}
