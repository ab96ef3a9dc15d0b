//! WhatsApp Cloud API 发送
//!
//! 单条消息上限 4096 字符，超长内容按字符分段依次发送；provider_ref 取最后一段的消息 id。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::channels::{Channel, ChannelSender, SendOutcome};

const MAX_CHUNK_CHARS: usize = 4000;

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    messaging_product: &'a str,
    to: String,
    #[serde(rename = "type")]
    msg_type: &'a str,
    text: SendMessageText,
}

#[derive(Debug, Serialize)]
struct SendMessageText {
    body: String,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

pub struct WhatsAppSender {
    client: reqwest::Client,
    api_base: String,
    phone_number_id: String,
    access_token: String,
}

/// 按字符切分（不会截断多字节字符）
pub fn chunk_message(body: &str, max_chars: usize) -> Vec<String> {
    if body.chars().count() <= max_chars {
        return vec![body.to_string()];
    }
    body.chars()
        .collect::<Vec<_>>()
        .chunks(max_chars)
        .map(|c| c.iter().collect())
        .collect()
}

/// 号码只保留数字（Cloud API 不接受 + 与空格）
pub fn normalize_phone(to: &str) -> String {
    to.chars().filter(|c| c.is_ascii_digit()).collect()
}

impl WhatsAppSender {
    pub fn new(
        api_base: impl Into<String>,
        phone_number_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            phone_number_id: phone_number_id.into(),
            access_token: access_token.into(),
        }
    }

    /// 从配置与环境变量 WHATSAPP_ACCESS_TOKEN 构造；缺少凭据时返回 None
    pub fn from_config(section: &crate::config::WhatsAppSection) -> Option<Self> {
        let phone_number_id = section
            .phone_number_id
            .clone()
            .or_else(|| std::env::var("WHATSAPP_PHONE_NUMBER_ID").ok())?;
        let token = std::env::var("WHATSAPP_ACCESS_TOKEN").ok()?;
        Some(Self::new(section.api_base.clone(), phone_number_id, token))
    }

    async fn send_chunk(&self, to: &str, chunk: String) -> Result<Option<String>, String> {
        let url = format!("{}/{}/messages", self.api_base, self.phone_number_id);
        let req = SendMessageRequest {
            messaging_product: "whatsapp",
            to: normalize_phone(to),
            msg_type: "text",
            text: SendMessageText { body: chunk },
        };
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&req)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("WhatsApp API error {}: {}", status, text));
        }
        let body: SendMessageResponse = resp.json().await.map_err(|e| e.to_string())?;
        Ok(body.messages.into_iter().next().map(|m| m.id))
    }
}

#[async_trait]
impl ChannelSender for WhatsAppSender {
    fn channel(&self) -> Channel {
        Channel::WhatsApp
    }

    async fn send(&self, recipient: &str, payload: &str) -> SendOutcome {
        let mut provider_ref = None;
        for chunk in chunk_message(payload, MAX_CHUNK_CHARS) {
            match self.send_chunk(recipient, chunk).await {
                Ok(id) => provider_ref = id.or(provider_ref),
                Err(e) => return SendOutcome::failed(e),
            }
        }
        SendOutcome::sent(provider_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunking_respects_char_boundaries() {
        let body = "مرحبا".repeat(2000);
        let chunks = chunk_message(&body, MAX_CHUNK_CHARS);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), body);
        assert!(chunks.iter().all(|c| c.chars().count() <= MAX_CHUNK_CHARS));
    }

    #[test]
    fn test_phone_normalization() {
        assert_eq!(normalize_phone("+971 50-123 4567"), "971501234567");
    }
}
