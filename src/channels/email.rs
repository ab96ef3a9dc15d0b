//! 事务邮件发送（Brevo 兼容的 HTTP API）
//!
//! payload 首行以 `Subject:` 开头时作为邮件主题，其余为正文；否则使用默认主题。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::channels::{Channel, ChannelSender, SendOutcome};

const DEFAULT_SUBJECT: &str = "Message from your assistant";

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailRequest<'a> {
    sender: Address<'a>,
    to: Vec<Address<'a>>,
    subject: &'a str,
    text_content: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailResponse {
    message_id: Option<String>,
}

pub struct EmailSender {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    sender_address: String,
    sender_name: Option<String>,
}

/// 拆出主题与正文
pub fn split_subject(payload: &str) -> (&str, &str) {
    let trimmed = payload.trim_start();
    if let Some(rest) = trimmed.strip_prefix("Subject:") {
        let (subject, body) = rest.split_once('\n').unwrap_or((rest, ""));
        let subject = subject.trim();
        if !subject.is_empty() {
            return (subject, body.trim_start());
        }
    }
    (DEFAULT_SUBJECT, payload)
}

impl EmailSender {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        sender_address: impl Into<String>,
        sender_name: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            sender_address: sender_address.into(),
            sender_name,
        }
    }

    /// 从配置与环境变量 EMAIL_API_KEY 构造；缺少凭据或发件地址时返回 None
    pub fn from_config(section: &crate::config::EmailSection) -> Option<Self> {
        let api_key = std::env::var("EMAIL_API_KEY").ok()?;
        let sender = section.sender_address.clone()?;
        Some(Self::new(
            section.endpoint.clone(),
            api_key,
            sender,
            section.sender_name.clone(),
        ))
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, recipient: &str, payload: &str) -> SendOutcome {
        let (subject, body) = split_subject(payload);
        let req = SendEmailRequest {
            sender: Address {
                email: &self.sender_address,
                name: self.sender_name.as_deref(),
            },
            to: vec![Address {
                email: recipient,
                name: None,
            }],
            subject,
            text_content: body,
        };

        let resp = match self
            .client
            .post(&self.endpoint)
            .header("api-key", &self.api_key)
            .json(&req)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return SendOutcome::failed(e.to_string()),
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return SendOutcome::failed(format!("email API error {}: {}", status, text));
        }
        match resp.json::<SendEmailResponse>().await {
            Ok(body) => SendOutcome::sent(body.message_id),
            Err(_) => SendOutcome::sent(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_subject() {
        assert_eq!(
            split_subject("Subject: Summer sale\nHello Ali,\n20% off."),
            ("Summer sale", "Hello Ali,\n20% off.")
        );
        assert_eq!(split_subject("Just a body"), (DEFAULT_SUBJECT, "Just a body"));
    }

    #[test]
    fn test_request_shape() {
        let req = SendEmailRequest {
            sender: Address {
                email: "shop@x.io",
                name: Some("Shop"),
            },
            to: vec![Address {
                email: "ali@x.io",
                name: None,
            }],
            subject: "Hi",
            text_content: "Body",
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["textContent"], "Body");
        assert_eq!(json["to"][0]["email"], "ali@x.io");
        assert!(json["to"][0].get("name").is_none());
    }
}
