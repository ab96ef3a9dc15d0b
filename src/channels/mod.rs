//! 外发渠道：邮件 / WhatsApp / 电话
//!
//! 每个渠道实现 ChannelSender：单发返回 SendOutcome（失败不抛错，写入 error），
//! 批量发送要求 payload 数量为 1（所有人同一内容）或与收件人数量相同，否则直接拒绝、不发送任何消息。

pub mod dry_run;
pub mod email;
pub mod whatsapp;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::HiveError;

pub use dry_run::DryRunSender;
pub use email::EmailSender;
pub use whatsapp::WhatsAppSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    WhatsApp,
    Call,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Channel::Email => "email",
            Channel::WhatsApp => "whatsapp",
            Channel::Call => "call",
        })
    }
}

/// 单次发送结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub success: bool,
    pub provider_ref: Option<String>,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn sent(provider_ref: Option<String>) -> Self {
        Self {
            success: true,
            provider_ref,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_ref: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipientResult {
    pub recipient: String,
    #[serde(flatten)]
    pub outcome: SendOutcome,
}

/// 批量发送结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkSendOutcome {
    pub sent_count: usize,
    pub failed_count: usize,
    pub per_recipient: Vec<RecipientResult>,
}

impl BulkSendOutcome {
    pub fn all_failed(&self) -> bool {
        self.sent_count == 0 && self.failed_count > 0
    }
}

/// 检查批量发送的 payload 数量约束
pub fn check_bulk_shape(recipients: &[String], payloads: &[String]) -> Result<(), HiveError> {
    if payloads.len() == 1 || payloads.len() == recipients.len() {
        Ok(())
    } else {
        Err(HiveError::Channel(format!(
            "payload count {} does not match recipient count {} (expected 1 or {})",
            payloads.len(),
            recipients.len(),
            recipients.len()
        )))
    }
}

#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, recipient: &str, payload: &str) -> SendOutcome;

    /// 逐个发送；单条失败不影响其他收件人
    async fn send_bulk(
        &self,
        recipients: &[String],
        payloads: &[String],
    ) -> Result<BulkSendOutcome, HiveError> {
        check_bulk_shape(recipients, payloads)?;
        let mut result = BulkSendOutcome::default();
        for (i, recipient) in recipients.iter().enumerate() {
            let payload = if payloads.len() == 1 {
                &payloads[0]
            } else {
                &payloads[i]
            };
            let outcome = self.send(recipient, payload).await;
            if outcome.success {
                result.sent_count += 1;
            } else {
                tracing::warn!(
                    channel = %self.channel(),
                    recipient = %recipient,
                    error = ?outcome.error,
                    "send failed"
                );
                result.failed_count += 1;
            }
            result.per_recipient.push(RecipientResult {
                recipient: recipient.clone(),
                outcome,
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_bulk_shape_is_enforced_before_sending() {
        let sender = DryRunSender::new(Channel::Email);
        let result = sender
            .send_bulk(&strings(&["a@x.io", "b@x.io", "c@x.io"]), &strings(&["p1", "p2"]))
            .await;
        assert!(matches!(result, Err(HiveError::Channel(_))));
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn test_single_payload_broadcasts() {
        let sender = DryRunSender::new(Channel::WhatsApp);
        let result = sender
            .send_bulk(&strings(&["+1000000001", "+1000000002"]), &strings(&["hello"]))
            .await
            .unwrap();
        assert_eq!(result.sent_count, 2);
        assert!(sender.sent().iter().all(|(_, p)| p == "hello"));
    }

    #[tokio::test]
    async fn test_per_recipient_payloads_and_failures() {
        let sender = DryRunSender::new(Channel::Email).failing_for("bad@x.io");
        let result = sender
            .send_bulk(&strings(&["a@x.io", "bad@x.io"]), &strings(&["hi a", "hi bad"]))
            .await
            .unwrap();
        assert_eq!((result.sent_count, result.failed_count), (1, 1));
        assert_eq!(sender.sent(), vec![("a@x.io".to_string(), "hi a".to_string())]);
        assert!(!result.per_recipient[1].outcome.success);
    }
}
