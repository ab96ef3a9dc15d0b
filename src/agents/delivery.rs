//! 投递类 Agent（email-sender / whatsapp-sender / caller）
//!
//! 收件人来源依次为：前序步骤 data 中的 recipients、话语中的显式联系方式、实体。
//! 正文为最近一次润色 / 创作的输出，没有时使用原话语。部分失败不算成功。

use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::{json, Value};

use crate::agents::{AgentId, AgentOutcome, AgentRequest};
use crate::channels::{Channel, ChannelSender};
use crate::core::{with_timeout, HiveError};
use crate::intent::extract_contacts;

const ENTITY_KEYS: &[&str] = &["recipients", "recipient", "email", "emails", "phone", "phones", "email_or_phone", "to"];

pub fn channel_for(agent: AgentId) -> Option<Channel> {
    match agent {
        AgentId::EmailSender => Some(Channel::Email),
        AgentId::WhatsappSender => Some(Channel::WhatsApp),
        AgentId::Caller => Some(Channel::Call),
        _ => None,
    }
}

fn is_email(s: &str) -> bool {
    s.contains('@')
}

fn push_value(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(
            s.split([',', ';', '،'])
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        ),
        Value::Array(items) => items.iter().for_each(|v| push_value(v, out)),
        Value::Object(obj) => {
            for key in ["email", "phone", "whatsapp", "mobile"] {
                if let Some(v) = obj.get(key) {
                    push_value(v, out);
                }
            }
        }
        _ => {}
    }
}

/// 汇总所有候选联系方式（保持首次出现顺序、去重）
pub fn gather_contacts(request: &AgentRequest) -> Vec<String> {
    let mut raw = Vec::new();
    for step in &request.previous {
        if let Some(recipients) = step.data.as_ref().and_then(|d| d.get("recipients")) {
            push_value(recipients, &mut raw);
        }
    }
    raw.extend(extract_contacts(&request.utterance));
    for key in ENTITY_KEYS {
        if let Some(v) = request.entities.get(*key) {
            push_value(v, &mut raw);
        }
    }

    let mut seen = BTreeSet::new();
    raw.into_iter()
        .filter(|c| seen.insert(c.to_lowercase()))
        .collect()
}

/// 按渠道筛选：邮件取邮箱，其余取电话
pub fn contacts_for_channel(contacts: &[String], channel: Channel) -> Vec<String> {
    contacts
        .iter()
        .filter(|c| match channel {
            Channel::Email => is_email(c),
            Channel::WhatsApp | Channel::Call => {
                !is_email(c) && c.chars().filter(char::is_ascii_digit).count() >= 7
            }
        })
        .cloned()
        .collect()
}

pub async fn deliver(
    sender: &dyn ChannelSender,
    request: &AgentRequest,
    send_timeout: Duration,
) -> Result<AgentOutcome, HiveError> {
    let channel = sender.channel();
    let recipients = contacts_for_channel(&gather_contacts(request), channel);
    if recipients.is_empty() {
        return Ok(AgentOutcome::error(format!("no {} recipients to send to", channel)));
    }
    let payload = request
        .drafted_content()
        .unwrap_or(request.utterance.as_str())
        .to_string();

    let outcome = with_timeout(
        &format!("{} send", channel),
        send_timeout,
        sender.send_bulk(&recipients, std::slice::from_ref(&payload)),
    )
    .await?;

    tracing::info!(
        channel = %channel,
        sent = outcome.sent_count,
        failed = outcome.failed_count,
        "bulk send finished"
    );
    let data = json!({
        "channel": channel,
        "sent_count": outcome.sent_count,
        "failed_count": outcome.failed_count,
        "per_recipient": outcome.per_recipient,
    });
    if outcome.failed_count == 0 {
        Ok(AgentOutcome::with_data(
            format!("Sent via {} to {} recipient(s)", channel, outcome.sent_count),
            data,
        ))
    } else {
        let failed: Vec<&str> = outcome
            .per_recipient
            .iter()
            .filter(|r| !r.outcome.success)
            .map(|r| r.recipient.as_str())
            .collect();
        Ok(AgentOutcome::error(format!(
            "{} of {} {} deliveries failed: {}",
            outcome.failed_count,
            recipients.len(),
            channel,
            failed.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::StepOutput;
    use crate::channels::DryRunSender;
    use crate::intent::Language;
    use crate::routing::Subtask;
    use serde_json::Map;

    fn request(utterance: &str, previous: Vec<StepOutput>) -> AgentRequest {
        AgentRequest {
            user_id: "a@x.io".into(),
            utterance: utterance.into(),
            subtask: Subtask::new("send", AgentId::EmailSender),
            language: Language::En,
            entities: Map::new(),
            context_references: Map::new(),
            previous,
        }
    }

    fn resolved_step() -> StepOutput {
        StepOutput {
            agent: AgentId::Database,
            output: "Found 2".into(),
            data: Some(json!({"recipients": [
                {"name": "Ali", "email": "ali@c.io"},
                {"name": "Sara", "phone": "+971 50 000 0001"}
            ]})),
        }
    }

    #[test]
    fn test_contacts_split_by_channel() {
        let req = request("also copy boss@c.io", vec![resolved_step()]);
        let all = gather_contacts(&req);
        assert_eq!(contacts_for_channel(&all, Channel::Email), vec!["ali@c.io", "boss@c.io"]);
        assert_eq!(contacts_for_channel(&all, Channel::WhatsApp), vec!["+971 50 000 0001"]);
    }

    #[tokio::test]
    async fn test_sends_latest_polished_content() {
        let sender = DryRunSender::new(Channel::Email);
        let mut previous = vec![resolved_step()];
        previous.push(StepOutput { agent: AgentId::Content, output: "draft".into(), data: None });
        previous.push(StepOutput { agent: AgentId::KnowledgeEnhancer, output: "polished".into(), data: None });

        let outcome = deliver(&sender, &request("send it", previous), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(sender.sent(), vec![("ali@c.io".to_string(), "polished".to_string())]);
    }

    #[tokio::test]
    async fn test_partial_failure_is_not_success() {
        let sender = DryRunSender::new(Channel::Email).failing_for("boss@c.io");
        let req = request("send to ali@c.io and boss@c.io", vec![]);
        let outcome = deliver(&sender, &req, Duration::from_secs(5)).await.unwrap();
        match outcome {
            AgentOutcome::Error { reason } => assert!(reason.contains("boss@c.io")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_recipients_is_error_without_sending() {
        let sender = DryRunSender::new(Channel::WhatsApp);
        let outcome = deliver(&sender, &request("send it", vec![]), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!outcome.is_success());
        assert!(sender.sent().is_empty());
    }
}
