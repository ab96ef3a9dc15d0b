//! 不真正外发的渠道：记录每次发送，用于本地运行与测试

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::channels::{Channel, ChannelSender, SendOutcome};

pub struct DryRunSender {
    channel: Channel,
    sent: Mutex<Vec<(String, String)>>,
    failing: HashSet<String>,
}

impl DryRunSender {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            sent: Mutex::new(Vec::new()),
            failing: HashSet::new(),
        }
    }

    /// 对指定收件人模拟发送失败
    pub fn failing_for(mut self, recipient: impl Into<String>) -> Self {
        self.failing.insert(recipient.into());
        self
    }

    /// 已「发送」的 (收件人, 内容)
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ChannelSender for DryRunSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, recipient: &str, payload: &str) -> SendOutcome {
        if self.failing.contains(recipient) {
            return SendOutcome::failed(format!("{} rejected by dry-run", recipient));
        }
        let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        sent.push((recipient.to_string(), payload.to_string()));
        tracing::info!(channel = %self.channel, recipient, "dry-run send");
        SendOutcome::sent(Some(format!("dry-run-{}", sent.len())))
    }
}
