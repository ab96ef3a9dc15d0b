//! Mock LLM 客户端（用于测试与本地调试，无需 API）
//!
//! 按顺序返回预置回复（scripted）；预置回复耗尽后回显最后一条 User 消息，
//! 以 simple 类型的 JSON 返回，便于本地跑通整条链路。会记录每次收到的 prompt 供测试断言。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{CompletionOptions, LlmClient, LlmError};
use crate::memory::{Message, Role};

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<Vec<Message>>>,
    delay: Option<Duration>,
}

impl MockLlmClient {
    /// 按顺序返回给定回复
    pub fn scripted(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        }
    }

    /// 便捷构造：全部为成功回复
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::scripted(replies.into_iter().map(|r| Ok(r.into())).collect())
    }

    /// 每次调用前等待，用于超时测试
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 追加一条回复
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(reply.into()));
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 第 n 次调用收到的 system prompt
    pub fn system_prompt(&self, call: usize) -> Option<String> {
        let prompts = self.prompts.lock().unwrap_or_else(|e| e.into_inner());
        prompts.get(call).and_then(|messages| {
            messages
                .iter()
                .find(|m| m.role == Role::System)
                .map(|m| m.content.clone())
        })
    }

    /// 第 n 次调用收到的最后一条 user prompt
    pub fn user_prompt(&self, call: usize) -> Option<String> {
        let prompts = self.prompts.lock().unwrap_or_else(|e| e.into_inner());
        prompts.get(call).and_then(|messages| {
            messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
        })
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        _options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        if let Some(reply) = scripted {
            return reply;
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(serde_json::json!({
            "intent": "inquiry",
            "response_type": "simple",
            "confidence": 0.5,
            "direct_response": format!("Echo from Mock: {}", last_user),
        })
        .to_string())
    }
}
