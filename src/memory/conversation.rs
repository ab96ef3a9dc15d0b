//! 短期记忆：对话历史
//!
//! 每个用户保留最近 N 条对话（ConversationTurn），超出时按 FIFO 丢弃最旧的条目，
//! 供意图识别解析「发给他们」这类指代。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 发给 Oracle 的单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 一轮对话记录（user 或 assistant）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// 将对话序列化为 prompt 片段（每行 `role: content`）
pub fn render_context(turns: &[ConversationTurn]) -> String {
    if turns.is_empty() {
        return "(no previous conversation)".to_string();
    }
    turns
        .iter()
        .map(|t| {
            let role = match t.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
            };
            format!("{}: {}", role, t.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 有界对话日志：push 后裁剪到最近 max_turns 条
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    turns: Vec<ConversationTurn>,
    max_turns: usize,
}

impl ConversationMemory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns: max_turns.max(1),
        }
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
        self.prune();
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// 最近 limit 条，按时间从旧到新；limit 超过已有数量时返回全部
    pub fn recent(&self, limit: usize) -> &[ConversationTurn] {
        &self.turns[self.turns.len().saturating_sub(limit)..]
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    fn prune(&mut self) {
        if self.turns.len() > self.max_turns {
            let excess = self.turns.len() - self.max_turns;
            self.turns.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
