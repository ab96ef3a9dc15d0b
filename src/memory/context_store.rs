//! ContextStore：按用户隔离的有界对话日志
//!
//! append 为「先写入再裁剪到最近 N 条」，同一用户的 append 按提交顺序串行执行；
//! 不同用户之间互不可见、互不阻塞。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::core::HiveError;
use crate::memory::{ConversationMemory, ConversationTurn, Role};

/// 对话上下文存储接口
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// 追加一条对话并裁剪到上限
    async fn append(&self, user_id: &str, role: Role, content: &str) -> Result<(), HiveError>;

    /// 最近 limit 条，按时间从旧到新
    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationTurn>, HiveError>;
}

/// 内存实现：user_id -> 独立加锁的 ConversationMemory
pub struct InMemoryContextStore {
    users: RwLock<HashMap<String, Arc<Mutex<ConversationMemory>>>>,
    max_turns: usize,
}

impl InMemoryContextStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            max_turns,
        }
    }

    async fn slot(&self, user_id: &str) -> Arc<Mutex<ConversationMemory>> {
        if let Some(slot) = self.users.read().await.get(user_id) {
            return Arc::clone(slot);
        }
        let mut users = self.users.write().await;
        Arc::clone(
            users
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(ConversationMemory::new(self.max_turns)))),
        )
    }
}

impl Default for InMemoryContextStore {
    fn default() -> Self {
        Self::new(20)
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn append(&self, user_id: &str, role: Role, content: &str) -> Result<(), HiveError> {
        let slot = self.slot(user_id).await;
        slot.lock().await.push(ConversationTurn::new(role, content));
        Ok(())
    }

    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationTurn>, HiveError> {
        let slot = match self.users.read().await.get(user_id) {
            Some(slot) => Arc::clone(slot),
            None => return Ok(Vec::new()),
        };
        let memory = slot.lock().await;
        Ok(memory.recent(limit).to_vec())
    }
}
