//! SQLite 对话存储（需要启用 `async-sqlite` feature）
//!
//! 使用 sqlx 异步访问；append 在事务内插入并删除超出上限的旧记录，
//! 同一用户的写入通过用户级互斥锁串行化。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::Mutex;

use crate::core::HiveError;
use crate::memory::{ContextStore, ConversationTurn, Role};

pub struct SqliteContextStore {
    pool: SqlitePool,
    max_turns: usize,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

fn storage_err(e: sqlx::Error) -> HiveError {
    HiveError::Storage(e.to_string())
}

impl SqliteContextStore {
    pub async fn new(db_path: impl AsRef<Path>, max_turns: usize) -> Result<Self, HiveError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS context_turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_context_user ON context_turns(user_id, id)")
            .execute(&pool)
            .await
            .map_err(storage_err)?;

        Ok(Self {
            pool,
            max_turns: max_turns.max(1),
            user_locks: Mutex::new(HashMap::new()),
        })
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        Arc::clone(locks.entry(user_id.to_string()).or_default())
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

fn role_from_str(s: &str) -> Role {
    match s {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        _ => Role::System,
    }
}

#[async_trait]
impl ContextStore for SqliteContextStore {
    async fn append(&self, user_id: &str, role: Role, content: &str) -> Result<(), HiveError> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;

        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        sqlx::query(
            "INSERT INTO context_turns (user_id, role, content, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(role_to_str(role))
        .bind(content)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "DELETE FROM context_turns WHERE user_id = ? AND id NOT IN (
                SELECT id FROM context_turns WHERE user_id = ? ORDER BY id DESC LIMIT ?
            )",
        )
        .bind(user_id)
        .bind(user_id)
        .bind(self.max_turns as i64)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)
    }

    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationTurn>, HiveError> {
        let rows = sqlx::query(
            "SELECT role, content, created_at FROM (
                SELECT id, role, content, created_at FROM context_turns
                WHERE user_id = ? ORDER BY id DESC LIMIT ?
             ) ORDER BY id ASC",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let created: String = row.get("created_at");
                ConversationTurn {
                    role: role_from_str(row.get::<String, _>("role").as_str()),
                    content: row.get("content"),
                    timestamp: chrono::DateTime::parse_from_rfc3339(&created)
                        .map(|t| t.with_timezone(&chrono::Utc))
                        .unwrap_or_else(|_| chrono::Utc::now()),
                }
            })
            .collect())
    }
}
