//! 记忆层：对话消息类型、有界对话日志、按用户隔离的上下文存储

pub mod context_store;
pub mod conversation;
#[cfg(feature = "async-sqlite")]
pub mod sqlite_store;

pub use context_store::{ContextStore, InMemoryContextStore};
pub use conversation::{render_context, ConversationMemory, ConversationTurn, Message, Role};
#[cfg(feature = "async-sqlite")]
pub use sqlite_store::SqliteContextStore;
