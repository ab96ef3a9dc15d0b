//! Hive - 多智能体业务助理的意图理解与 Agent 路由核心
//!
//! 模块划分：
//! - **agents**: Agent 能力表、执行结果与默认运行时（内容、数据库、发送、文件等）
//! - **channels**: 外发渠道（邮件 / WhatsApp / 电话）与批量发送约束
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、请求状态机、编排器、组件装配与优雅关闭
//! - **intent**: 语言检测、意图分类与必填实体校验
//! - **knowledge**: 按命名空间隔离的知识检索
//! - **llm**: Oracle 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 对话上下文与按用户隔离的上下文存储
//! - **observability**: 日志初始化
//! - **routing**: 任务拆解、Agent 选择与表现统计
//! - **server**: HTTP 入口（`server` feature）
//! - **store**: 按用户隔离的收件人 / 客户记录存储

pub mod agents;
pub mod channels;
pub mod config;
pub mod core;
pub mod intent;
pub mod knowledge;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod routing;
#[cfg(feature = "server")]
pub mod server;
pub mod store;

pub use crate::core::{HiveBuilder, HiveComponents, Orchestrator, Response, RunRequest};
