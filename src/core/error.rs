//! 错误类型
//!
//! HiveError 覆盖整条链路：Oracle 解析、缺失实体、未知任务完成、Agent 执行、越权查询、
//! 超时与基础设施故障。分类 / 拆解阶段的错误在本地降级为澄清回复，不会直接抛给调用方。

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;

#[derive(Error, Debug)]
pub enum HiveError {
    /// Oracle 输出不是合法 JSON，也找不到可解析的 JSON 片段
    #[error("Oracle output could not be parsed: {0}")]
    OracleParse(String),

    /// 意图所需字段缺失（如新增客户缺少姓名与联系方式）
    #[error("Missing required entities: {}", fields.join(", "))]
    MissingRequiredEntity { fields: Vec<String> },

    /// 完成信号引用了不在执行中的任务
    #[error("Unknown task completion: {0}")]
    UnknownTaskCompletion(String),

    #[error("Agent {agent} failed: {reason}")]
    AgentExecution { agent: String, reason: String },

    /// 查询或删除缺少所属用户过滤条件
    #[error("Scope violation: {0}")]
    ScopeViolation(String),

    /// 拆解结果引用了词表外的 Agent
    #[error("Unsupported agent: {0}")]
    UnsupportedAgent(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl HiveError {
    /// 基础设施类错误：调用方应稍后重试
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            HiveError::Llm(_) | HiveError::Storage(_) | HiveError::Timeout { .. }
        )
    }

    /// 面向终端用户的提示（不暴露内部细节）
    pub fn user_message(&self) -> String {
        if self.is_infrastructure() {
            "The service is temporarily unavailable. Please try again in a moment.".to_string()
        } else {
            self.to_string()
        }
    }
}

/// 给外部调用加上时限；超时转为 HiveError::Timeout
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T, HiveError>
where
    F: Future<Output = Result<T, HiveError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(HiveError::Timeout {
            operation: operation.to_string(),
            secs: limit.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_entity_message_lists_fields() {
        let err = HiveError::MissingRequiredEntity {
            fields: vec!["name".into(), "email".into()],
        };
        assert_eq!(err.to_string(), "Missing required entities: name, email");
        assert!(!err.is_infrastructure());
    }

    #[test]
    fn test_infrastructure_errors_hide_details() {
        let err = HiveError::Llm(LlmError::Network("connection refused".into()));
        assert!(err.is_infrastructure());
        assert!(!err.user_message().contains("refused"));
    }

    #[tokio::test]
    async fn test_with_timeout_maps_elapsed() {
        let result: Result<(), HiveError> = with_timeout("store read", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        match result {
            Err(HiveError::Timeout { operation, .. }) => assert_eq!(operation, "store read"),
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
