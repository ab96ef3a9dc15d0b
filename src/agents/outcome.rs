//! Agent 执行边界：请求、统一结果类型与执行器 trait
//!
//! 所有 Agent 的输出在边界处归一为 AgentOutcome，编排层不再区分「字符串还是对象」。

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::agents::AgentId;
use crate::core::HiveError;
use crate::intent::Language;
use crate::routing::Subtask;

/// Agent 执行结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentOutcome {
    Success {
        output: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    /// 执行成功但没有产出（如查询无结果）
    Empty,
    Error {
        reason: String,
    },
}

impl AgentOutcome {
    pub fn text(output: impl Into<String>) -> Self {
        AgentOutcome::Success {
            output: output.into(),
            data: None,
        }
    }

    pub fn with_data(output: impl Into<String>, data: Value) -> Self {
        AgentOutcome::Success {
            output: output.into(),
            data: Some(data),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        AgentOutcome::Error {
            reason: reason.into(),
        }
    }

    /// 非空文本为 Success，空文本为 Empty
    pub fn from_text(output: String) -> Self {
        if output.trim().is_empty() {
            AgentOutcome::Empty
        } else {
            AgentOutcome::text(output.trim().to_string())
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, AgentOutcome::Error { .. })
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            AgentOutcome::Success { output, .. } => Some(output),
            _ => None,
        }
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            AgentOutcome::Success { data, .. } => data.as_ref(),
            _ => None,
        }
    }
}

/// 前序步骤的产出（顺序模式下传给后续步骤）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutput {
    pub agent: AgentId,
    pub output: String,
    pub data: Option<Value>,
}

/// 一次 Agent 调用的完整输入（拥有所有权，可移入后台任务）
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub user_id: String,
    pub utterance: String,
    pub subtask: Subtask,
    pub language: Language,
    pub entities: Map<String, Value>,
    pub context_references: Map<String, Value>,
    pub previous: Vec<StepOutput>,
}

impl AgentRequest {
    /// 最近一个由指定 Agent 产出的文本
    pub fn latest_output_from(&self, agents: &[AgentId]) -> Option<&StepOutput> {
        self.previous.iter().rev().find(|s| agents.contains(&s.agent))
    }

    /// 待发送的正文：润色结果优先，其次是内容创作结果
    pub fn drafted_content(&self) -> Option<&str> {
        self.latest_output_from(&[AgentId::KnowledgeEnhancer])
            .or_else(|| self.latest_output_from(&[AgentId::Content]))
            .map(|s| s.output.as_str())
    }

    pub fn previous_summary(&self) -> String {
        if self.previous.is_empty() {
            return "(none)".to_string();
        }
        self.previous
            .iter()
            .map(|s| format!("[{}]\n{}", s.agent, s.output))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Err 仅用于基础设施故障（Oracle / 存储不可达）；业务失败返回 AgentOutcome::Error
    async fn execute(&self, agent: AgentId, request: &AgentRequest) -> Result<AgentOutcome, HiveError>;
}
