//! RoutingPlanner：纯规划，不做任何外部调用
//!
//! 候选 Agent 先按关键词亲和度与语言兼容性筛选，再按 PerformanceTracker 的分数取最高；
//! 平局取候选中靠前者（能力表声明顺序）。没有候选时退回到全局表现最好的 Agent。
//! 计划中的每一步也经同样的打分：拆解给出的 Agent 排在候选首位，
//! 与之同类、关键词命中的 Agent 作为替代；投递渠道只在语言不支持时才会被替换。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::agents::{AgentId, CapabilityTable};
use crate::intent::{detect_language, CoordinationType, Understanding};
use crate::routing::decomposer::{Subtask, SubtaskKind};
use crate::routing::performance::PerformanceTracker;

/// 路由输入：一次 Understanding 或一条原始任务描述
#[derive(Debug, Clone, Copy)]
pub enum RoutingInput<'a> {
    Understanding(&'a Understanding),
    Task(&'a str),
    /// 拆解出的一步，带请求语言代码
    Step {
        subtask: &'a Subtask,
        language: &'a str,
    },
}

/// 计划中的一步
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedStep {
    pub index: usize,
    pub agent: AgentId,
    pub subtask: Subtask,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub coordination: CoordinationType,
    pub steps: Vec<PlannedStep>,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

pub struct RoutingPlanner {
    capabilities: Arc<CapabilityTable>,
    tracker: Arc<PerformanceTracker>,
}

impl RoutingPlanner {
    pub fn new(capabilities: Arc<CapabilityTable>, tracker: Arc<PerformanceTracker>) -> Self {
        Self {
            capabilities,
            tracker,
        }
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    /// 候选中分数最高者；平局保留靠前的候选
    fn best_of(&self, candidates: &[AgentId], now: DateTime<Utc>) -> Option<AgentId> {
        let mut best: Option<(AgentId, f64)> = None;
        for (agent, score) in self.tracker.scores_at(candidates, now) {
            tracing::debug!(agent = %agent, score, "routing score");
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((agent, score));
            }
        }
        best.map(|(agent, _)| agent)
    }

    /// 全局表现最好的 Agent
    fn best_overall(&self, now: DateTime<Utc>) -> AgentId {
        self.best_of(&AgentId::ALL, now).unwrap_or(AgentId::Content)
    }

    fn supports(&self, agent: AgentId, language: &str) -> bool {
        self.capabilities
            .get(agent)
            .map_or(true, |p| p.supports_language(language))
    }

    fn step_candidates(&self, subtask: &Subtask, language: &str) -> Vec<AgentId> {
        let named = subtask.responsible_agent;
        let mut candidates = Vec::new();
        if self.supports(named, language) {
            candidates.push(named);
            if subtask.kind == SubtaskKind::Delivery {
                return candidates;
            }
        }
        for alt in self.capabilities.candidates(&subtask.action, Some(language)) {
            if alt != named
                && !candidates.contains(&alt)
                && Subtask::new(subtask.action.as_str(), alt).kind == subtask.kind
            {
                candidates.push(alt);
            }
        }
        candidates
    }

    fn candidates(&self, input: RoutingInput<'_>) -> Vec<AgentId> {
        match input {
            RoutingInput::Understanding(u) => {
                let language = u.language().code();
                let selected: Vec<AgentId> = u
                    .selected_agents()
                    .iter()
                    .copied()
                    .filter(|a| self.supports(*a, language))
                    .collect();
                if !selected.is_empty() {
                    return selected;
                }
                self.capabilities.candidates(u.raw_input(), Some(language))
            }
            RoutingInput::Task(text) => {
                let language = detect_language(text);
                self.capabilities.candidates(text, Some(language.code()))
            }
            RoutingInput::Step { subtask, language } => self.step_candidates(subtask, language),
        }
    }

    pub fn select_agent(&self, input: RoutingInput<'_>) -> AgentId {
        self.select_agent_at(input, Utc::now())
    }

    /// 以给定时间点打分（便于测试闲置加分）
    pub fn select_agent_at(&self, input: RoutingInput<'_>, now: DateTime<Utc>) -> AgentId {
        let candidates = self.candidates(input);
        match (self.best_of(&candidates, now), input) {
            (Some(agent), _) => agent,
            (None, RoutingInput::Step { subtask, language }) => {
                tracing::warn!(
                    agent = %subtask.responsible_agent,
                    language,
                    "no agent of this kind supports the language, keeping the assigned one"
                );
                subtask.responsible_agent
            }
            (None, _) => {
                let fallback = self.best_overall(now);
                tracing::debug!(agent = %fallback, "no affinity match, using best overall agent");
                fallback
            }
        }
    }

    /// 原始任务列表逐条路由
    pub fn select_agent_sequence(&self, tasks: &[String]) -> Vec<(AgentId, String)> {
        let now = Utc::now();
        tasks
            .iter()
            .map(|task| (self.select_agent_at(RoutingInput::Task(task), now), task.clone()))
            .collect()
    }

    /// 由拆解结果生成执行计划：每步按请求语言与当前分数路由；
    /// 存在依赖步骤（收件人解析 / 润色 / 投递）时一律顺序执行
    pub fn plan(&self, understanding: &Understanding, subtasks: Vec<Subtask>) -> ExecutionPlan {
        let dependent = subtasks.iter().any(|s| s.kind.is_dependent());
        let requested = understanding.coordination_type();
        let coordination = if dependent || subtasks.len() <= 1 {
            if dependent && requested != CoordinationType::Sequential {
                tracing::debug!(
                    requested = %requested,
                    "plan has dependent steps, running sequentially"
                );
            }
            CoordinationType::Sequential
        } else {
            requested
        };

        let language = understanding.language().code();
        let now = Utc::now();
        let steps = subtasks
            .into_iter()
            .enumerate()
            .map(|(index, mut subtask)| {
                let agent = self.select_agent_at(
                    RoutingInput::Step {
                        subtask: &subtask,
                        language,
                    },
                    now,
                );
                if agent != subtask.responsible_agent {
                    tracing::info!(
                        step = index,
                        from = %subtask.responsible_agent,
                        to = %agent,
                        "step rerouted"
                    );
                    subtask.responsible_agent = agent;
                }
                PlannedStep {
                    index,
                    agent,
                    subtask,
                }
            })
            .collect();
        ExecutionPlan {
            coordination,
            steps,
        }
    }
}
