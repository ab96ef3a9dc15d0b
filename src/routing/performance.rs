//! PerformanceTracker：按 Agent 统计成功率与耗时，供路由打分
//!
//! 全部计数器、执行中任务集合与历史记录放在同一把锁下，只能通过
//! `record_task_start` / `record_task_completion`（以及 `fail_stale`）修改，
//! 保证 `tasks_succeeded + tasks_failed <= tasks_started`。

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::AgentId;
use crate::core::HiveError;

/// 打分常数（经验值，可在 [routing.weights] 中调整）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringWeights {
    #[serde(default = "default_success_weight")]
    pub success_weight: f64,
    #[serde(default = "default_duration_weight")]
    pub duration_weight: f64,
    /// 长时间未使用的 Agent 加分，分散负载
    #[serde(default = "default_idle_bonus")]
    pub idle_bonus: f64,
    #[serde(default = "default_idle_threshold_secs")]
    pub idle_threshold_secs: i64,
    /// 每个执行中任务的扣分
    #[serde(default = "default_inflight_penalty")]
    pub inflight_penalty: f64,
    /// 无历史记录时的先验分
    #[serde(default = "default_neutral_score")]
    pub neutral_score: f64,
}

fn default_success_weight() -> f64 {
    1.0
}

fn default_duration_weight() -> f64 {
    0.5
}

fn default_idle_bonus() -> f64 {
    5.0
}

fn default_idle_threshold_secs() -> i64 {
    3600
}

fn default_inflight_penalty() -> f64 {
    10.0
}

fn default_neutral_score() -> f64 {
    50.0
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            success_weight: default_success_weight(),
            duration_weight: default_duration_weight(),
            idle_bonus: default_idle_bonus(),
            idle_threshold_secs: default_idle_threshold_secs(),
            inflight_penalty: default_inflight_penalty(),
            neutral_score: default_neutral_score(),
        }
    }
}

/// 单个 Agent 的累计表现
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformanceRecord {
    pub tasks_started: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub total_duration_seconds: f64,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl AgentPerformanceRecord {
    /// 成功率（百分比）；无记录时为 None
    pub fn success_rate(&self) -> Option<f64> {
        (self.tasks_started > 0)
            .then(|| self.tasks_succeeded as f64 / self.tasks_started as f64 * 100.0)
    }

    pub fn avg_duration(&self) -> Option<f64> {
        (self.tasks_started > 0).then(|| self.total_duration_seconds / self.tasks_started as f64)
    }

    pub fn resolved(&self) -> u64 {
        self.tasks_succeeded + self.tasks_failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    InProgress,
    Completed,
    Failed,
}

/// 一次委派的子任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: String,
    pub agent_id: AgentId,
    pub subtask_description: String,
    pub started_at: DateTime<Utc>,
    pub status: TaskStatus,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
}

/// 纯函数打分：有历史时 `成功率*w_s - 平均耗时*w_d`，否则取先验分；
/// 闲置超过阈值加分，每个执行中任务扣分
pub fn score_record(
    record: &AgentPerformanceRecord,
    in_flight: usize,
    weights: &ScoringWeights,
    now: DateTime<Utc>,
) -> f64 {
    let mut score = match (record.success_rate(), record.avg_duration()) {
        (Some(rate), Some(avg)) => rate * weights.success_weight - avg * weights.duration_weight,
        _ => weights.neutral_score,
    };
    if let Some(last) = record.last_used_at {
        if (now - last).num_seconds() > weights.idle_threshold_secs {
            score += weights.idle_bonus;
        }
    }
    score - in_flight as f64 * weights.inflight_penalty
}

/// metrics_summary 中的单个 Agent 条目
#[derive(Debug, Clone, Serialize)]
pub struct AgentMetrics {
    pub agent: AgentId,
    #[serde(flatten)]
    pub record: AgentPerformanceRecord,
    pub success_rate: Option<f64>,
    pub avg_duration_seconds: Option<f64>,
    pub current_workload: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsTotals {
    pub tasks_started: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub in_flight: usize,
    pub success_rate: Option<f64>,
}

/// 只读投影：不含时间相关的分数，同一状态总是得到同一结果
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub agents: Vec<AgentMetrics>,
    pub totals: MetricsTotals,
    pub recent_tasks: Vec<TaskAssignment>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TrackerState {
    records: BTreeMap<AgentId, AgentPerformanceRecord>,
    in_flight: HashMap<String, TaskAssignment>,
    history: VecDeque<TaskAssignment>,
}

impl TrackerState {
    fn seeded() -> Self {
        let mut state = Self::default();
        state.seed_missing();
        state
    }

    fn seed_missing(&mut self) {
        for agent in AgentId::ALL {
            self.records.entry(agent).or_default();
        }
    }

    fn in_flight_for(&self, agent: AgentId) -> usize {
        self.in_flight.values().filter(|t| t.agent_id == agent).count()
    }

    fn resolve(
        &mut self,
        task_id: &str,
        success: bool,
        duration_seconds: f64,
        history_limit: usize,
    ) -> Result<AgentId, HiveError> {
        let mut task = self
            .in_flight
            .remove(task_id)
            .ok_or_else(|| HiveError::UnknownTaskCompletion(task_id.to_string()))?;
        let record = self.records.entry(task.agent_id).or_default();
        if success {
            record.tasks_succeeded += 1;
        } else {
            record.tasks_failed += 1;
        }
        record.total_duration_seconds += duration_seconds.max(0.0);

        task.status = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        task.duration_seconds = Some(duration_seconds.max(0.0));
        let agent = task.agent_id;
        self.history.push_back(task);
        while self.history.len() > history_limit {
            self.history.pop_front();
        }
        Ok(agent)
    }
}

/// 进程级共享的表现统计（通过 Arc 注入编排器与服务端）
#[derive(Debug)]
pub struct PerformanceTracker {
    state: Mutex<TrackerState>,
    weights: ScoringWeights,
    history_limit: usize,
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new(ScoringWeights::default(), 10)
    }
}

impl PerformanceTracker {
    pub fn new(weights: ScoringWeights, history_limit: usize) -> Self {
        Self {
            state: Mutex::new(TrackerState::seeded()),
            weights,
            history_limit: history_limit.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// 登记任务开始；同一 task_id 已在执行中时记录告警并忽略
    pub fn record_task_start(&self, task_id: &str, agent: AgentId, description: &str) -> bool {
        let mut state = self.lock();
        if state.in_flight.contains_key(task_id) {
            tracing::warn!(task_id, "duplicate task start ignored");
            return false;
        }
        let now = Utc::now();
        let record = state.records.entry(agent).or_default();
        record.tasks_started += 1;
        record.last_used_at = Some(now);
        state.in_flight.insert(
            task_id.to_string(),
            TaskAssignment {
                task_id: task_id.to_string(),
                agent_id: agent,
                subtask_description: description.to_string(),
                started_at: now,
                status: TaskStatus::InProgress,
                duration_seconds: None,
            },
        );
        tracing::debug!(task_id, agent = %agent, "task started");
        true
    }

    /// 登记任务完成，返回所属 Agent；未知 task_id 返回错误
    pub fn try_complete(
        &self,
        task_id: &str,
        success: bool,
        duration_seconds: f64,
    ) -> Result<AgentId, HiveError> {
        let history_limit = self.history_limit;
        self.lock()
            .resolve(task_id, success, duration_seconds, history_limit)
    }

    /// 登记任务完成；未知 task_id（重复完成信号）记录告警后忽略
    pub fn record_task_completion(
        &self,
        task_id: &str,
        success: bool,
        duration_seconds: f64,
    ) -> Option<AgentId> {
        match self.try_complete(task_id, success, duration_seconds) {
            Ok(agent) => {
                tracing::debug!(task_id, agent = %agent, success, duration_seconds, "task completed");
                Some(agent)
            }
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }

    /// 将开始时间早于 max_age 的执行中任务判为失败，返回被处理的 task_id
    pub fn fail_stale(&self, max_age: Duration) -> Vec<String> {
        let now = Utc::now();
        let max_age = chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(36500));
        let history_limit = self.history_limit;
        let mut state = self.lock();
        let stale: Vec<(String, f64)> = state
            .in_flight
            .values()
            .filter(|t| now - t.started_at > max_age)
            .map(|t| {
                let elapsed = (now - t.started_at).num_milliseconds() as f64 / 1000.0;
                (t.task_id.clone(), elapsed)
            })
            .collect();
        for (task_id, elapsed) in &stale {
            if state.resolve(task_id, false, *elapsed, history_limit).is_ok() {
                tracing::warn!(task_id = %task_id, "stale task resolved as failed");
            }
        }
        stale.into_iter().map(|(id, _)| id).collect()
    }

    pub fn record(&self, agent: AgentId) -> AgentPerformanceRecord {
        self.lock().records.get(&agent).cloned().unwrap_or_default()
    }

    pub fn in_flight_count(&self, agent: AgentId) -> usize {
        self.lock().in_flight_for(agent)
    }

    pub fn is_in_flight(&self, task_id: &str) -> bool {
        self.lock().in_flight.contains_key(task_id)
    }

    pub fn history(&self) -> Vec<TaskAssignment> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn score(&self, agent: AgentId) -> f64 {
        self.score_at(agent, Utc::now())
    }

    pub fn score_at(&self, agent: AgentId, now: DateTime<Utc>) -> f64 {
        let state = self.lock();
        let record = state.records.get(&agent).cloned().unwrap_or_default();
        score_record(&record, state.in_flight_for(agent), &self.weights, now)
    }

    /// 在一次加锁内为候选打分，保持候选顺序
    pub fn scores_at(&self, candidates: &[AgentId], now: DateTime<Utc>) -> Vec<(AgentId, f64)> {
        let state = self.lock();
        candidates
            .iter()
            .map(|&agent| {
                let record = state.records.get(&agent).cloned().unwrap_or_default();
                (
                    agent,
                    score_record(&record, state.in_flight_for(agent), &self.weights, now),
                )
            })
            .collect()
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        let state = self.lock();
        let agents: Vec<AgentMetrics> = state
            .records
            .iter()
            .map(|(&agent, record)| AgentMetrics {
                agent,
                record: record.clone(),
                success_rate: record.success_rate(),
                avg_duration_seconds: record.avg_duration(),
                current_workload: state.in_flight_for(agent),
            })
            .collect();

        let mut totals = MetricsTotals {
            in_flight: state.in_flight.len(),
            ..MetricsTotals::default()
        };
        for a in &agents {
            totals.tasks_started += a.record.tasks_started;
            totals.tasks_succeeded += a.record.tasks_succeeded;
            totals.tasks_failed += a.record.tasks_failed;
        }
        totals.success_rate = (totals.tasks_started > 0)
            .then(|| totals.tasks_succeeded as f64 / totals.tasks_started as f64 * 100.0);

        MetricsSummary {
            agents,
            totals,
            recent_tasks: state.history.iter().cloned().collect(),
        }
    }

    /// 写入 JSON 快照；父目录不存在时自动创建
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&*self.lock())?;
        std::fs::write(path, json)?;
        tracing::info!("Performance snapshot saved to {:?}", path);
        Ok(())
    }

    /// 从 JSON 快照恢复；文件不存在时返回空统计。
    /// 快照中仍在执行的任务属于上一个进程，加载时一律判为失败。
    pub fn load(
        path: impl AsRef<Path>,
        weights: ScoringWeights,
        history_limit: usize,
    ) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let tracker = Self::new(weights, history_limit);
        if !path.exists() {
            return Ok(tracker);
        }
        let data = std::fs::read_to_string(path)?;
        let mut state: TrackerState = serde_json::from_str(&data)?;
        state.seed_missing();
        let orphaned: Vec<String> = state.in_flight.keys().cloned().collect();
        for task_id in &orphaned {
            let _ = state.resolve(task_id, false, 0.0, tracker.history_limit);
        }
        if !orphaned.is_empty() {
            tracing::warn!(count = orphaned.len(), "orphaned tasks from snapshot marked failed");
        }
        *tracker.lock() = state;
        Ok(tracker)
    }
}
