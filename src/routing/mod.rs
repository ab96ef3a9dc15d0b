//! 路由层：任务拆解、Agent 选择与表现统计

pub mod decomposer;
pub mod performance;
pub mod planner;

pub use decomposer::{is_draft_only, Decomposition, Subtask, SubtaskKind, TaskDecomposer};
pub use performance::{
    score_record, AgentMetrics, AgentPerformanceRecord, MetricsSummary, MetricsTotals,
    PerformanceTracker, ScoringWeights, TaskAssignment, TaskStatus,
};
pub use planner::{ExecutionPlan, PlannedStep, RoutingInput, RoutingPlanner};
