//! Orchestrator：一次请求的完整流水线
//!
//! 上下文 → 分类 → 必填实体校验 → {直接回答 | 澄清 | 拆解 → 规划 → 执行} → 组装回复 → 写回上下文。
//! 每个步骤在独立的 tokio 任务中执行，任务的开始 / 完成登记都在该任务内完成，
//! 调用方提前放弃等待也不会让任务停留在执行中。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::{AgentExecutor, AgentId, AgentOutcome, AgentRequest, CapabilityTable, StepOutput};
use crate::core::state::{PhaseTrail, RequestPhase};
use crate::core::{with_timeout, HiveError};
use crate::intent::{
    clarification_fallback, enforce_required_entities, infer_context_references, CoordinationType,
    IntentClassifier, Language, Understanding,
};
use crate::llm::{complete_prompt, CompletionOptions, LlmClient};
use crate::memory::{ContextStore, ConversationTurn, Role};
use crate::routing::{
    Decomposition, ExecutionPlan, PerformanceTracker, PlannedStep, RoutingPlanner, TaskDecomposer,
};

const SMALL_TALK_PROMPT: &str = "You are a friendly business assistant. Reply briefly and naturally \
in the same language and dialect as the user.";

/// 一次请求的输入（POST /run 的请求体）
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub prompt: String,
    #[serde(alias = "user_id")]
    pub user_email: String,
    /// 调用方自带的对话上下文；提供时替代存储中的历史
    #[serde(default)]
    pub context: Option<Vec<ConversationTurn>>,
}

impl RunRequest {
    pub fn new(prompt: impl Into<String>, user_email: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            user_email: user_email.into(),
            context: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
    /// 顺序模式中前一步失败后未执行
    Skipped,
}

/// 单个步骤的执行结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub agent: AgentId,
    pub task: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub data: Option<Value>,
    pub duration_seconds: f64,
}

impl StepReport {
    fn skipped(step: &PlannedStep) -> Self {
        Self {
            index: step.index,
            agent: step.agent,
            task: step.subtask.action.clone(),
            status: StepStatus::Skipped,
            output: None,
            error: None,
            data: None,
            duration_seconds: 0.0,
        }
    }

    fn succeeded(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// 对外回复
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub final_output: String,
    /// 秒
    pub execution_time: f64,
    pub file_name: Option<String>,
    /// base64
    pub file_content: Option<String>,
    pub phase: RequestPhase,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepReport>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub history_turns: usize,
    pub step_timeout: Duration,
    pub storage_timeout: Duration,
    pub stale_task_age: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            history_turns: 20,
            step_timeout: Duration::from_secs(180),
            storage_timeout: Duration::from_secs(10),
            stale_task_age: Duration::from_secs(600),
        }
    }
}

pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    classifier: IntentClassifier,
    decomposer: TaskDecomposer,
    planner: RoutingPlanner,
    tracker: Arc<PerformanceTracker>,
    executor: Arc<dyn AgentExecutor>,
    context: Arc<dyn ContextStore>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        capabilities: Arc<CapabilityTable>,
        tracker: Arc<PerformanceTracker>,
        executor: Arc<dyn AgentExecutor>,
        context: Arc<dyn ContextStore>,
    ) -> Self {
        Self {
            classifier: IntentClassifier::new(Arc::clone(&llm), &capabilities),
            decomposer: TaskDecomposer::new(Arc::clone(&llm), Arc::clone(&capabilities)),
            planner: RoutingPlanner::new(capabilities, Arc::clone(&tracker)),
            llm,
            tracker,
            executor,
            context,
            options: OrchestratorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    /// 分类与拆解使用的采样参数
    pub fn with_completion_options(mut self, options: CompletionOptions) -> Self {
        self.classifier = self.classifier.with_options(options);
        self.decomposer = self.decomposer.with_options(options);
        self
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        &self.tracker
    }

    pub fn planner(&self) -> &RoutingPlanner {
        &self.planner
    }

    /// 处理一次请求。只有执行前的基础设施故障（Oracle 不可达、上下文读取超时）返回 Err；
    /// 步骤执行后写回上下文失败只记录告警，照常返回执行结果
    pub async fn handle(&self, request: RunRequest) -> Result<Response, HiveError> {
        let started = Instant::now();
        let user = request.user_email.trim().to_string();
        if user.is_empty() {
            return Err(HiveError::ScopeViolation("request without user identity".into()));
        }
        let stale = self.tracker.fail_stale(self.options.stale_task_age);
        if !stale.is_empty() {
            tracing::warn!(count = stale.len(), "stale assignments resolved before new request");
        }

        let context = match request.context {
            Some(turns) => turns,
            None => {
                with_timeout(
                    "context read",
                    self.options.storage_timeout,
                    self.context.recent(&user, self.options.history_turns),
                )
                .await?
            }
        };
        let mut trail = PhaseTrail::new();

        let understanding = self.classifier.classify(&request.prompt, &context).await?;
        trail.advance(RequestPhase::Classified);
        let understanding = infer_context_references(understanding, &context);
        let understanding = enforce_required_entities(understanding, !context.is_empty());

        let mut response = if understanding.needs_clarification() {
            trail.advance(RequestPhase::Clarifying);
            self.finish(
                &trail,
                understanding
                    .clarification_question()
                    .unwrap_or_else(|| clarification_fallback(understanding.language()))
                    .to_string(),
                Vec::new(),
            )
        } else if !understanding.is_delegated() {
            trail.advance(RequestPhase::DirectAnswer);
            let answer = self.direct_answer(&understanding, &context).await?;
            self.finish(&trail, answer, Vec::new())
        } else {
            self.delegate(&user, &understanding, &context, &mut trail).await?
        };
        response.execution_time = started.elapsed().as_secs_f64();

        let written = with_timeout("context write", self.options.storage_timeout, async {
            self.context.append(&user, Role::User, &request.prompt).await?;
            self.context
                .append(&user, Role::Assistant, &response.final_output)
                .await
        })
        .await;
        if let Err(e) = written {
            tracing::warn!(user = %user, error = %e, "context write failed, returning response anyway");
        }
        tracing::info!(
            user = %user,
            phase = %response.phase,
            steps = response.steps.len(),
            secs = response.execution_time,
            "request finished"
        );
        Ok(response)
    }

    async fn direct_answer(
        &self,
        understanding: &Understanding,
        context: &[ConversationTurn],
    ) -> Result<String, HiveError> {
        if let Some(answer) = understanding.direct_response() {
            return Ok(answer.to_string());
        }
        let prompt = format!(
            "Conversation so far:\n{}\n\nUser: {}",
            crate::memory::render_context(context),
            understanding.raw_input()
        );
        let reply = complete_prompt(
            self.llm.as_ref(),
            SMALL_TALK_PROMPT,
            &prompt,
            &CompletionOptions::default().with_temperature(0.7),
        )
        .await?;
        Ok(reply.trim().to_string())
    }

    async fn delegate(
        &self,
        user: &str,
        understanding: &Understanding,
        context: &[ConversationTurn],
        trail: &mut PhaseTrail,
    ) -> Result<Response, HiveError> {
        let decomposition = self
            .decomposer
            .decompose(
                understanding.raw_input(),
                context,
                understanding.context_references(),
            )
            .await?;
        trail.advance(RequestPhase::Decomposed);

        let subtasks = match decomposition {
            Decomposition::Plan(subtasks) if !subtasks.is_empty() => subtasks,
            Decomposition::Plan(_) => {
                trail.advance(RequestPhase::Clarifying);
                return Ok(self.clarify(trail, understanding.language()));
            }
            Decomposition::Degraded { reason } => {
                tracing::warn!(reason = %reason, "decomposition degraded, asking for clarification");
                trail.advance(RequestPhase::Clarifying);
                return Ok(self.clarify(trail, understanding.language()));
            }
        };

        let plan = self.planner.plan(understanding, subtasks);
        trail.advance(RequestPhase::Routed);
        tracing::info!(
            coordination = %plan.coordination,
            steps = ?plan.steps.iter().map(|s| s.agent.as_str()).collect::<Vec<_>>(),
            "plan routed"
        );

        trail.advance(RequestPhase::Executing);
        let reports = self.execute(user, understanding, &plan).await;

        let succeeded = reports.iter().filter(|r| r.succeeded()).count();
        let phase = if succeeded == reports.len() {
            RequestPhase::Completed
        } else if plan.coordination == CoordinationType::Sequential || succeeded == 0 {
            RequestPhase::Failed
        } else {
            RequestPhase::PartiallyFailed
        };
        trail.advance(phase);

        let final_output = compose_output(phase, &reports, understanding.language());
        Ok(self.finish(trail, final_output, reports))
    }

    fn clarify(&self, trail: &PhaseTrail, language: &Language) -> Response {
        self.finish(trail, clarification_fallback(language).to_string(), Vec::new())
    }

    fn finish(&self, trail: &PhaseTrail, final_output: String, steps: Vec<StepReport>) -> Response {
        let file = steps
            .iter()
            .rev()
            .filter(|s| s.succeeded())
            .filter_map(|s| s.data.as_ref())
            .find(|d| d.get("file_name").is_some());
        Response {
            final_output,
            execution_time: 0.0,
            file_name: file
                .and_then(|d| d.get("file_name"))
                .and_then(Value::as_str)
                .map(str::to_string),
            file_content: file
                .and_then(|d| d.get("file_content"))
                .and_then(Value::as_str)
                .map(str::to_string),
            phase: trail.current(),
            steps,
        }
    }

    fn agent_request(&self, user: &str, understanding: &Understanding, step: &PlannedStep, previous: Vec<StepOutput>) -> AgentRequest {
        AgentRequest {
            user_id: user.to_string(),
            utterance: understanding.raw_input().to_string(),
            subtask: step.subtask.clone(),
            language: understanding.language().clone(),
            entities: understanding.entities().clone(),
            context_references: understanding.context_references().clone(),
            previous,
        }
    }

    /// 顺序模式：前序成功输出向后传递，失败即中止；并行 / 独立模式：全部并发执行
    async fn execute(&self, user: &str, understanding: &Understanding, plan: &ExecutionPlan) -> Vec<StepReport> {
        match plan.coordination {
            CoordinationType::Sequential => {
                let mut reports = Vec::with_capacity(plan.len());
                let mut previous: Vec<StepOutput> = Vec::new();
                for (i, step) in plan.steps.iter().enumerate() {
                    let request = self.agent_request(user, understanding, step, previous.clone());
                    let report = self.spawn_step(step, request).await;
                    let ok = report.succeeded();
                    if ok {
                        if let Some(output) = &report.output {
                            previous.push(StepOutput {
                                agent: report.agent,
                                output: output.clone(),
                                data: report.data.clone(),
                            });
                        }
                    }
                    reports.push(report);
                    if !ok {
                        tracing::warn!(step = step.index, agent = %step.agent, "sequential step failed, aborting remaining steps");
                        reports.extend(plan.steps[i + 1..].iter().map(StepReport::skipped));
                        break;
                    }
                }
                reports
            }
            CoordinationType::Parallel | CoordinationType::Independent => {
                let futures = plan.steps.iter().map(|step| {
                    let request = self.agent_request(user, understanding, step, Vec::new());
                    self.spawn_step(step, request)
                });
                join_all(futures).await
            }
        }
    }

    /// 在独立任务中执行一步；开始登记在派发前，完成登记在任务内部
    async fn spawn_step(&self, step: &PlannedStep, request: AgentRequest) -> StepReport {
        let task_id = uuid::Uuid::new_v4().to_string();
        self.tracker
            .record_task_start(&task_id, step.agent, &step.subtask.action);

        let executor = Arc::clone(&self.executor);
        let tracker = Arc::clone(&self.tracker);
        let agent = step.agent;
        let limit = self.options.step_timeout;
        let id = task_id.clone();
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let result = with_timeout(
                &format!("agent {}", agent),
                limit,
                executor.execute(agent, &request),
            )
            .await;
            let duration = started.elapsed().as_secs_f64();
            let success = matches!(&result, Ok(outcome) if outcome.is_success());
            tracker.record_task_completion(&id, success, duration);
            (result, duration)
        });

        let (result, duration) = match handle.await {
            Ok(done) => done,
            Err(e) => {
                self.tracker.record_task_completion(&task_id, false, 0.0);
                (
                    Err(HiveError::AgentExecution {
                        agent: agent.to_string(),
                        reason: format!("task aborted: {}", e),
                    }),
                    0.0,
                )
            }
        };

        let mut report = StepReport {
            index: step.index,
            agent,
            task: step.subtask.action.clone(),
            status: StepStatus::Completed,
            output: None,
            error: None,
            data: None,
            duration_seconds: duration,
        };
        match result {
            Ok(AgentOutcome::Success { output, data }) => {
                report.output = Some(output);
                report.data = data;
            }
            Ok(AgentOutcome::Empty) => {}
            Ok(AgentOutcome::Error { reason }) => {
                report.status = StepStatus::Failed;
                report.error = Some(reason);
            }
            Err(e) => {
                tracing::warn!(agent = %agent, error = %e, "agent step failed");
                report.status = StepStatus::Failed;
                report.error = Some(e.to_string());
            }
        }
        report
    }
}

fn failure_header(language: &Language) -> &'static str {
    match language {
        Language::Ar => "تعذر إكمال بعض الخطوات:",
        Language::Fr => "Certaines étapes n'ont pas pu être terminées :",
        _ => "Some steps could not be completed:",
    }
}

fn done_message(language: &Language) -> &'static str {
    match language {
        Language::Ar => "تم تنفيذ طلبك.",
        Language::Fr => "Votre demande a été traitée.",
        _ => "Your request has been completed.",
    }
}

/// 组装最终回复：成功时取有内容的输出，失败时附上失败步骤及原因
fn compose_output(phase: RequestPhase, reports: &[StepReport], language: &Language) -> String {
    let outputs: Vec<&StepReport> = reports
        .iter()
        .filter(|r| r.succeeded() && r.output.is_some())
        .collect();

    let body = match outputs.as_slice() {
        [] => String::new(),
        [only] => only.output.clone().unwrap_or_default(),
        many if phase == RequestPhase::Completed && reports.len() == many.len() => many
            .iter()
            .map(|r| format!("[{}]\n{}", r.agent, r.output.as_deref().unwrap_or_default()))
            .collect::<Vec<_>>()
            .join("\n\n"),
        many => many
            .last()
            .and_then(|r| r.output.clone())
            .unwrap_or_default(),
    };

    if phase == RequestPhase::Completed {
        return if body.is_empty() {
            done_message(language).to_string()
        } else {
            body
        };
    }

    let failures = reports
        .iter()
        .filter(|r| r.status == StepStatus::Failed)
        .map(|r| format!("- {}: {}", r.agent, r.error.as_deref().unwrap_or("failed")))
        .collect::<Vec<_>>()
        .join("\n");
    if body.is_empty() {
        format!("{}\n{}", failure_header(language), failures)
    } else {
        format!("{}\n\n{}\n{}", body, failure_header(language), failures)
    }
}
