//! 核心编排层：错误、请求状态机、流水线编排、组件装配与优雅关闭

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod shutdown;
pub mod state;

pub use builder::{create_hive_builder, create_llm_from_config, HiveBuilder, HiveComponents};
pub use error::{with_timeout, HiveError};
pub use orchestrator::{
    Orchestrator, OrchestratorOptions, Response, RunRequest, StepReport, StepStatus,
};
pub use shutdown::{ShutdownCleanup, ShutdownCoordinator, ShutdownManager, TrackerSnapshot};
pub use state::{PhaseTrail, RequestPhase};
