//! 专职 Agent：词表与能力表、统一结果类型、默认运行时

pub mod database;
pub mod delivery;
pub mod files;
pub mod outcome;
pub mod registry;
pub mod runtime;
pub mod web;

pub use outcome::{AgentExecutor, AgentOutcome, AgentRequest, StepOutput};
pub use registry::{AgentCapabilityProfile, AgentId, CapabilityTable};
pub use runtime::{DefaultAgentRuntime, RuntimeOptions};
