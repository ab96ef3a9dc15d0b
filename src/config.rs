//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::routing::ScoringWeights;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub routing: RoutingSection,
    #[serde(default)]
    pub channels: ChannelsSection,
    #[serde(default)]
    pub knowledge: KnowledgeSection,
    #[serde(default)]
    pub server: ServerSection,
}

/// [app] 段：应用名、对话轮数上限、性能快照路径
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 每个用户保留的对话条数（ContextStore 上限，FIFO 剪枝）
    #[serde(default = "default_max_context_turns")]
    pub max_context_turns: usize,
    /// PerformanceTracker 快照文件；未设置时不持久化
    pub state_path: Option<PathBuf>,
    /// 可选 SQLite 对话库（需 async-sqlite feature）
    pub context_db: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_context_turns: default_max_context_turns(),
            state_path: None,
            context_db: None,
        }
    }
}

fn default_max_context_turns() -> usize {
    20
}

/// [llm] 段：后端选择、采样参数、超时与重试
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
    #[serde(default)]
    pub retry: LlmRetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeouts: LlmTimeoutsSection::default(),
            retry: LlmRetrySection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    1200
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次 Oracle 调用超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}

/// [llm.retry] 段：编排层的重试策略（分类器内部不重试）
#[derive(Debug, Clone, Deserialize)]
pub struct LlmRetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for LlmRetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    500
}

/// [routing] 段：打分常数（经验值，可调）、历史长度、陈旧任务阈值
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingSection {
    #[serde(default)]
    pub weights: ScoringWeights,
    /// 已完成任务的保留条数
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// 超过该秒数仍在执行的任务视为失败
    #[serde(default = "default_stale_task_secs")]
    pub stale_task_secs: u64,
    /// Agent 能力表覆盖文件（TOML）
    pub agents_file: Option<PathBuf>,
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            history_limit: default_history_limit(),
            stale_task_secs: default_stale_task_secs(),
            agents_file: None,
        }
    }
}

fn default_history_limit() -> usize {
    10
}

fn default_stale_task_secs() -> u64 {
    600
}

/// [channels] 段：发送超时与各渠道凭据来源
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelsSection {
    /// 单次渠道发送超时（秒），批量发送通常更慢
    #[serde(default = "default_channel_timeout")]
    pub send_timeout_secs: u64,
    /// 存储读写超时（秒）
    #[serde(default = "default_storage_timeout")]
    pub storage_timeout_secs: u64,
    /// 未配置凭据的渠道使用 DryRunSender（只记录不外发）
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub email: EmailSection,
    #[serde(default)]
    pub whatsapp: WhatsAppSection,
}

impl Default for ChannelsSection {
    fn default() -> Self {
        Self {
            send_timeout_secs: default_channel_timeout(),
            storage_timeout_secs: default_storage_timeout(),
            dry_run: false,
            email: EmailSection::default(),
            whatsapp: WhatsAppSection::default(),
        }
    }
}

fn default_channel_timeout() -> u64 {
    120
}

fn default_storage_timeout() -> u64 {
    10
}

/// [channels.email] 段：事务邮件 API
#[derive(Debug, Clone, Deserialize)]
pub struct EmailSection {
    #[serde(default = "default_email_endpoint")]
    pub endpoint: String,
    pub sender_address: Option<String>,
    pub sender_name: Option<String>,
}

impl Default for EmailSection {
    fn default() -> Self {
        Self {
            endpoint: default_email_endpoint(),
            sender_address: None,
            sender_name: None,
        }
    }
}

fn default_email_endpoint() -> String {
    "https://api.brevo.com/v3/smtp/email".to_string()
}

/// [channels.whatsapp] 段：WhatsApp Cloud API
#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppSection {
    #[serde(default = "default_whatsapp_api_base")]
    pub api_base: String,
    pub phone_number_id: Option<String>,
}

impl Default for WhatsAppSection {
    fn default() -> Self {
        Self {
            api_base: default_whatsapp_api_base(),
            phone_number_id: None,
        }
    }
}

fn default_whatsapp_api_base() -> String {
    "https://graph.facebook.com/v18.0".to_string()
}

/// [knowledge] 段：检索条数与嵌入模型
#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeSection {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// 设置后启用向量相似度（否则按关键词重叠）
    pub embedding_model: Option<String>,
    /// 共享知识文件（空行分段），启动时载入 system 命名空间
    pub system_file: Option<PathBuf>,
}

impl Default for KnowledgeSection {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            embedding_model: None,
            system_file: None,
        }
    }
}

fn default_top_k() -> usize {
    4
}

/// [server] 段：HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.max_context_turns, 20);
        assert_eq!(cfg.llm.timeouts.request, 30);
        assert_eq!(cfg.routing.history_limit, 10);
        assert_eq!(cfg.routing.weights.idle_bonus, 5.0);
        assert_eq!(cfg.routing.weights.inflight_penalty, 10.0);
        assert_eq!(cfg.routing.weights.duration_weight, 0.5);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hive.toml");
        std::fs::write(
            &path,
            "[app]\nmax_context_turns = 12\n\n[routing.weights]\nidle_bonus = 7.5\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.app.max_context_turns, 12);
        assert_eq!(cfg.routing.weights.idle_bonus, 7.5);
        assert_eq!(cfg.routing.weights.neutral_score, 50.0);
    }
}
