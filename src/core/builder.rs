//! 组件构建：从 AppConfig 装配 Orchestrator
//!
//! REPL 与 HTTP 入口共用同一套装配逻辑；Oracle 客户端统一套上超时与重试包装。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::agents::{CapabilityTable, DefaultAgentRuntime, RuntimeOptions};
use crate::channels::{Channel, ChannelSender, DryRunSender, EmailSender, WhatsAppSender};
use crate::config::AppConfig;
use crate::core::orchestrator::{Orchestrator, OrchestratorOptions};
use crate::core::HiveError;
use crate::knowledge::{InMemoryKnowledge, SYSTEM_NAMESPACE};
use crate::llm::{
    create_embedder_from_config, CompletionOptions, LlmClient, MockLlmClient, OpenAiClient,
    RetryConfig, RetryingLlmClient, TimeoutLlmClient,
};
use crate::memory::{ContextStore, InMemoryContextStore};
use crate::routing::PerformanceTracker;
use crate::store::{InMemoryRecipientStore, RecipientStore, ScopedRecipientStore};

/// 根据配置与环境变量选择 Oracle 后端（OpenAI 兼容 / DeepSeek / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_openai = std::env::var("OPENAI_API_KEY").is_ok();
    let has_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok();

    match provider.as_str() {
        "deepseek" if has_deepseek || has_openai => {
            tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
            Arc::new(OpenAiClient::deepseek(Some(&cfg.llm.model)))
        }
        "openai" if has_openai => {
            tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                None,
            ))
        }
        "mock" => Arc::new(MockLlmClient::default()),
        other => {
            tracing::warn!("No API key for provider '{}', using Mock LLM", other);
            Arc::new(MockLlmClient::default())
        }
    }
}

/// 装配好的组件；channels 之外的字段都可被多个入口共享
pub struct HiveComponents {
    pub orchestrator: Arc<Orchestrator>,
    pub tracker: Arc<PerformanceTracker>,
    pub knowledge: Arc<InMemoryKnowledge>,
    pub config: AppConfig,
}

impl HiveComponents {
    /// 把性能快照写回 state_path（未配置时不做任何事）
    pub fn save_state(&self) -> anyhow::Result<()> {
        match &self.config.app.state_path {
            Some(path) => self.tracker.save(path),
            None => Ok(()),
        }
    }

    /// 载入共享知识文件，返回段落数
    pub async fn load_system_knowledge(&self) -> anyhow::Result<usize> {
        let Some(path) = &self.config.knowledge.system_file else {
            return Ok(0);
        };
        let text = tokio::fs::read_to_string(path).await?;
        let mut count = 0;
        for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            self.knowledge.add(SYSTEM_NAMESPACE, paragraph).await;
            count += 1;
        }
        tracing::info!("Loaded {} knowledge paragraphs from {:?}", count, path);
        Ok(count)
    }
}

pub struct HiveBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    context: Option<Arc<dyn ContextStore>>,
    store: Option<Arc<dyn RecipientStore>>,
    channels: Vec<Arc<dyn ChannelSender>>,
}

impl HiveBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            context: None,
            store: None,
            channels: Vec::new(),
        }
    }

    /// 指定 Oracle 客户端（测试用 Mock）；仍会套上超时与重试
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_context_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.context = Some(store);
        self
    }

    /// 指定客户数据存储；无论来源都会套上作用域守卫
    pub fn with_store(mut self, store: Arc<dyn RecipientStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 配置了 app.context_db 时改用 SQLite 对话库（需 async-sqlite feature）
    pub async fn attach_context_db(self) -> Result<Self, HiveError> {
        #[cfg(feature = "async-sqlite")]
        {
            if let Some(path) = self.config.app.context_db.clone() {
                let store =
                    crate::memory::SqliteContextStore::new(&path, self.config.app.max_context_turns)
                        .await?;
                tracing::info!("Conversation context stored in {:?}", path);
                return Ok(self.with_context_store(Arc::new(store)));
            }
        }
        #[cfg(not(feature = "async-sqlite"))]
        {
            if self.config.app.context_db.is_some() {
                tracing::warn!("context_db is set but async-sqlite is disabled, keeping context in memory");
            }
        }
        Ok(self)
    }

    /// 额外注册渠道，优先于配置中的渠道
    pub fn with_channel(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.channels.push(sender);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn wrap_llm(&self, base: Arc<dyn LlmClient>) -> Arc<dyn LlmClient> {
        let timeout = Duration::from_secs(self.config.llm.timeouts.request);
        let bounded: Arc<dyn LlmClient> = Arc::new(TimeoutLlmClient::new(base, timeout));
        Arc::new(RetryingLlmClient::new(
            bounded,
            RetryConfig {
                max_attempts: self.config.llm.retry.max_attempts,
                backoff: Duration::from_millis(self.config.llm.retry.backoff_ms),
            },
        ))
    }

    fn configured_channels(&self) -> Vec<Arc<dyn ChannelSender>> {
        let cfg = &self.config.channels;
        let mut senders: Vec<Arc<dyn ChannelSender>> = Vec::new();
        match EmailSender::from_config(&cfg.email) {
            Some(sender) => senders.push(Arc::new(sender)),
            None if cfg.dry_run => senders.push(Arc::new(DryRunSender::new(Channel::Email))),
            None => tracing::info!("email channel not configured"),
        }
        match WhatsAppSender::from_config(&cfg.whatsapp) {
            Some(sender) => senders.push(Arc::new(sender)),
            None if cfg.dry_run => senders.push(Arc::new(DryRunSender::new(Channel::WhatsApp))),
            None => tracing::info!("whatsapp channel not configured"),
        }
        if cfg.dry_run {
            senders.push(Arc::new(DryRunSender::new(Channel::Call)));
        }
        senders
    }

    fn load_tracker(&self) -> PerformanceTracker {
        let routing = &self.config.routing;
        match &self.config.app.state_path {
            Some(path) => PerformanceTracker::load(path, routing.weights.clone(), routing.history_limit)
                .unwrap_or_else(|e| {
                    tracing::warn!("Performance snapshot {:?} unreadable ({}), starting fresh", path, e);
                    PerformanceTracker::new(routing.weights.clone(), routing.history_limit)
                }),
            None => PerformanceTracker::new(routing.weights.clone(), routing.history_limit),
        }
    }

    pub fn build(self) -> Result<HiveComponents, HiveError> {
        let capabilities = Arc::new(CapabilityTable::load(
            self.config.routing.agents_file.as_deref(),
        )?);
        let base = self
            .llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&self.config));
        let llm = self.wrap_llm(base);
        let tracker = Arc::new(self.load_tracker());

        let mut knowledge = InMemoryKnowledge::new();
        if let Some(embedder) = create_embedder_from_config(
            self.config.llm.base_url.as_deref(),
            self.config.knowledge.embedding_model.as_deref(),
        ) {
            knowledge = knowledge.with_embedder(embedder);
        }
        let knowledge = Arc::new(knowledge);

        let store: Arc<dyn RecipientStore> = match self.store.clone() {
            Some(inner) => Arc::new(ScopedRecipientStore::new(inner)),
            None => Arc::new(ScopedRecipientStore::new(InMemoryRecipientStore::new())),
        };
        let channels_cfg = &self.config.channels;
        let completion = CompletionOptions {
            temperature: self.config.llm.temperature,
            max_tokens: self.config.llm.max_tokens,
        };
        let mut runtime = DefaultAgentRuntime::new(Arc::clone(&llm), knowledge.clone(), store)
            .with_options(RuntimeOptions {
                completion: RuntimeOptions::default()
                    .completion
                    .with_max_tokens(completion.max_tokens),
                knowledge_top_k: self.config.knowledge.top_k,
                send_timeout: Duration::from_secs(channels_cfg.send_timeout_secs),
                storage_timeout: Duration::from_secs(channels_cfg.storage_timeout_secs),
            });
        for sender in self.configured_channels() {
            runtime = runtime.with_channel(sender);
        }
        for sender in &self.channels {
            runtime = runtime.with_channel(Arc::clone(sender));
        }

        let context: Arc<dyn ContextStore> = self
            .context
            .clone()
            .unwrap_or_else(|| Arc::new(InMemoryContextStore::new(self.config.app.max_context_turns)));

        let orchestrator = Orchestrator::new(
            llm,
            capabilities,
            Arc::clone(&tracker),
            Arc::new(runtime),
            context,
        )
        .with_completion_options(completion)
        .with_options(OrchestratorOptions {
            history_turns: self.config.app.max_context_turns,
            step_timeout: Duration::from_secs(channels_cfg.send_timeout_secs + 60),
            storage_timeout: Duration::from_secs(channels_cfg.storage_timeout_secs),
            stale_task_age: Duration::from_secs(self.config.routing.stale_task_secs),
        });

        Ok(HiveComponents {
            orchestrator: Arc::new(orchestrator),
            tracker,
            knowledge,
            config: self.config,
        })
    }
}

/// 便捷函数：加载配置（失败时使用默认值）并创建构建器
pub fn create_hive_builder(config_path: Option<PathBuf>) -> HiveBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    HiveBuilder::new(config)
}
