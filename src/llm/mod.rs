//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、重试与超时包装、JSON 解析

pub mod embedding;
pub mod json;
pub mod mock;
pub mod openai;
pub mod traits;

pub use embedding::{cosine_similarity, create_embedder_from_config, EmbeddingProvider, OpenAiEmbedder};
pub use json::{extract_json_object, parse_oracle, OracleOutcome};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{
    complete_prompt, CompletionOptions, LlmClient, LlmError, RetryConfig, RetryingLlmClient,
    TimeoutLlmClient,
};
