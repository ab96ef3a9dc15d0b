//! IntentClassifier：一次 Oracle 调用把用户输入变成 Understanding
//!
//! 内部不重试（重试策略属于编排层）；只有 Oracle 不可达 / 超时才返回 Err，
//! 回复无法解析时返回降级的澄清结果。

use std::sync::Arc;

use crate::agents::CapabilityTable;
use crate::core::HiveError;
use crate::intent::language::detect;
use crate::intent::prompts::{classification_system_prompt, classification_user_prompt};
use crate::intent::types::{OracleUnderstanding, Understanding};
use crate::llm::{complete_prompt, parse_oracle, CompletionOptions, LlmClient, OracleOutcome};
use crate::memory::ConversationTurn;

pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    options: CompletionOptions,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, capabilities: &CapabilityTable) -> Self {
        Self {
            llm,
            system_prompt: classification_system_prompt(capabilities),
            options: CompletionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn classify(
        &self,
        utterance: &str,
        context: &[ConversationTurn],
    ) -> Result<Understanding, HiveError> {
        let detected = detect(utterance);
        let user_prompt = classification_user_prompt(utterance, context);
        tracing::debug!(language = %detected.language, "classifying utterance");

        let raw = complete_prompt(
            self.llm.as_ref(),
            &self.system_prompt,
            &user_prompt,
            &self.options,
        )
        .await?;

        match parse_oracle::<OracleUnderstanding>(&raw) {
            OracleOutcome::Parsed(oracle) => {
                let understanding = Understanding::from_oracle(utterance, oracle, &detected);
                tracing::info!(
                    intent = %understanding.intent(),
                    response_type = %understanding.response_type(),
                    agents = ?understanding.selected_agents(),
                    confidence = understanding.confidence(),
                    "utterance classified"
                );
                Ok(understanding)
            }
            OracleOutcome::ParseError(raw) => {
                tracing::warn!(raw = %raw, "classifier reply is not JSON, degrading to clarification");
                Ok(Understanding::degraded(utterance, &detected))
            }
        }
    }
}
