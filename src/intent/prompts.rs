//! 意图识别 prompt

use crate::agents::{AgentId, CapabilityTable};
use crate::intent::types::{
    understanding_schema_json, CoordinationType, Intent, ResponseType, Tone, Urgency,
};
use crate::memory::{render_context, ConversationTurn};

/// 意图识别的 system prompt：分类体系、Agent 选择规则与回复 JSON Schema
pub fn classification_system_prompt(capabilities: &CapabilityTable) -> String {
    format!(
        r#"You are the intent-understanding layer of a multi-agent business assistant.
Users write in Arabic (any dialect), English or French. Analyse the user's latest message
using the conversation history and reply with ONE JSON object and nothing else.

Taxonomy:
- intent: {intents}
- tone: {tones}
- urgency: {urgencies}
- language: ISO code (ar, en, fr, ...); dialect: free text, "standard" when unsure
- response_type: {response_types}
- coordination_type: {coordination}

Available agents ({vocabulary}):
{agents}

Rules:
1. Greetings, small talk and questions you can answer yourself are "simple": put the answer in
   "direct_response" (same language as the user) and leave "selected_agents" empty.
2. Anything that drafts content, touches customer data, sends messages, creates files,
   analyses websites or generates code is "agent"; list the agents in execution order.
3. Only select what was asked. "prepare", "draft", "write" (جهز، حضر، اكتب / prépare, rédige)
   never imply sending. "send" (أرسل، ابعت / envoie) implies delivery.
4. Resolve references such as "them", "it", "لهم", "leur" from the conversation history and
   record them in "context_references" (reference -> resolved entity).
5. If the request is ambiguous or cannot be carried out without more information, set
   "needs_clarification": true, ask ONE short question in the user's language in
   "clarification_question", and select no agents.
6. Entities are free-form: recipients, topics, dates, names, emails, phones, channels.

Reply JSON schema:
{schema}"#,
        intents = Intent::labels(),
        tones = Tone::labels(),
        urgencies = Urgency::labels(),
        response_types = ResponseType::labels(),
        coordination = CoordinationType::labels(),
        vocabulary = AgentId::vocabulary(),
        agents = capabilities.describe(),
        schema = understanding_schema_json(),
    )
}

/// 意图识别的 user prompt：历史对话 + 当前输入
pub fn classification_user_prompt(utterance: &str, context: &[ConversationTurn]) -> String {
    format!(
        "Conversation history (oldest first):\n{}\n\nLatest user message:\n{}",
        render_context(context),
        utterance
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_lists_taxonomy_and_agents() {
        let prompt = classification_system_prompt(&CapabilityTable::builtin());
        assert!(prompt.contains("campaign"));
        assert!(prompt.contains("whatsapp-sender"));
        assert!(prompt.contains("\"properties\""));
    }

    #[test]
    fn test_user_prompt_embeds_context() {
        let context = vec![ConversationTurn::user("our customers are Ali and Mona")];
        let prompt = classification_user_prompt("send them a message", &context);
        assert!(prompt.contains("user: our customers are Ali and Mona"));
        assert!(prompt.ends_with("send them a message"));
    }
}
