//! TaskDecomposer：把一个请求拆成有序子任务
//!
//! 「只做被要求的事」：准备 / 起草 / 撰写只产生内容创作（+ 润色）子任务；
//! 发送才额外产生收件人解析与投递子任务。该规则写在 Oracle prompt 中（三种语言的正反例），
//! Oracle 的结果再经 `normalize` 统一施加顺序约束：
//! 收件人解析在最前，同一渠道的 内容创作 < 润色 < 投递。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agents::{AgentId, CapabilityTable};
use crate::core::HiveError;
use crate::intent::validation::words;
use crate::intent::{contains_explicit_contact, has_reference_pronoun};
use crate::llm::{complete_prompt, parse_oracle, CompletionOptions, LlmClient, OracleOutcome};
use crate::memory::{render_context, ConversationTurn};

/// 子任务类别（由负责的 Agent 与动作推导）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubtaskKind {
    RecipientResolution,
    ContentCreation,
    Enhancement,
    Delivery,
    Other,
}

impl SubtaskKind {
    /// 顺序约束中的阶段；None 表示不参与重排
    fn phase(&self) -> Option<u8> {
        match self {
            SubtaskKind::RecipientResolution => Some(0),
            SubtaskKind::ContentCreation => Some(1),
            SubtaskKind::Enhancement => Some(2),
            SubtaskKind::Delivery => Some(3),
            SubtaskKind::Other => None,
        }
    }

    /// 依赖前序输出的子任务
    pub fn is_dependent(&self) -> bool {
        !matches!(self, SubtaskKind::ContentCreation | SubtaskKind::Other)
    }
}

const RESOLUTION_WORDS: &[&str] = &[
    "recipient", "retrieve", "fetch", "look up", "lookup", "resolve", "find the contacts",
    "get the contacts", "destinataire", "récupér", "المستلم", "جلب", "استرجاع", "استخراج",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub action: String,
    pub responsible_agent: AgentId,
    pub kind: SubtaskKind,
}

impl Subtask {
    pub fn new(action: impl Into<String>, responsible_agent: AgentId) -> Self {
        let action = action.into();
        let kind = match responsible_agent {
            AgentId::Content => SubtaskKind::ContentCreation,
            AgentId::KnowledgeEnhancer => SubtaskKind::Enhancement,
            a if a.is_delivery() => SubtaskKind::Delivery,
            AgentId::Database => {
                let lower = action.to_lowercase();
                if RESOLUTION_WORDS.iter().any(|w| lower.contains(w)) {
                    SubtaskKind::RecipientResolution
                } else {
                    SubtaskKind::Other
                }
            }
            _ => SubtaskKind::Other,
        };
        Self {
            action,
            responsible_agent,
            kind,
        }
    }

    fn recipient_resolution() -> Self {
        Self {
            action: "Retrieve the recipients referenced earlier in the conversation".to_string(),
            responsible_agent: AgentId::Database,
            kind: SubtaskKind::RecipientResolution,
        }
    }

    fn enhancement_for(content: &Subtask) -> Self {
        Self {
            action: format!("Refine and polish the drafted content: {}", content.action),
            responsible_agent: AgentId::KnowledgeEnhancer,
            kind: SubtaskKind::Enhancement,
        }
    }
}

/// 拆解结果：Degraded 表示 Oracle 输出不可用，调用方应转为澄清
#[derive(Debug, Clone, PartialEq)]
pub enum Decomposition {
    Plan(Vec<Subtask>),
    Degraded { reason: String },
}

#[derive(Debug, Deserialize)]
struct OracleSubtask {
    action: String,
    #[serde(alias = "agent")]
    responsible_agent: String,
}

#[derive(Debug, Deserialize)]
struct OracleDecomposition {
    #[serde(alias = "tasks", alias = "steps")]
    subtasks: Vec<OracleSubtask>,
}

const DRAFT_VERBS: &[&str] = &[
    "draft", "prepare", "write", "compose", "prépare", "rédige", "rédiger", "écris", "écrire",
    "جهز", "حضر", "اكتب", "صياغة", "حضّر", "جهّز",
];

const SEND_VERBS: &[&str] = &[
    "send", "deliver", "dispatch", "forward", "blast", "envoie", "envoyer", "envoyez", "expédie",
    "transmets", "أرسل", "ارسل", "إرسال", "ارسال", "ابعت", "ابعث", "بعت", "وصّل",
];

const MESSAGE_WORDS: &[&str] = &["message", "sms", "رسالة", "رسائل", "campagne", "campaign", "حملة"];

/// 英文 / 法文关键词允许的屈折后缀
const LATIN_SUFFIXES: &[&str] = &["", "s", "es", "d", "ed", "ing"];

/// 单词是否是关键词本身或其屈折形式；非 ASCII 关键词（阿拉伯语、带重音的法语）
/// 按前缀匹配，允许连写的代词后缀与 و / ف 连词前缀
fn word_matches(word: &str, keyword: &str) -> bool {
    if !keyword.is_ascii() {
        return word.starts_with(keyword)
            || ['و', 'ف']
                .iter()
                .filter_map(|p| word.strip_prefix(*p))
                .any(|rest| rest.starts_with(keyword));
    }
    if let Some(rest) = word.strip_prefix(keyword) {
        return LATIN_SUFFIXES.contains(&rest);
    }
    keyword
        .strip_suffix('e')
        .and_then(|stem| word.strip_prefix(stem))
        .map_or(false, |rest| rest == "ing")
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    words(text)
        .iter()
        .any(|w| keywords.iter().any(|k| word_matches(w, k)))
}

/// 话语只包含起草类动词、没有发送类动词
pub fn is_draft_only(utterance: &str) -> bool {
    contains_any(utterance, DRAFT_VERBS) && !contains_any(utterance, SEND_VERBS)
}

const DECOMPOSITION_PROMPT: &str = r#"You split one business-assistant request into the minimal ordered list of subtasks.
Reply with ONE JSON object: {"subtasks": [{"action": "...", "responsible_agent": "..."}]}

Agents (use these identifiers only):
{agents}

Hard rules:
1. Do ONLY what was asked. Verbs meaning prepare / draft / write produce content creation
   (content) followed by refinement (knowledge-enhancer) and NOTHING else: no database lookup,
   no email-sender, no whatsapp-sender, no caller.
2. Verbs meaning send additionally produce recipient retrieval (database) first and a delivery
   step (email-sender / whatsapp-sender / caller) last.
3. When the user refers to people mentioned earlier ("them", "لهم", "leur") and gives no email or
   phone, the first subtask retrieves those recipients (database).
4. Order: content -> knowledge-enhancer -> delivery.

Examples:
- en  "draft an email about our summer sale"
      -> content, knowledge-enhancer            (NOT email-sender: nothing was asked to be sent)
- en  "send an email about our summer sale to all customers"
      -> database, content, knowledge-enhancer, email-sender
- ar  "جهزلي حملة ايميلات"
      -> content, knowledge-enhancer            (NOT email-sender: جهز means prepare)
- ar  "أرسل لهم رسالة واتساب"
      -> database, content, knowledge-enhancer, whatsapp-sender
- fr  "Prépare un email pour la promotion"
      -> content, knowledge-enhancer            (PAS email-sender)
- fr  "Envoie un email à tous les clients"
      -> database, content, knowledge-enhancer, email-sender"#;

pub struct TaskDecomposer {
    llm: Arc<dyn LlmClient>,
    capabilities: Arc<CapabilityTable>,
    options: CompletionOptions,
}

impl TaskDecomposer {
    pub fn new(llm: Arc<dyn LlmClient>, capabilities: Arc<CapabilityTable>) -> Self {
        Self {
            llm,
            capabilities,
            options: CompletionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    fn system_prompt(&self) -> String {
        DECOMPOSITION_PROMPT.replace("{agents}", &self.capabilities.describe())
    }

    /// 调用 Oracle 拆解请求；Oracle 不可达时返回 Err，输出不可用时返回 Degraded
    pub async fn decompose(
        &self,
        utterance: &str,
        context: &[ConversationTurn],
        references: &Map<String, Value>,
    ) -> Result<Decomposition, HiveError> {
        let user_prompt = format!(
            "Conversation history (oldest first):\n{}\n\nResolved references: {}\n\nRequest:\n{}",
            render_context(context),
            Value::Object(references.clone()),
            utterance
        );
        let raw = complete_prompt(
            self.llm.as_ref(),
            &self.system_prompt(),
            &user_prompt,
            &self.options,
        )
        .await?;

        let oracle = match parse_oracle::<OracleDecomposition>(&raw) {
            OracleOutcome::Parsed(d) => d,
            OracleOutcome::ParseError(raw) => {
                tracing::warn!(raw = %raw, "decomposition reply is not JSON");
                return Ok(Decomposition::Degraded {
                    reason: "decomposition reply could not be parsed".to_string(),
                });
            }
        };

        let mut subtasks = Vec::with_capacity(oracle.subtasks.len());
        for step in oracle.subtasks {
            match step.responsible_agent.parse::<AgentId>() {
                Ok(agent) => subtasks.push(Subtask::new(step.action, agent)),
                Err(e) => {
                    tracing::warn!("{}", e);
                    return Ok(Decomposition::Degraded {
                        reason: e.to_string(),
                    });
                }
            }
        }
        if subtasks.is_empty() {
            return Ok(Decomposition::Degraded {
                reason: "decomposition produced no subtasks".to_string(),
            });
        }

        let references_recipients = !references.is_empty()
            || (!context.is_empty() && has_reference_pronoun(utterance));
        let plan = self.normalize(utterance, subtasks, references_recipients);
        tracing::info!(
            steps = ?plan.iter().map(|s| s.responsible_agent.as_str()).collect::<Vec<_>>(),
            "request decomposed"
        );
        Ok(Decomposition::Plan(plan))
    }

    fn targets_channel(&self, utterance: &str, subtasks: &[Subtask]) -> bool {
        let lower = utterance.to_lowercase();
        subtasks.iter().any(|s| s.kind == SubtaskKind::Delivery)
            || [AgentId::EmailSender, AgentId::WhatsappSender, AgentId::Caller]
                .iter()
                .filter_map(|a| self.capabilities.get(*a))
                .any(|p| p.affinity_hits(&lower) > 0)
            || contains_any(utterance, MESSAGE_WORDS)
    }

    /// 施加确定性约束：
    /// 1. 仅起草的请求去掉投递步骤（以及随之无用的收件人解析）
    /// 2. 引用已有收件人且话语中没有显式联系方式时，在最前插入收件人解析
    /// 3. 面向渠道的内容创作之后缺少润色时补上
    /// 4. 收件人解析、内容、润色、投递按阶段重排，其他步骤位置不变
    pub fn normalize(
        &self,
        utterance: &str,
        mut subtasks: Vec<Subtask>,
        references_recipients: bool,
    ) -> Vec<Subtask> {
        if is_draft_only(utterance) && subtasks.iter().any(|s| s.kind == SubtaskKind::Delivery) {
            tracing::warn!(
                utterance,
                "draft-only request produced delivery steps, dropping them"
            );
            subtasks.retain(|s| s.kind != SubtaskKind::Delivery);
        }
        let has_delivery = subtasks.iter().any(|s| s.kind == SubtaskKind::Delivery);
        if !has_delivery {
            subtasks.retain(|s| s.kind != SubtaskKind::RecipientResolution);
        }

        let has_content = subtasks.iter().any(|s| s.kind == SubtaskKind::ContentCreation);
        let has_enhancement = subtasks.iter().any(|s| s.kind == SubtaskKind::Enhancement);
        if has_content && !has_enhancement && self.targets_channel(utterance, &subtasks) {
            if let Some(last_content) = subtasks
                .iter()
                .rposition(|s| s.kind == SubtaskKind::ContentCreation)
            {
                let enhancement = Subtask::enhancement_for(&subtasks[last_content]);
                subtasks.insert(last_content + 1, enhancement);
            }
        }

        let mut resolution: Vec<Subtask> = Vec::new();
        subtasks.retain(|s| {
            if s.kind == SubtaskKind::RecipientResolution {
                resolution.push(s.clone());
                false
            } else {
                true
            }
        });
        if resolution.is_empty()
            && has_delivery
            && references_recipients
            && !contains_explicit_contact(utterance)
        {
            resolution.push(Subtask::recipient_resolution());
        }

        let slots: Vec<usize> = subtasks
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind.phase().is_some())
            .map(|(i, _)| i)
            .collect();
        let mut phased: Vec<Subtask> = slots.iter().map(|&i| subtasks[i].clone()).collect();
        phased.sort_by_key(|s| s.kind.phase());
        for (slot, step) in slots.into_iter().zip(phased) {
            subtasks[slot] = step;
        }

        resolution.into_iter().chain(subtasks).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use serde_json::json;

    fn decomposer(replies: &[&str]) -> TaskDecomposer {
        let mock = Arc::new(MockLlmClient::with_replies(replies.iter().copied()));
        TaskDecomposer::new(mock, Arc::new(CapabilityTable::builtin()))
    }

    fn agents(plan: &[Subtask]) -> Vec<AgentId> {
        plan.iter().map(|s| s.responsible_agent).collect()
    }

    fn plan(d: Decomposition) -> Vec<Subtask> {
        match d {
            Decomposition::Plan(p) => p,
            Decomposition::Degraded { reason } => panic!("degraded: {}", reason),
        }
    }

    fn position(plan: &[Subtask], kind: SubtaskKind) -> Option<usize> {
        plan.iter().position(|s| s.kind == kind)
    }

    #[test]
    fn test_kind_derivation() {
        assert_eq!(
            Subtask::new("Retrieve recipients", AgentId::Database).kind,
            SubtaskKind::RecipientResolution
        );
        assert_eq!(
            Subtask::new("Add customer Sara", AgentId::Database).kind,
            SubtaskKind::Other
        );
        assert_eq!(Subtask::new("call", AgentId::Caller).kind, SubtaskKind::Delivery);
    }

    #[test]
    fn test_draft_only_detection_across_languages() {
        assert!(is_draft_only("draft an email about our sale"));
        assert!(is_draft_only("جهزلي حملة ايميلات"));
        assert!(is_draft_only("Prépare un email pour la promotion"));
        assert!(!is_draft_only("prepare and send the newsletter"));
        assert!(!is_draft_only("أرسل لهم رسالة"));
        assert!(!is_draft_only("Envoie un email à tous les clients"));
        assert!(is_draft_only("rewrite the sender signature and prepare a draft"));
        assert!(!is_draft_only("writing the copy, then sending it"));
    }

    #[test]
    fn test_keywords_match_whole_words() {
        assert!(!contains_any("update the sender name", SEND_VERBS));
        assert!(!contains_any("rewrite the footer", DRAFT_VERBS));
        assert!(contains_any("preparing the launch", DRAFT_VERBS));
        assert!(contains_any("وارسل العرض", SEND_VERBS));
        assert!(contains_any("ابعتلهم العرض", SEND_VERBS));
    }

    #[tokio::test]
    async fn test_draft_request_never_delivers() {
        let cases = [
            "draft an email about our summer sale",
            "جهزلي حملة ايميلات",
            "Prépare un email pour la promotion",
        ];
        for utterance in cases {
            // Oracle 越界给出投递步骤
            let d = decomposer(&[r#"{"subtasks": [
                {"action": "write the email", "responsible_agent": "content"},
                {"action": "send it", "responsible_agent": "email-sender"}
            ]}"#]);
            let p = plan(d.decompose(utterance, &[], &Map::new()).await.unwrap());
            assert_eq!(
                agents(&p),
                vec![AgentId::Content, AgentId::KnowledgeEnhancer],
                "{}",
                utterance
            );
        }
    }

    #[tokio::test]
    async fn test_send_with_reference_resolves_recipients_first() {
        let d = decomposer(&[r#"{"subtasks": [
            {"action": "send via whatsapp", "responsible_agent": "whatsapp-sender"},
            {"action": "write the message", "responsible_agent": "content"}
        ]}"#]);
        let context = vec![ConversationTurn::assistant("Found 3 customers: Ali, Mona, Sami")];
        let refs = json!({"them": ["Ali", "Mona", "Sami"]});
        let p = plan(
            d.decompose("أرسل لهم رسالة", &context, refs.as_object().unwrap())
                .await
                .unwrap(),
        );
        assert_eq!(
            agents(&p),
            vec![
                AgentId::Database,
                AgentId::Content,
                AgentId::KnowledgeEnhancer,
                AgentId::WhatsappSender
            ]
        );
        assert_eq!(p[0].kind, SubtaskKind::RecipientResolution);
    }

    #[tokio::test]
    async fn test_explicit_contact_skips_resolution() {
        let d = decomposer(&[r#"{"subtasks": [
            {"action": "write", "responsible_agent": "content"},
            {"action": "polish", "responsible_agent": "knowledge-enhancer"},
            {"action": "send", "responsible_agent": "email-sender"}
        ]}"#]);
        let context = vec![ConversationTurn::user("hi")];
        let p = plan(
            d.decompose("send them an offer at ali@shop.io", &context, &Map::new())
                .await
                .unwrap(),
        );
        assert_eq!(agents(&p)[0], AgentId::Content);
    }

    #[tokio::test]
    async fn test_ordering_invariant_holds() {
        let d = decomposer(&[r#"{"tasks": [
            {"action": "send", "agent": "email_sender"},
            {"action": "polish", "agent": "knowledge-enhancer"},
            {"action": "export the list", "agent": "file-creator"},
            {"action": "write", "agent": "content"}
        ]}"#]);
        let p = plan(
            d.decompose("send the newsletter to all customers", &[], &Map::new())
                .await
                .unwrap(),
        );
        let content = position(&p, SubtaskKind::ContentCreation).unwrap();
        let enhancement = position(&p, SubtaskKind::Enhancement).unwrap();
        let delivery = position(&p, SubtaskKind::Delivery).unwrap();
        assert!(content < enhancement && enhancement < delivery);
        assert_eq!(p[2].responsible_agent, AgentId::FileCreator);
    }

    #[tokio::test]
    async fn test_unknown_agent_degrades() {
        let d = decomposer(&[r#"{"subtasks": [{"action": "x", "responsible_agent": "seo-wizard"}]}"#]);
        let result = d.decompose("optimize my site", &[], &Map::new()).await.unwrap();
        assert!(matches!(result, Decomposition::Degraded { .. }));
    }

    #[tokio::test]
    async fn test_unparseable_reply_degrades() {
        let d = decomposer(&["I would first write, then send."]);
        let result = d.decompose("send it", &[], &Map::new()).await.unwrap();
        assert!(matches!(result, Decomposition::Degraded { .. }));
    }

    #[test]
    fn test_non_channel_content_gets_no_enhancement() {
        let d = decomposer(&[]);
        let p = d.normalize(
            "generate a product description",
            vec![Subtask::new("describe the product", AgentId::Content)],
            false,
        );
        assert_eq!(agents(&p), vec![AgentId::Content]);
    }
}
