//! 默认 Agent 运行时：按 AgentId 分派到具体实现
//!
//! 生成类 Agent（content / knowledge-enhancer / code-generator / platform-helper / web-analyser）
//! 调用 Oracle；database / crm 操作 RecipientStore；投递类 Agent 走 ChannelSender。
//! 存储调用受 storage_timeout 约束，投递受 send_timeout 约束。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::agents::database::{DatabaseAgent, CUSTOMERS, LEADS};
use crate::agents::delivery::{channel_for, deliver};
use crate::agents::files::{documents_to_csv, strip_fence, FileFormat, GeneratedFile};
use crate::agents::web::{find_url, WebFetcher};
use crate::agents::{AgentExecutor, AgentId, AgentOutcome, AgentRequest};
use crate::channels::{Channel, ChannelSender};
use crate::core::{with_timeout, HiveError};
use crate::knowledge::KnowledgeRetriever;
use crate::llm::{complete_prompt, CompletionOptions, LlmClient};
use crate::routing::SubtaskKind;
use crate::store::{Document, RecipientStore};

const CONTENT_PROMPT: &str = "You are a business copywriter. Write the requested content only, \
ready to send, in the user's language. For e-mails start with a line `Subject: ...`. \
Do not explain what you wrote.";

const ENHANCER_PROMPT: &str = "You polish business messages. Improve clarity and tone of the draft, \
keep its language and meaning, and use the reference notes when relevant. Return only the final text.";

const CODE_PROMPT: &str = "You are a senior software engineer. Answer with working code and a short explanation.";

const PLATFORM_PROMPT: &str = "You help users of a business assistant platform (customers, campaigns, \
email and WhatsApp sending, files). Answer briefly in the user's language using the reference notes.";

const WEB_PROMPT: &str = "You analyse web pages for a business owner. Summarise the page and answer \
the request in the user's language.";

const FILE_PROMPT: &str = "You produce file contents. Output only the file body in the requested format, \
without code fences or commentary.";

/// 运行时参数
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub completion: CompletionOptions,
    pub knowledge_top_k: usize,
    pub send_timeout: Duration,
    pub storage_timeout: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            completion: CompletionOptions::default().with_temperature(0.5),
            knowledge_top_k: 4,
            send_timeout: Duration::from_secs(120),
            storage_timeout: Duration::from_secs(10),
        }
    }
}

pub struct DefaultAgentRuntime {
    llm: Arc<dyn LlmClient>,
    knowledge: Arc<dyn KnowledgeRetriever>,
    store: Arc<dyn RecipientStore>,
    channels: HashMap<Channel, Arc<dyn ChannelSender>>,
    fetcher: WebFetcher,
    options: RuntimeOptions,
}

impl DefaultAgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        knowledge: Arc<dyn KnowledgeRetriever>,
        store: Arc<dyn RecipientStore>,
    ) -> Self {
        Self {
            llm,
            knowledge,
            store,
            channels: HashMap::new(),
            fetcher: WebFetcher::default(),
            options: RuntimeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    /// 注册渠道；同一渠道重复注册时后者覆盖前者
    pub fn with_channel(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.channels.insert(sender.channel(), sender);
        self
    }

    pub fn has_channel(&self, channel: Channel) -> bool {
        self.channels.contains_key(&channel)
    }

    fn user_prompt(request: &AgentRequest, extra: &str) -> String {
        let mut prompt = format!(
            "Language: {}\nUser request: {}\nYour task: {}\nEntities: {}\nPrevious steps:\n{}",
            request.language.code(),
            request.utterance,
            request.subtask.action,
            serde_json::Value::Object(request.entities.clone()),
            request.previous_summary()
        );
        if !extra.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(extra);
        }
        prompt
    }

    async fn generate(&self, system: &str, request: &AgentRequest, extra: &str) -> Result<AgentOutcome, HiveError> {
        let raw = complete_prompt(
            self.llm.as_ref(),
            system,
            &Self::user_prompt(request, extra),
            &self.options.completion,
        )
        .await?;
        Ok(AgentOutcome::from_text(raw))
    }

    async fn reference_notes(&self, request: &AgentRequest) -> Result<String, HiveError> {
        let query = format!("{} {}", request.utterance, request.subtask.action);
        with_timeout(
            "knowledge retrieval",
            self.options.storage_timeout,
            self.knowledge
                .retrieve(&query, &request.user_id, self.options.knowledge_top_k),
        )
        .await
    }

    async fn enhance(&self, request: &AgentRequest) -> Result<AgentOutcome, HiveError> {
        let notes = self.reference_notes(request).await?;
        let draft = request
            .latest_output_from(&[AgentId::Content])
            .map(|s| s.output.as_str())
            .unwrap_or(request.utterance.as_str());
        let extra = format!(
            "Draft to polish:\n{}\n\nReference notes:\n{}",
            draft,
            if notes.is_empty() { "(none)" } else { notes.as_str() }
        );
        self.generate(ENHANCER_PROMPT, request, &extra).await
    }

    async fn platform_help(&self, request: &AgentRequest) -> Result<AgentOutcome, HiveError> {
        let notes = self.reference_notes(request).await?;
        self.generate(PLATFORM_PROMPT, request, &format!("Reference notes:\n{}", notes))
            .await
    }

    async fn database(&self, request: &AgentRequest, collection: &str) -> Result<AgentOutcome, HiveError> {
        let agent = DatabaseAgent {
            llm: self.llm.as_ref(),
            store: self.store.as_ref(),
            options: self.options.completion.with_temperature(0.0),
        };
        if request.subtask.kind == SubtaskKind::RecipientResolution {
            with_timeout(
                "recipient lookup",
                self.options.storage_timeout,
                agent.resolve_recipients(request),
            )
            .await
        } else {
            agent.run(request, collection).await
        }
    }

    async fn send(&self, agent: AgentId, request: &AgentRequest) -> Result<AgentOutcome, HiveError> {
        let Some(channel) = channel_for(agent) else {
            return Ok(AgentOutcome::error(format!("{} is not a delivery agent", agent)));
        };
        match self.channels.get(&channel) {
            Some(sender) => deliver(sender.as_ref(), request, self.options.send_timeout).await,
            None => Ok(AgentOutcome::error(format!("{} channel is not configured", channel))),
        }
    }

    async fn create_file(&self, request: &AgentRequest) -> Result<AgentOutcome, HiveError> {
        let format = FileFormat::detect(&request.utterance);
        let records: Vec<Document> = request
            .previous
            .iter()
            .rev()
            .filter_map(|s| s.data.as_ref())
            .find_map(|d| d.get("records").or_else(|| d.get("recipients")))
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_object().cloned()).collect())
            .unwrap_or_default();

        let content = if format == FileFormat::Csv && !records.is_empty() {
            documents_to_csv(&records)
        } else {
            let raw = complete_prompt(
                self.llm.as_ref(),
                FILE_PROMPT,
                &Self::user_prompt(request, &format!("Format: {}", format.label())),
                &self.options.completion,
            )
            .await?;
            strip_fence(&raw).to_string()
        };
        if content.trim().is_empty() {
            return Ok(AgentOutcome::Empty);
        }
        let stem = if records.is_empty() { "document" } else { "records" };
        let file = GeneratedFile::new(stem, format, content);
        Ok(AgentOutcome::with_data(
            format!("Created {}", file.file_name),
            file.to_data(),
        ))
    }

    async fn analyse_web(&self, request: &AgentRequest) -> Result<AgentOutcome, HiveError> {
        let Some(url) = find_url(&request.utterance).or_else(|| find_url(&request.subtask.action)) else {
            return Ok(AgentOutcome::error("no URL found in the request"));
        };
        let page = match self.fetcher.fetch(&url).await {
            Ok(page) => page,
            Err(e) => return Ok(AgentOutcome::error(format!("could not fetch {}: {}", url, e))),
        };
        self.generate(WEB_PROMPT, request, &format!("Page {}:\n{}", url, page))
            .await
    }
}

#[async_trait]
impl AgentExecutor for DefaultAgentRuntime {
    async fn execute(&self, agent: AgentId, request: &AgentRequest) -> Result<AgentOutcome, HiveError> {
        tracing::debug!(agent = %agent, task = %request.subtask.action, "executing agent");
        match agent {
            AgentId::Content => self.generate(CONTENT_PROMPT, request, "").await,
            AgentId::KnowledgeEnhancer => self.enhance(request).await,
            AgentId::Database => self.database(request, CUSTOMERS).await,
            AgentId::Crm => self.database(request, LEADS).await,
            AgentId::EmailSender | AgentId::WhatsappSender | AgentId::Caller => {
                self.send(agent, request).await
            }
            AgentId::FileCreator => self.create_file(request).await,
            AgentId::WebAnalyser => self.analyse_web(request).await,
            AgentId::CodeGenerator => self.generate(CODE_PROMPT, request, "").await,
            AgentId::PlatformHelper => self.platform_help(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::StepOutput;
    use crate::channels::DryRunSender;
    use crate::intent::Language;
    use crate::knowledge::{InMemoryKnowledge, SYSTEM_NAMESPACE};
    use crate::llm::MockLlmClient;
    use crate::routing::Subtask;
    use crate::store::InMemoryRecipientStore;
    use serde_json::{json, Map};

    fn request(agent: AgentId, utterance: &str) -> AgentRequest {
        AgentRequest {
            user_id: "a@x.io".into(),
            utterance: utterance.into(),
            subtask: Subtask::new(utterance, agent),
            language: Language::En,
            entities: Map::new(),
            context_references: Map::new(),
            previous: Vec::new(),
        }
    }

    fn runtime(llm: Arc<MockLlmClient>, knowledge: Arc<InMemoryKnowledge>) -> DefaultAgentRuntime {
        DefaultAgentRuntime::new(llm, knowledge, Arc::new(InMemoryRecipientStore::new()))
    }

    #[tokio::test]
    async fn test_content_agent_returns_draft() {
        let llm = Arc::new(MockLlmClient::with_replies(["Subject: Sale\nHello!"]));
        let rt = runtime(llm, Arc::new(InMemoryKnowledge::new()));
        let outcome = rt
            .execute(AgentId::Content, &request(AgentId::Content, "prepare an email campaign"))
            .await
            .unwrap();
        assert_eq!(outcome.output(), Some("Subject: Sale\nHello!"));
    }

    #[tokio::test]
    async fn test_enhancer_sees_draft_and_knowledge() {
        let llm = Arc::new(MockLlmClient::with_replies(["Polished"]));
        let kb = Arc::new(InMemoryKnowledge::new());
        kb.add(SYSTEM_NAMESPACE, "Campaign emails must include an unsubscribe link").await;
        let rt = runtime(llm.clone(), kb);

        let mut req = request(AgentId::KnowledgeEnhancer, "polish the campaign emails");
        req.previous.push(StepOutput { agent: AgentId::Content, output: "Rough draft".into(), data: None });
        let outcome = rt.execute(AgentId::KnowledgeEnhancer, &req).await.unwrap();

        assert_eq!(outcome.output(), Some("Polished"));
        let prompt = llm.user_prompt(0).unwrap();
        assert!(prompt.contains("Rough draft"));
        assert!(prompt.contains("unsubscribe"));
    }

    #[tokio::test]
    async fn test_missing_channel_is_agent_error() {
        let rt = runtime(Arc::new(MockLlmClient::default()), Arc::new(InMemoryKnowledge::new()));
        let outcome = rt
            .execute(AgentId::Caller, &request(AgentId::Caller, "call +971500000001"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AgentOutcome::error("call channel is not configured")
        );
    }

    #[tokio::test]
    async fn test_whatsapp_goes_through_registered_channel() {
        let sender = Arc::new(DryRunSender::new(Channel::WhatsApp));
        let rt = runtime(Arc::new(MockLlmClient::default()), Arc::new(InMemoryKnowledge::new()))
            .with_channel(sender.clone());
        let mut req = request(AgentId::WhatsappSender, "send the offer to +971500000001");
        req.previous.push(StepOutput { agent: AgentId::Content, output: "Offer!".into(), data: None });

        let outcome = rt.execute(AgentId::WhatsappSender, &req).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(sender.sent(), vec![("+971500000001".to_string(), "Offer!".to_string())]);
    }

    #[tokio::test]
    async fn test_file_creator_exports_previous_records_as_csv() {
        let llm = Arc::new(MockLlmClient::default());
        let rt = runtime(llm.clone(), Arc::new(InMemoryKnowledge::new()));
        let mut req = request(AgentId::FileCreator, "export my customers to excel");
        req.previous.push(StepOutput {
            agent: AgentId::Database,
            output: "2 records".into(),
            data: Some(json!({"records": [{"name": "Ali"}, {"name": "Sara"}]})),
        });

        let outcome = rt.execute(AgentId::FileCreator, &req).await.unwrap();
        let data = outcome.data().unwrap();
        assert_eq!(data["file_name"], "records.csv");
        assert_eq!(data["file_content"], "bmFtZQpBbGkKU2FyYQo=");
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_web_analyser_without_url_fails_fast() {
        let llm = Arc::new(MockLlmClient::default());
        let rt = runtime(llm.clone(), Arc::new(InMemoryKnowledge::new()));
        let outcome = rt
            .execute(AgentId::WebAnalyser, &request(AgentId::WebAnalyser, "analyse my website"))
            .await
            .unwrap();
        assert!(!outcome.is_success());
        assert_eq!(llm.call_count(), 0);
    }
}
