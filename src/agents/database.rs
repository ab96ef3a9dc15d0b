//! database / crm Agent：收件人解析与基于 Oracle 结构化的 CRUD
//!
//! 所有读 / 删 / 改都经 ScopedQuery，带上请求用户作为 owner；更新由存储原地完成。

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::agents::{AgentOutcome, AgentRequest};
use crate::core::HiveError;
use crate::intent::mentions_audience;
use crate::llm::{complete_prompt, parse_oracle, CompletionOptions, LlmClient, OracleOutcome};
use crate::store::{Document, RecipientStore, ScopedQuery, OWNER_FIELD};

pub const CUSTOMERS: &str = "customers";
pub const LEADS: &str = "leads";

const CONTACT_FIELDS: &[&str] = &["email", "phone", "whatsapp", "mobile"];
const MATCH_FIELDS: &[&str] = &["name", "email", "phone", "whatsapp", "mobile"];

/// Oracle 产出的数据库操作
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DbCommand {
    #[serde(alias = "op", alias = "action")]
    pub operation: DbOperation,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub filter: Map<String, Value>,
    #[serde(default, alias = "data", alias = "fields")]
    pub document: Map<String, Value>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbOperation {
    #[serde(alias = "insert", alias = "add")]
    Create,
    #[serde(alias = "find", alias = "list", alias = "query")]
    Read,
    #[serde(alias = "modify", alias = "edit")]
    Update,
    #[serde(alias = "remove")]
    Delete,
}

const DB_PROMPT: &str = r#"You translate a business request into ONE database operation on the user's own records.
Reply with a single JSON object and nothing else:
{"operation": "create|read|update|delete", "collection": "<collection>", "filter": {...}, "document": {...}, "limit": <number or null>}
- filter: exact field matches (e.g. {"city": "Dubai"}); empty object means all of the user's records.
- document: fields to insert (create) or to set (update); empty for read/delete.
- Never include the owner field; it is added automatically.
- Field names are lowercase English (name, email, phone, city, company, status, notes)."#;

/// 上下文引用解析出的收件人条件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceMatch {
    /// 对象引用中的标量字段，须全部满足
    pub filter: Document,
    /// 字符串 / 数组引用中的姓名或联系方式，命中任一即可
    pub identifiers: Vec<String>,
}

impl ReferenceMatch {
    pub fn is_empty(&self) -> bool {
        self.filter.is_empty() && self.identifiers.is_empty()
    }

    /// 每个标识展开为 name / email / phone ... 上的备选条件
    pub fn alternatives(&self) -> Vec<Document> {
        let mut alternatives = Vec::new();
        for id in &self.identifiers {
            let compact: String = id.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
            for field in MATCH_FIELDS {
                for value in [id, &compact] {
                    let mut alt = Document::new();
                    alt.insert(field.to_string(), Value::String(value.clone()));
                    if !alternatives.contains(&alt) {
                        alternatives.push(alt);
                    }
                }
            }
        }
        alternatives
    }
}

fn push_identifier(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && !out.iter().any(|o| o == s) {
                out.push(s.to_string());
            }
        }
        Value::Number(n) => push_identifier(&Value::String(n.to_string()), out),
        Value::Array(items) => items.iter().for_each(|item| push_identifier(item, out)),
        Value::Object(obj) => MATCH_FIELDS
            .iter()
            .filter_map(|f| obj.get(*f))
            .for_each(|v| push_identifier(v, out)),
        _ => {}
    }
}

/// 上下文引用 -> 收件人条件
///
/// - `{"them": {"city": "Dubai"}}`：标量字段作为过滤条件
/// - `{"them": ["Ali", "+971500000001"]}` / `{"them": "Ali"}`：按姓名或联系方式任一匹配
pub fn reference_match(references: &Map<String, Value>) -> ReferenceMatch {
    let mut found = ReferenceMatch::default();
    for value in references.values() {
        match value {
            Value::Object(obj) => {
                for (k, v) in obj {
                    if k == OWNER_FIELD || k == "_id" {
                        continue;
                    }
                    match v {
                        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                            found.filter.insert(k.clone(), v.clone());
                        }
                        Value::Array(_) => push_identifier(v, &mut found.identifiers),
                        _ => {}
                    }
                }
            }
            other => push_identifier(other, &mut found.identifiers),
        }
    }
    found
}

/// 从文档中取出联系方式（邮箱 / 电话）
pub fn contacts_of(doc: &Document) -> Vec<String> {
    CONTACT_FIELDS
        .iter()
        .filter_map(|f| doc.get(*f).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn public_view(doc: &Document) -> Value {
    Value::Object(
        doc.iter()
            .filter(|(k, _)| k.as_str() != OWNER_FIELD)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

fn summarize(docs: &[Document]) -> String {
    docs.iter()
        .map(|d| {
            let name = d.get("name").and_then(Value::as_str).unwrap_or("-");
            let contacts = contacts_of(d);
            if contacts.is_empty() {
                format!("- {}", name)
            } else {
                format!("- {} ({})", name, contacts.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct DatabaseAgent<'a> {
    pub llm: &'a dyn LlmClient,
    pub store: &'a dyn RecipientStore,
    pub options: CompletionOptions,
}

impl DatabaseAgent<'_> {
    /// 解析前文引用的收件人：按引用中的字段或标识匹配用户自己的客户。
    /// 引用无法转成条件时报错；没有引用时只有话语泛指全体客户才读取全部
    pub async fn resolve_recipients(&self, request: &AgentRequest) -> Result<AgentOutcome, HiveError> {
        let mut builder = ScopedQuery::builder(CUSTOMERS).owner(request.user_id.as_str());
        if request.context_references.is_empty() {
            if !mentions_audience(&request.utterance) {
                tracing::info!(user = %request.user_id, "no recipient reference to resolve");
                return Ok(AgentOutcome::Empty);
            }
        } else {
            let reference = reference_match(&request.context_references);
            if reference.is_empty() {
                tracing::warn!(
                    references = %serde_json::Value::Object(request.context_references.clone()),
                    "references carry no usable recipient fields"
                );
                return Ok(AgentOutcome::error(
                    "could not tell which recipients were meant",
                ));
            }
            let alternatives = reference.alternatives();
            builder = builder.filters(reference.filter).any_of(alternatives);
        }
        let docs = self.store.query(&builder.build()?).await?;
        tracing::info!(user = %request.user_id, found = docs.len(), "resolved recipients");
        if docs.is_empty() {
            return Ok(AgentOutcome::Empty);
        }
        let recipients: Vec<Value> = docs.iter().map(public_view).collect();
        Ok(AgentOutcome::with_data(
            format!("Found {} recipient(s):\n{}", docs.len(), summarize(&docs)),
            json!({ "recipients": recipients }),
        ))
    }

    /// 由 Oracle 把请求翻译成一次操作后执行
    pub async fn run(
        &self,
        request: &AgentRequest,
        default_collection: &str,
    ) -> Result<AgentOutcome, HiveError> {
        let user_prompt = format!(
            "Default collection: {}\nRequest: {}\nSubtask: {}\nEntities: {}",
            default_collection,
            request.utterance,
            request.subtask.action,
            Value::Object(request.entities.clone())
        );
        let raw = complete_prompt(self.llm, DB_PROMPT, &user_prompt, &self.options).await?;
        let command = match parse_oracle::<DbCommand>(&raw) {
            OracleOutcome::Parsed(c) => c,
            OracleOutcome::ParseError(raw) => {
                tracing::warn!(raw = %raw, "database command could not be parsed");
                return Ok(AgentOutcome::error("could not understand the database request"));
            }
        };
        self.apply(request, default_collection, command).await
    }

    pub async fn apply(
        &self,
        request: &AgentRequest,
        default_collection: &str,
        command: DbCommand,
    ) -> Result<AgentOutcome, HiveError> {
        let collection = command
            .collection
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| default_collection.to_string());
        let owner = request.user_id.as_str();

        let mut builder = ScopedQuery::builder(collection.as_str())
            .owner(owner)
            .filters(command.filter);
        if let Some(limit) = command.limit {
            builder = builder.limit(limit);
        }

        match command.operation {
            DbOperation::Create => {
                if command.document.is_empty() {
                    return Ok(AgentOutcome::error("nothing to create"));
                }
                let id = self.store.insert(&collection, owner, command.document).await?;
                Ok(AgentOutcome::with_data(
                    format!("Created a record in {}", collection),
                    json!({ "id": id }),
                ))
            }
            DbOperation::Read => {
                let docs = self.store.query(&builder.build()?).await?;
                if docs.is_empty() {
                    return Ok(AgentOutcome::Empty);
                }
                let records: Vec<Value> = docs.iter().map(public_view).collect();
                Ok(AgentOutcome::with_data(
                    format!("{} record(s) in {}:\n{}", docs.len(), collection, summarize(&docs)),
                    json!({ "records": records }),
                ))
            }
            DbOperation::Delete => {
                let removed = self.store.query(&builder.delete().build()?).await?;
                Ok(AgentOutcome::with_data(
                    format!("Deleted {} record(s) from {}", removed.len(), collection),
                    json!({ "deleted": removed.len() }),
                ))
            }
            DbOperation::Update => {
                if command.document.is_empty() {
                    return Ok(AgentOutcome::error("no fields to update"));
                }
                let mut fields = command.document;
                fields.remove(OWNER_FIELD);
                let updated = self.store.query(&builder.update(fields).build()?).await?;
                if updated.is_empty() {
                    return Ok(AgentOutcome::Empty);
                }
                Ok(AgentOutcome::with_data(
                    format!("Updated {} record(s) in {}", updated.len(), collection),
                    json!({ "updated": updated.len() }),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentId;
    use crate::intent::Language;
    use crate::llm::MockLlmClient;
    use crate::routing::Subtask;
    use crate::store::InMemoryRecipientStore;

    fn request(user: &str, utterance: &str) -> AgentRequest {
        AgentRequest {
            user_id: user.to_string(),
            utterance: utterance.to_string(),
            subtask: Subtask::new(utterance, AgentId::Database),
            language: Language::En,
            entities: Map::new(),
            context_references: Map::new(),
            previous: Vec::new(),
        }
    }

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap_or_default()
    }

    async fn seeded() -> InMemoryRecipientStore {
        let store = InMemoryRecipientStore::new();
        store
            .insert(CUSTOMERS, "a@x.io", doc(json!({"name": "Ali", "email": "ali@c.io", "city": "Dubai"})))
            .await
            .unwrap();
        store
            .insert(CUSTOMERS, "a@x.io", doc(json!({"name": "Sara", "phone": "+971500000001", "city": "Cairo"})))
            .await
            .unwrap();
        store
            .insert(CUSTOMERS, "b@x.io", doc(json!({"name": "Omar", "email": "omar@c.io", "city": "Dubai"})))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_resolution_uses_reference_fields_and_owner() {
        let store = seeded().await;
        let llm = MockLlmClient::with_replies(Vec::<String>::new());
        let agent = DatabaseAgent { llm: &llm, store: &store, options: CompletionOptions::default() };

        let mut req = request("a@x.io", "أرسل لهم رسالة");
        req.context_references.insert("them".into(), json!({"city": "Dubai"}));
        let outcome = agent.resolve_recipients(&req).await.unwrap();
        let recipients = outcome.data().unwrap()["recipients"].as_array().unwrap().clone();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0]["email"], "ali@c.io");
        assert!(recipients[0].get(OWNER_FIELD).is_none());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_list_reference_resolves_only_named_customers() {
        let store = seeded().await;
        store
            .insert(CUSTOMERS, "a@x.io", doc(json!({"name": "Mona", "phone": "+971500000003"})))
            .await
            .unwrap();
        let llm = MockLlmClient::with_replies(Vec::<String>::new());
        let agent = DatabaseAgent { llm: &llm, store: &store, options: CompletionOptions::default() };

        let mut req = request("a@x.io", "send them the offer on whatsapp");
        req.context_references.insert("them".into(), json!(["Ali"]));
        let outcome = agent.resolve_recipients(&req).await.unwrap();
        let recipients = outcome.data().unwrap()["recipients"].as_array().unwrap().clone();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0]["name"], "Ali");

        req.context_references.insert("them".into(), json!("+971 500 000 003"));
        let outcome = agent.resolve_recipients(&req).await.unwrap();
        let recipients = outcome.data().unwrap()["recipients"].as_array().unwrap().clone();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0]["name"], "Mona");
    }

    #[tokio::test]
    async fn test_unusable_reference_never_reads_everything() {
        let store = seeded().await;
        let llm = MockLlmClient::with_replies(Vec::<String>::new());
        let agent = DatabaseAgent { llm: &llm, store: &store, options: CompletionOptions::default() };

        let mut req = request("a@x.io", "send them the offer");
        req.context_references.insert("them".into(), json!(null));
        let outcome = agent.resolve_recipients(&req).await.unwrap();
        assert!(!outcome.is_success());

        let outcome = agent.resolve_recipients(&request("a@x.io", "send them the offer")).await.unwrap();
        assert_eq!(outcome, AgentOutcome::Empty);

        let outcome = agent
            .resolve_recipients(&request("a@x.io", "send the offer to all customers"))
            .await
            .unwrap();
        assert_eq!(outcome.data().unwrap()["recipients"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_reference_match_shapes() {
        let refs = json!({"them": [{"name": "Ali"}, "sara@c.io"], "where": {"city": "Dubai"}});
        let found = reference_match(refs.as_object().unwrap());
        assert_eq!(found.identifiers, vec!["Ali", "sara@c.io"]);
        assert_eq!(found.filter["city"], "Dubai");
        assert!(reference_match(json!({"it": true}).as_object().unwrap()).is_empty());
    }

    #[tokio::test]
    async fn test_update_merges_and_keeps_scope() {
        let store = seeded().await;
        let llm = MockLlmClient::with_replies([
            r#"{"operation": "update", "filter": {"name": "Ali"}, "document": {"city": "Riyadh"}}"#,
        ]);
        let agent = DatabaseAgent { llm: &llm, store: &store, options: CompletionOptions::default() };
        let q = ScopedQuery::builder(CUSTOMERS).owner("a@x.io").filter("name", "Ali").build().unwrap();
        let before = store.query(&q).await.unwrap();

        let outcome = agent.run(&request("a@x.io", "Ali moved to Riyadh"), CUSTOMERS).await.unwrap();
        assert_eq!(outcome.output(), Some("Updated 1 record(s) in customers"));

        let docs = store.query(&q).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["city"], "Riyadh");
        assert_eq!(docs[0]["email"], "ali@c.io");
        assert_eq!(docs[0]["_id"], before[0]["_id"]);
    }

    #[tokio::test]
    async fn test_delete_all_is_scoped_to_requesting_user() {
        let store = seeded().await;
        let llm = MockLlmClient::with_replies([r#"{"operation": "delete", "filter": {}}"#]);
        let agent = DatabaseAgent { llm: &llm, store: &store, options: CompletionOptions::default() };

        agent.run(&request("a@x.io", "delete all my customers"), CUSTOMERS).await.unwrap();
        let left = store.query(&ScopedQuery::read(CUSTOMERS, "b@x.io").unwrap()).await.unwrap();
        assert_eq!(left.len(), 1);
        let mine = store.query(&ScopedQuery::read(CUSTOMERS, "a@x.io").unwrap()).await.unwrap();
        assert!(mine.is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_command_is_agent_error() {
        let store = seeded().await;
        let llm = MockLlmClient::with_replies(["I am not sure what you mean"]);
        let agent = DatabaseAgent { llm: &llm, store: &store, options: CompletionOptions::default() };
        let outcome = agent.run(&request("a@x.io", "do the thing"), CUSTOMERS).await.unwrap();
        assert!(!outcome.is_success());
    }
}
