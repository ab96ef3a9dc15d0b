//! 端到端路由测试：HiveBuilder + 预置 Oracle 回复 + DryRun 渠道

use std::sync::Arc;

use hive::agents::AgentId;
use hive::channels::{Channel, DryRunSender};
use hive::config::AppConfig;
use hive::core::{HiveBuilder, HiveComponents, RequestPhase, RunRequest, StepStatus};
use hive::llm::MockLlmClient;
use hive::memory::ConversationTurn;
use hive::store::{InMemoryRecipientStore, RecipientStore, ScopedQuery};
use serde_json::json;

struct Harness {
    hive: HiveComponents,
    llm: Arc<MockLlmClient>,
    email: Arc<DryRunSender>,
    whatsapp: Arc<DryRunSender>,
    store: Arc<InMemoryRecipientStore>,
}

fn harness(replies: &[&str]) -> Harness {
    let llm = Arc::new(MockLlmClient::with_replies(replies.iter().copied()));
    let email = Arc::new(DryRunSender::new(Channel::Email));
    let whatsapp = Arc::new(DryRunSender::new(Channel::WhatsApp));
    let store = Arc::new(InMemoryRecipientStore::new());
    let hive = HiveBuilder::new(AppConfig::default())
        .with_llm(llm.clone())
        .with_store(store.clone())
        .with_channel(email.clone())
        .with_channel(whatsapp.clone())
        .build()
        .unwrap();
    Harness {
        hive,
        llm,
        email,
        whatsapp,
        store,
    }
}

fn step_agents(steps: &[hive::core::StepReport]) -> Vec<AgentId> {
    steps.iter().map(|s| s.agent).collect()
}

#[tokio::test]
async fn test_arabic_prepare_campaign_only_drafts() {
    let h = harness(&[
        r#"{"intent": "campaign", "response_type": "agent", "selected_agents": ["content", "knowledge-enhancer"], "coordination_type": "sequential", "language": "ar", "confidence": 0.92}"#,
        // Oracle 越界加了投递步骤
        r#"{"subtasks": [
            {"action": "Write an email campaign draft", "responsible_agent": "content"},
            {"action": "Polish the campaign", "responsible_agent": "knowledge-enhancer"},
            {"action": "Send the campaign", "responsible_agent": "email-sender"}
        ]}"#,
        "مسودة الحملة",
        "الحملة بعد التحسين",
    ]);

    let response = h
        .hive
        .orchestrator
        .handle(RunRequest::new("جهزلي حملة ايميلات", "owner@shop.io"))
        .await
        .unwrap();

    assert_eq!(response.phase, RequestPhase::Completed);
    assert_eq!(
        step_agents(&response.steps),
        vec![AgentId::Content, AgentId::KnowledgeEnhancer]
    );
    assert!(response.final_output.contains("الحملة بعد التحسين"));
    assert!(h.email.sent().is_empty());
    assert_eq!(h.llm.call_count(), 4);

    let metrics = h.hive.tracker.metrics_summary();
    assert_eq!(metrics.totals.tasks_succeeded, 2);
    assert_eq!(metrics.totals.in_flight, 0);
}

#[tokio::test]
async fn test_send_to_them_resolves_recipients_first() {
    let h = harness(&[
        r#"{"intent": "send", "response_type": "agent", "selected_agents": ["whatsapp-sender"], "language": "ar", "confidence": 0.88}"#,
        // Oracle 漏掉了收件人解析与润色
        r#"{"subtasks": [
            {"action": "Write the WhatsApp message", "responsible_agent": "content"},
            {"action": "Send the message on WhatsApp", "responsible_agent": "whatsapp-sender"}
        ]}"#,
        "عرض خاص لعملائنا",
        "عرض خاص لعملائنا الكرام",
    ]);
    h.store
        .insert("customers", "owner@shop.io", json!({"name": "Ali", "phone": "+971500000001"}).as_object().cloned().unwrap())
        .await
        .unwrap();
    h.store
        .insert("customers", "owner@shop.io", json!({"name": "Sara", "phone": "+971500000002"}).as_object().cloned().unwrap())
        .await
        .unwrap();
    h.store
        .insert("customers", "someone@else.io", json!({"name": "Omar", "phone": "+971500000009"}).as_object().cloned().unwrap())
        .await
        .unwrap();

    let mut request = RunRequest::new("أرسل لهم رسالة واتساب", "owner@shop.io");
    request.context = Some(vec![
        ConversationTurn::user("اعرض لي العملاء"),
        ConversationTurn::assistant("- Ali (+971500000001)\n- Sara (+971500000002)"),
    ]);
    let response = h.hive.orchestrator.handle(request).await.unwrap();

    assert_eq!(response.phase, RequestPhase::Completed);
    assert_eq!(
        step_agents(&response.steps),
        vec![
            AgentId::Database,
            AgentId::Content,
            AgentId::KnowledgeEnhancer,
            AgentId::WhatsappSender
        ]
    );
    let sent = h.whatsapp.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(_, payload)| payload == "عرض خاص لعملائنا الكرام"));
    assert!(!sent.iter().any(|(to, _)| to == "+971500000009"));
    assert!(h.email.sent().is_empty());
}

#[tokio::test]
async fn test_reference_to_one_customer_messages_only_that_customer() {
    let h = harness(&[
        r#"{"intent": "send", "response_type": "agent", "selected_agents": ["whatsapp-sender"], "context_references": {"them": ["Ali"]}, "language": "en", "confidence": 0.9}"#,
        r#"{"subtasks": [
            {"action": "Write the offer message", "responsible_agent": "content"},
            {"action": "Send the offer on WhatsApp", "responsible_agent": "whatsapp-sender"}
        ]}"#,
        "Our offer",
        "Our special offer",
    ]);
    for (name, phone) in [
        ("Ali", "+971500000001"),
        ("Sara", "+971500000002"),
        ("Mona", "+971500000003"),
    ] {
        h.store
            .insert("customers", "owner@shop.io", json!({"name": name, "phone": phone}).as_object().cloned().unwrap())
            .await
            .unwrap();
    }

    let mut request = RunRequest::new("send them the offer on whatsapp", "owner@shop.io");
    request.context = Some(vec![ConversationTurn::user("did Ali reply?")]);
    let response = h.hive.orchestrator.handle(request).await.unwrap();

    assert_eq!(response.phase, RequestPhase::Completed);
    assert_eq!(response.steps[0].agent, AgentId::Database);
    let sent = h.whatsapp.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "+971500000001");
}

#[tokio::test]
async fn test_date_in_request_is_not_a_recipient() {
    let h = harness(&[
        r#"{"intent": "send", "response_type": "agent", "selected_agents": ["whatsapp-sender"], "language": "en"}"#,
        r#"{"subtasks": [
            {"action": "Write the offer message", "responsible_agent": "content"},
            {"action": "Send the offer on WhatsApp", "responsible_agent": "whatsapp-sender"}
        ]}"#,
        "Offer valid until 2024-05-12",
        "Our offer is valid until 2024-05-12",
    ]);

    let mut request = RunRequest::new(
        "send them the offer valid until 2024-05-12 on whatsapp",
        "owner@shop.io",
    );
    request.context = Some(vec![ConversationTurn::user("who bought last week?")]);
    let response = h.hive.orchestrator.handle(request).await.unwrap();

    assert_eq!(response.steps[0].agent, AgentId::Database);
    assert!(h.whatsapp.sent().is_empty());
    assert_eq!(response.phase, RequestPhase::Failed);
}

#[tokio::test]
async fn test_send_without_known_recipients_fails_at_delivery() {
    let h = harness(&[
        r#"{"intent": "send", "response_type": "agent", "selected_agents": ["whatsapp-sender"], "language": "en"}"#,
        r#"{"subtasks": [
            {"action": "Write the message", "responsible_agent": "content"},
            {"action": "Polish the message", "responsible_agent": "knowledge-enhancer"},
            {"action": "Send it on WhatsApp", "responsible_agent": "whatsapp-sender"}
        ]}"#,
        "draft",
        "polished",
    ]);

    let mut request = RunRequest::new("send them the offer on whatsapp", "owner@shop.io");
    request.context = Some(vec![ConversationTurn::user("who bought last week?")]);
    let response = h.hive.orchestrator.handle(request).await.unwrap();

    assert_eq!(response.phase, RequestPhase::Failed);
    let last = response.steps.last().unwrap();
    assert_eq!(last.agent, AgentId::WhatsappSender);
    assert_eq!(last.status, StepStatus::Failed);
    assert!(h.whatsapp.sent().is_empty());
    assert_eq!(h.hive.tracker.record(AgentId::WhatsappSender).tasks_failed, 1);
}

#[tokio::test]
async fn test_add_customer_runs_only_the_database_step() {
    let h = harness(&[
        r#"{"intent": "create", "response_type": "agent", "selected_agents": ["database"], "entities": {"name": "Sara", "email": "sara@x.io", "record_type": "customer"}, "language": "en"}"#,
        r#"{"subtasks": [{"action": "Add customer Sara", "responsible_agent": "database"}]}"#,
        r#"{"operation": "create", "collection": "customers", "document": {"name": "Sara", "email": "sara@x.io"}}"#,
    ]);

    let response = h
        .hive
        .orchestrator
        .handle(RunRequest::new("add customer Sara, sara@x.io", "owner@shop.io"))
        .await
        .unwrap();

    assert_eq!(response.phase, RequestPhase::Completed);
    assert_eq!(step_agents(&response.steps), vec![AgentId::Database]);
    let docs = h
        .store
        .query(&ScopedQuery::read("customers", "owner@shop.io").unwrap())
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["name"], "Sara");
    assert!(h.email.sent().is_empty());
}

#[tokio::test]
async fn test_missing_customer_details_ask_before_delegating() {
    let h = harness(&[
        r#"{"intent": "create", "response_type": "agent", "selected_agents": ["database"], "entities": {"record_type": "customer"}, "language": "en"}"#,
    ]);

    let response = h
        .hive
        .orchestrator
        .handle(RunRequest::new("add a new customer", "owner@shop.io"))
        .await
        .unwrap();

    assert_eq!(response.phase, RequestPhase::Clarifying);
    assert!(response.steps.is_empty());
    assert_eq!(h.llm.call_count(), 1);
}

#[tokio::test]
async fn test_history_is_kept_per_user() {
    let h = harness(&[
        r#"{"intent": "greeting", "response_type": "simple", "direct_response": "Hello!", "language": "en"}"#,
        r#"{"intent": "greeting", "response_type": "simple", "direct_response": "Bonjour !", "language": "fr"}"#,
    ]);
    let orchestrator = &h.hive.orchestrator;
    orchestrator
        .handle(RunRequest::new("hi", "a@shop.io"))
        .await
        .unwrap();
    orchestrator
        .handle(RunRequest::new("bonjour", "b@shop.io"))
        .await
        .unwrap();

    // 第二个用户的分类 prompt 不应包含第一个用户的对话
    let second = h.llm.user_prompt(1).unwrap();
    assert!(!second.contains("Hello!"));
}
