//! 必填实体校验：在委派前按意图检查必需字段
//!
//! - 新增客户 / 联系人：姓名 + （邮箱或电话）
//! - 发送：收件人（实体、上下文指代、话语中的联系方式或群体词）
//! - 修改 / 删除：目标记录
//!
//! 缺失时返回 MissingRequiredEntity，由调用方转成对应语言的澄清问题。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::agents::AgentId;
use crate::core::HiveError;
use crate::intent::types::{Intent, Language, Understanding};
use crate::memory::ConversationTurn;

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
static PHONE_RE: OnceLock<Regex> = OnceLock::new();
static DATE_RE: OnceLock<Regex> = OnceLock::new();

fn email_re() -> &'static Regex {
    EMAIL_RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)+")
            .expect("static email pattern")
    })
}

fn phone_re() -> &'static Regex {
    PHONE_RE.get_or_init(|| {
        Regex::new(r"\+?\d(?:[ \-]?\d){7,14}").expect("static phone pattern")
    })
}

fn date_re() -> &'static Regex {
    DATE_RE.get_or_init(|| {
        Regex::new(r"\d{4}-\d{1,2}-\d{1,2}|\d{1,2}-\d{1,2}-\d{4}").expect("static date pattern")
    })
}

/// 带 `+` 的号码至少 8 位，否则至少 9 位；日期不算
fn is_phone(candidate: &str) -> bool {
    if date_re().is_match(candidate) {
        return false;
    }
    let digits = candidate.chars().filter(|c| c.is_numeric()).count();
    if candidate.starts_with('+') {
        digits >= 8
    } else {
        digits >= 9
    }
}

fn phones(text: &str) -> impl Iterator<Item = &str> {
    phone_re()
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|c| is_phone(c))
}

/// 话语中出现的邮箱与电话
pub fn extract_contacts(text: &str) -> Vec<String> {
    email_re()
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .chain(phones(text))
        .map(str::to_string)
        .collect()
}

pub fn contains_explicit_contact(text: &str) -> bool {
    email_re().is_match(text) || phones(text).next().is_some()
}

/// 指代已出现过的收件人的词（them / لهم / leur ...）
const REFERENCE_WORDS: &[&str] = &[
    "them", "those", "lui", "leur", "leurs", "eux", "لهم", "لهن", "إليهم", "اليهم", "عليهم",
    "نفسهم",
];

/// 泛指一批收件人的群体词（全部客户 / tous les clients / كل العملاء ...）
const AUDIENCE_WORDS: &[&str] = &[
    "customers", "clients", "contacts", "subscribers", "everyone", "all", "tous", "toutes",
    "abonnés", "العملاء", "عملائي", "الكل", "الجميع", "كل", "المشتركين", "جهات",
];

pub(crate) fn words(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || (c.is_ascii_punctuation() && c != '\''))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// 话语是否引用了此前提到的收件人
pub fn has_reference_pronoun(text: &str) -> bool {
    words(text)
        .iter()
        .any(|w| REFERENCE_WORDS.contains(&w.as_str()))
}

/// 话语是否泛指一批收件人（全部客户 ...）
pub fn mentions_audience(text: &str) -> bool {
    words(text)
        .iter()
        .any(|w| AUDIENCE_WORDS.contains(&w.as_str()))
}

/// Oracle 没有给出指代解析、话语又引用了前文的人时，
/// 取最近一条带联系方式的对话中的邮箱 / 电话作为 "them"
pub fn infer_context_references(u: Understanding, context: &[ConversationTurn]) -> Understanding {
    if !u.context_references().is_empty() || !has_reference_pronoun(u.raw_input()) {
        return u;
    }
    let Some(contacts) = context
        .iter()
        .rev()
        .map(|turn| extract_contacts(&turn.content))
        .find(|found| !found.is_empty())
    else {
        return u;
    };
    tracing::debug!(count = contacts.len(), "references inferred from conversation");
    let mut references = Map::new();
    references.insert(
        "them".to_string(),
        Value::Array(contacts.into_iter().map(Value::String).collect()),
    );
    u.with_context_references(references)
}

fn non_empty(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}

fn has_any(u: &Understanding, keys: &[&str]) -> bool {
    keys.iter().any(|k| u.entity(k).map_or(false, non_empty))
        || keys.iter().any(|k| {
            ["customer", "contact", "client"].iter().any(|parent| {
                u.entity(parent)
                    .and_then(|p| p.get(*k))
                    .map_or(false, non_empty)
            })
        })
}

const RECIPIENT_KEYS: &[&str] = &[
    "recipients", "recipient", "to", "emails", "email", "phones", "phone", "phone_numbers",
    "audience", "contacts",
];
const NAME_KEYS: &[&str] = &["name", "customer_name", "contact_name", "full_name"];
const CONTACT_KEYS: &[&str] = &["email", "phone", "phone_number", "whatsapp", "mobile"];
const TARGET_KEYS: &[&str] = &[
    "name", "customer_name", "email", "phone", "id", "target", "filter", "record",
];

fn is_contact_record(u: &Understanding) -> bool {
    let typed = ["record_type", "entity_type", "type"]
        .iter()
        .filter_map(|k| u.entity(k).and_then(Value::as_str))
        .any(|t| {
            matches!(
                t.to_lowercase().as_str(),
                "customer" | "client" | "contact" | "lead"
            )
        });
    typed
        || u.entity("customer").is_some()
        || u.entity("contact").is_some()
        || u.selected_agents().contains(&AgentId::Database)
}

/// 按意图检查必填实体；`has_context` 表示该用户有历史对话可供解析指代
pub fn validate_required_entities(u: &Understanding, has_context: bool) -> Result<(), HiveError> {
    if !u.is_delegated() {
        return Ok(());
    }
    let text = u.raw_input();
    let mut missing = Vec::new();

    match u.intent() {
        Intent::Create if is_contact_record(u) => {
            if !has_any(u, NAME_KEYS) {
                missing.push("name".to_string());
            }
            if !has_any(u, CONTACT_KEYS) && !contains_explicit_contact(text) {
                missing.push("email_or_phone".to_string());
            }
        }
        Intent::Send => {
            let resolved = has_any(u, RECIPIENT_KEYS)
                || !u.context_references().is_empty()
                || contains_explicit_contact(text)
                || mentions_audience(text)
                || (has_context && has_reference_pronoun(text));
            if !resolved {
                missing.push("recipients".to_string());
            }
        }
        Intent::Update | Intent::Delete => {
            if !has_any(u, TARGET_KEYS) && !contains_explicit_contact(text) && !mentions_audience(text)
            {
                missing.push("target".to_string());
            }
        }
        _ => {}
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(HiveError::MissingRequiredEntity { fields: missing })
    }
}

fn field_label(field: &str, language: &Language) -> &'static str {
    match (field, language) {
        ("name", Language::Ar) => "الاسم",
        ("name", Language::Fr) => "le nom",
        ("name", _) => "the name",
        ("email_or_phone", Language::Ar) => "البريد الإلكتروني أو رقم الهاتف",
        ("email_or_phone", Language::Fr) => "l'e-mail ou le numéro de téléphone",
        ("email_or_phone", _) => "an email address or phone number",
        ("recipients", Language::Ar) => "المستلمين",
        ("recipients", Language::Fr) => "les destinataires",
        ("recipients", _) => "the recipients",
        (_, Language::Ar) => "السجل المطلوب",
        (_, Language::Fr) => "l'enregistrement concerné",
        (_, _) => "which record you mean",
    }
}

/// 缺失字段 -> 请求语言的澄清问题
pub fn missing_entities_question(fields: &[String], language: &Language) -> String {
    let labels: Vec<&str> = fields.iter().map(|f| field_label(f, language)).collect();
    match language {
        Language::Ar => format!("لإتمام طلبك أحتاج إلى: {}. هل يمكنك تزويدي بها؟", labels.join("، ")),
        Language::Fr => format!(
            "Pour continuer, j'ai besoin de : {}. Pouvez-vous me les indiquer ?",
            labels.join(", ")
        ),
        _ => format!(
            "To continue I need {}. Could you provide it?",
            labels.join(" and ")
        ),
    }
}

/// 校验并在缺失时转为澄清结果
pub fn enforce_required_entities(u: Understanding, has_context: bool) -> Understanding {
    match validate_required_entities(&u, has_context) {
        Ok(()) => u,
        Err(HiveError::MissingRequiredEntity { fields }) => {
            tracing::info!(?fields, "required entities missing, asking for clarification");
            let question = missing_entities_question(&fields, u.language());
            u.into_clarification(question)
        }
        Err(_) => u,
    }
}
