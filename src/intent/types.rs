//! Understanding 及其枚举字段
//!
//! Oracle 的原始回复先反序列化为宽松的 OracleUnderstanding（字段全部可缺省、大小写不敏感），
//! 再经 `Understanding::from_oracle` 构造；澄清与路由互斥等不变量只在构造时保证一次，
//! 之后 Understanding 只读。

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::agents::AgentId;
use crate::intent::language::{clarification_fallback, DetectedLanguage};

/// 标签枚举：小写字符串序列化，未知标签落到中性取值
macro_rules! label_enum {
    ($(#[$meta:meta])* $name:ident, fallback = $fallback:ident, { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            /// 解析 Oracle 给出的标签（忽略大小写与首尾空白）
            pub fn from_label(label: &str) -> Self {
                let label = label.trim().to_lowercase();
                match label.as_str() {
                    $($label => $name::$variant,)+
                    _ => $name::$fallback,
                }
            }

            /// 供 prompt 使用的取值列表
            pub fn labels() -> String {
                Self::ALL.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(" | ")
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$fallback
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

label_enum!(
    /// 主意图
    Intent, fallback = Unknown, {
        Create => "create",
        Read => "read",
        Update => "update",
        Delete => "delete",
        Send => "send",
        Help => "help",
        Greeting => "greeting",
        Complaint => "complaint",
        Inquiry => "inquiry",
        Campaign => "campaign",
        Unknown => "unknown",
    }
);

label_enum!(
    Tone, fallback = Neutral, {
        Formal => "formal",
        Casual => "casual",
        Urgent => "urgent",
        Frustrated => "frustrated",
        Happy => "happy",
        Neutral => "neutral",
        Polite => "polite",
    }
);

label_enum!(
    Urgency, fallback = Normal, {
        Low => "low",
        Normal => "normal",
        High => "high",
        Critical => "critical",
    }
);

label_enum!(
    /// simple：无需委派即可回答；agent：需要委派
    ResponseType, fallback = Simple, {
        Simple => "simple",
        Agent => "agent",
    }
);

label_enum!(
    /// 多个 Agent 之间的时序关系
    CoordinationType, fallback = Sequential, {
        Sequential => "sequential",
        Parallel => "parallel",
        Independent => "independent",
    }
);

/// 请求语言：ar / en / fr 之外保留原始代码
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Language {
    Ar,
    En,
    Fr,
    Other(String),
}

impl Language {
    pub fn code(&self) -> &str {
        match self {
            Language::Ar => "ar",
            Language::En => "en",
            Language::Fr => "fr",
            Language::Other(code) => code,
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::En
    }
}

impl From<String> for Language {
    fn from(code: String) -> Self {
        Language::from(code.as_str())
    }
}

impl From<&str> for Language {
    fn from(code: &str) -> Self {
        let code = code.trim().to_lowercase();
        match code.as_str() {
            "ar" | "arabic" | "ar-sa" | "ar-eg" => Language::Ar,
            "en" | "english" | "en-us" | "en-gb" => Language::En,
            "fr" | "french" | "français" | "fr-fr" => Language::Fr,
            _ => Language::Other(code),
        }
    }
}

impl From<Language> for String {
    fn from(lang: Language) -> Self {
        lang.code().to_string()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// null 与缺省一样处理
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// 接受数字或数字字符串
fn lenient_f32<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64().map(|v| v as f32),
        Some(Value::String(s)) => s.trim().parse::<f32>().ok(),
        _ => None,
    })
}

/// 接受布尔或 "true" / "false" 字符串
fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// Oracle 期望返回的 JSON 结构（schema 会注入到 prompt 中）
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(default)]
pub struct OracleUnderstanding {
    /// create | read | update | delete | send | help | greeting | complaint | inquiry | campaign | unknown
    pub intent: Option<String>,
    /// 次要目标
    #[serde(deserialize_with = "nullable")]
    pub sub_intents: Vec<String>,
    /// 收件人、主题、日期、附件等
    #[serde(deserialize_with = "nullable")]
    pub entities: Map<String, Value>,
    /// formal | casual | urgent | frustrated | happy | neutral | polite
    pub tone: Option<String>,
    /// ar | en | fr | ...
    pub language: Option<String>,
    pub dialect: Option<String>,
    /// low | normal | high | critical
    pub urgency: Option<String>,
    /// 0.0 - 1.0
    #[serde(deserialize_with = "lenient_f32")]
    pub confidence: Option<f32>,
    #[serde(deserialize_with = "lenient_bool")]
    pub needs_clarification: Option<bool>,
    /// 部分 prompt 变体使用的同义字段
    #[serde(deserialize_with = "lenient_bool")]
    #[schemars(skip)]
    pub needs_confirmation: Option<bool>,
    pub clarification_question: Option<String>,
    /// 指代词 -> 已解析实体（如 "them" -> 上一轮的收件人）
    #[serde(deserialize_with = "nullable")]
    pub context_references: Map<String, Value>,
    /// simple | agent
    pub response_type: Option<String>,
    #[serde(deserialize_with = "nullable")]
    pub selected_agents: Vec<String>,
    /// sequential | parallel | independent
    pub coordination_type: Option<String>,
    /// simple 类请求可直接给出的回复
    pub direct_response: Option<String>,
}

/// 返回 OracleUnderstanding 的 JSON Schema 字符串，可拼入 system prompt
pub fn understanding_schema_json() -> String {
    let schema = schemars::schema_for!(OracleUnderstanding);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

/// 一次用户输入的结构化理解结果（构造后只读）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Understanding {
    raw_input: String,
    intent: Intent,
    sub_intents: Vec<String>,
    entities: Map<String, Value>,
    tone: Tone,
    language: Language,
    dialect: String,
    urgency: Urgency,
    confidence: f32,
    needs_clarification: bool,
    clarification_question: Option<String>,
    context_references: Map<String, Value>,
    response_type: ResponseType,
    selected_agents: Vec<AgentId>,
    coordination_type: CoordinationType,
    direct_response: Option<String>,
}

/// 构造 Understanding 的可变草稿；`build` 时统一施加不变量
#[derive(Debug, Clone, Default)]
pub struct UnderstandingDraft {
    pub raw_input: String,
    pub intent: Intent,
    pub sub_intents: Vec<String>,
    pub entities: Map<String, Value>,
    pub tone: Tone,
    pub language: Language,
    pub dialect: Option<String>,
    pub urgency: Urgency,
    pub confidence: f32,
    pub needs_clarification: bool,
    pub clarification_question: Option<String>,
    pub context_references: Map<String, Value>,
    pub response_type: ResponseType,
    pub selected_agents: Vec<AgentId>,
    pub coordination_type: CoordinationType,
    pub direct_response: Option<String>,
}

impl UnderstandingDraft {
    pub fn new(raw_input: impl Into<String>) -> Self {
        Self {
            raw_input: raw_input.into(),
            confidence: 1.0,
            ..Self::default()
        }
    }

    /// 施加不变量：
    /// - confidence 截断到 [0, 1]
    /// - 需要澄清 <=> 澄清问题非空（缺失时补默认问题，不需要时丢弃）
    /// - 需要澄清时不路由：response_type = simple，selected_agents 为空
    /// - simple 时 selected_agents 为空
    pub fn build(self) -> Understanding {
        let confidence = if self.confidence.is_nan() {
            0.0
        } else {
            self.confidence.clamp(0.0, 1.0)
        };

        let question = self
            .clarification_question
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty());
        let clarification_question = if self.needs_clarification {
            Some(question.unwrap_or_else(|| clarification_fallback(&self.language).to_string()))
        } else {
            None
        };

        let response_type = if self.needs_clarification {
            ResponseType::Simple
        } else {
            self.response_type
        };

        let mut selected_agents = Vec::new();
        if response_type == ResponseType::Agent {
            for agent in self.selected_agents {
                if !selected_agents.contains(&agent) {
                    selected_agents.push(agent);
                }
            }
        }

        let direct_response = if response_type == ResponseType::Simple && !self.needs_clarification
        {
            self.direct_response
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
        } else {
            None
        };

        Understanding {
            raw_input: self.raw_input,
            intent: self.intent,
            sub_intents: self.sub_intents,
            entities: self.entities,
            tone: self.tone,
            language: self.language,
            dialect: self
                .dialect
                .map(|d| d.trim().to_lowercase())
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| "standard".to_string()),
            urgency: self.urgency,
            confidence,
            needs_clarification: self.needs_clarification,
            clarification_question,
            context_references: self.context_references,
            response_type,
            selected_agents,
            coordination_type: self.coordination_type,
            direct_response,
        }
    }
}

impl Understanding {
    /// 由 Oracle 回复构造；缺失的语言 / 方言用启发式检测结果补齐，词表外的 Agent 被丢弃
    pub fn from_oracle(
        raw_input: &str,
        oracle: OracleUnderstanding,
        detected: &DetectedLanguage,
    ) -> Self {
        let mut selected_agents = Vec::new();
        for name in &oracle.selected_agents {
            match name.parse::<AgentId>() {
                Ok(agent) => selected_agents.push(agent),
                Err(_) => tracing::warn!(agent = %name, "oracle selected an unknown agent, dropped"),
            }
        }

        let language = oracle
            .language
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(Language::from)
            .unwrap_or_else(|| detected.language.clone());
        let dialect = oracle.dialect.clone().or_else(|| {
            (language == detected.language).then(|| detected.dialect.clone())
        });

        UnderstandingDraft {
            raw_input: raw_input.to_string(),
            intent: oracle.intent.as_deref().map(Intent::from_label).unwrap_or_default(),
            sub_intents: oracle.sub_intents,
            entities: oracle.entities,
            tone: oracle.tone.as_deref().map(Tone::from_label).unwrap_or_default(),
            language,
            dialect,
            urgency: oracle.urgency.as_deref().map(Urgency::from_label).unwrap_or_default(),
            confidence: oracle.confidence.unwrap_or(0.5),
            needs_clarification: oracle.needs_clarification.unwrap_or(false)
                || oracle.needs_confirmation.unwrap_or(false),
            clarification_question: oracle.clarification_question,
            context_references: oracle.context_references,
            response_type: oracle
                .response_type
                .as_deref()
                .map(ResponseType::from_label)
                .unwrap_or_default(),
            selected_agents,
            coordination_type: oracle
                .coordination_type
                .as_deref()
                .map(CoordinationType::from_label)
                .unwrap_or_default(),
            direct_response: oracle.direct_response,
        }
        .build()
    }

    /// Oracle 回复无法解析时的降级结果：unknown 意图、需要澄清、置信度 0.3
    pub fn degraded(raw_input: &str, detected: &DetectedLanguage) -> Self {
        UnderstandingDraft {
            raw_input: raw_input.to_string(),
            intent: Intent::Unknown,
            language: detected.language.clone(),
            dialect: Some(detected.dialect.clone()),
            confidence: 0.3,
            needs_clarification: true,
            ..UnderstandingDraft::default()
        }
        .build()
    }

    /// 转为需要澄清的新结果（用于缺失必填实体）
    pub fn into_clarification(self, question: impl Into<String>) -> Self {
        UnderstandingDraft {
            raw_input: self.raw_input,
            intent: self.intent,
            sub_intents: self.sub_intents,
            entities: self.entities,
            tone: self.tone,
            language: self.language,
            dialect: Some(self.dialect),
            urgency: self.urgency,
            confidence: self.confidence,
            needs_clarification: true,
            clarification_question: Some(question.into()),
            context_references: self.context_references,
            response_type: ResponseType::Simple,
            selected_agents: Vec::new(),
            coordination_type: self.coordination_type,
            direct_response: None,
        }
        .build()
    }

    /// 替换指代解析结果（不影响其他不变量）
    pub fn with_context_references(mut self, references: Map<String, Value>) -> Self {
        self.context_references = references;
        self
    }

    pub fn raw_input(&self) -> &str {
        &self.raw_input
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn sub_intents(&self) -> &[String] {
        &self.sub_intents
    }

    pub fn entities(&self) -> &Map<String, Value> {
        &self.entities
    }

    /// 实体缺失即「未提供」，不是错误
    pub fn entity(&self, key: &str) -> Option<&Value> {
        self.entities.get(key).filter(|v| !v.is_null())
    }

    pub fn tone(&self) -> Tone {
        self.tone
    }

    pub fn language(&self) -> &Language {
        &self.language
    }

    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    pub fn urgency(&self) -> Urgency {
        self.urgency
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn needs_clarification(&self) -> bool {
        self.needs_clarification
    }

    pub fn clarification_question(&self) -> Option<&str> {
        self.clarification_question.as_deref()
    }

    pub fn context_references(&self) -> &Map<String, Value> {
        &self.context_references
    }

    pub fn response_type(&self) -> ResponseType {
        self.response_type
    }

    pub fn selected_agents(&self) -> &[AgentId] {
        &self.selected_agents
    }

    pub fn coordination_type(&self) -> CoordinationType {
        self.coordination_type
    }

    pub fn direct_response(&self) -> Option<&str> {
        self.direct_response.as_deref()
    }

    /// 是否走委派路径
    pub fn is_delegated(&self) -> bool {
        !self.needs_clarification && self.response_type == ResponseType::Agent
    }
}
