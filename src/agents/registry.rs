//! Agent 词表与能力表
//!
//! AgentId 是固定词表，声明顺序即路由打分平局时的稳定顺序。
//! CapabilityTable 在进程启动时加载（内置默认 + 可选 TOML 覆盖），之后只读，无需加锁。

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::HiveError;

/// 专职 Agent 标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentId {
    Content,
    KnowledgeEnhancer,
    Database,
    EmailSender,
    WhatsappSender,
    Crm,
    Caller,
    FileCreator,
    WebAnalyser,
    CodeGenerator,
    PlatformHelper,
}

impl AgentId {
    /// 声明顺序
    pub const ALL: [AgentId; 11] = [
        AgentId::Content,
        AgentId::KnowledgeEnhancer,
        AgentId::Database,
        AgentId::EmailSender,
        AgentId::WhatsappSender,
        AgentId::Crm,
        AgentId::Caller,
        AgentId::FileCreator,
        AgentId::WebAnalyser,
        AgentId::CodeGenerator,
        AgentId::PlatformHelper,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentId::Content => "content",
            AgentId::KnowledgeEnhancer => "knowledge-enhancer",
            AgentId::Database => "database",
            AgentId::EmailSender => "email-sender",
            AgentId::WhatsappSender => "whatsapp-sender",
            AgentId::Crm => "crm",
            AgentId::Caller => "caller",
            AgentId::FileCreator => "file-creator",
            AgentId::WebAnalyser => "web-analyser",
            AgentId::CodeGenerator => "code-generator",
            AgentId::PlatformHelper => "platform-helper",
        }
    }

    /// 产生外部副作用的投递类 Agent（邮件 / WhatsApp / 电话）
    pub fn is_delivery(&self) -> bool {
        matches!(
            self,
            AgentId::EmailSender | AgentId::WhatsappSender | AgentId::Caller
        )
    }

    /// 供 prompt 使用的逗号分隔词表
    pub fn vocabulary() -> String {
        AgentId::ALL
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentId {
    type Err = HiveError;

    /// 容忍大小写、下划线与 `_agent` 后缀（"Email_Sender_Agent" -> email-sender），词表外一律拒绝
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', ' '], "-");
        let normalized = normalized
            .strip_suffix("-agent")
            .unwrap_or(&normalized)
            .to_string();
        AgentId::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == normalized)
            .ok_or_else(|| HiveError::UnsupportedAgent(s.to_string()))
    }
}

/// 单个 Agent 的静态能力描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCapabilityProfile {
    pub id: AgentId,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    /// 路由关键词（多语言，小写比较）
    #[serde(default)]
    pub intent_affinity: Vec<String>,
    #[serde(default = "default_languages")]
    pub supported_languages: BTreeSet<String>,
}

fn default_languages() -> BTreeSet<String> {
    ["ar", "en", "fr"].iter().map(|s| s.to_string()).collect()
}

impl AgentCapabilityProfile {
    fn builtin(id: AgentId, skills: &[&str], affinity: &[&str]) -> Self {
        Self {
            id,
            skills: skills.iter().map(|s| s.to_string()).collect(),
            intent_affinity: affinity.iter().map(|s| s.to_lowercase()).collect(),
            supported_languages: default_languages(),
        }
    }

    fn with_languages(mut self, langs: &[&str]) -> Self {
        self.supported_languages = langs.iter().map(|s| s.to_string()).collect();
        self
    }

    /// 文本（已小写）命中的关键词数
    pub fn affinity_hits(&self, text_lower: &str) -> usize {
        self.intent_affinity
            .iter()
            .filter(|k| text_lower.contains(k.as_str()))
            .count()
    }

    pub fn supports_language(&self, language: &str) -> bool {
        self.supported_languages.contains(language)
    }
}

#[derive(Debug, Deserialize)]
struct CapabilityFile {
    #[serde(default)]
    agents: Vec<AgentCapabilityProfile>,
}

/// 能力表：按声明顺序保存全部 Agent
#[derive(Debug, Clone)]
pub struct CapabilityTable {
    profiles: Vec<AgentCapabilityProfile>,
}

impl CapabilityTable {
    /// 内置能力表
    pub fn builtin() -> Self {
        use AgentId::*;
        let profiles = vec![
            AgentCapabilityProfile::builtin(
                Content,
                &["copywriting", "drafting", "campaign-content"],
                &[
                    "draft", "write", "prepare", "compose", "campaign", "content", "message",
                    "rédige", "prépare", "écri", "campagne", "contenu",
                    "اكتب", "جهز", "حضر", "صياغة", "حملة", "محتوى", "رسالة",
                ],
            ),
            AgentCapabilityProfile::builtin(
                KnowledgeEnhancer,
                &["refinement", "brand-voice", "retrieval"],
                &["improve", "enhance", "refine", "polish", "amélior", "حسن", "طور", "تحسين"],
            ),
            AgentCapabilityProfile::builtin(
                Database,
                &["crud", "recipient-lookup"],
                &[
                    "customer", "client", "contact", "record", "database", "add ", "delete",
                    "update", "list ", "ajoute", "supprime", "عميل", "عملاء", "جهات", "أضف",
                    "احذف", "عدل", "قاعدة",
                ],
            ),
            AgentCapabilityProfile::builtin(
                EmailSender,
                &["email-delivery", "bulk-email"],
                &["email", "e-mail", "mail", "courriel", "ايميل", "إيميل", "بريد"],
            ),
            AgentCapabilityProfile::builtin(
                WhatsappSender,
                &["whatsapp-delivery", "bulk-whatsapp"],
                &["whatsapp", "واتساب", "واتس"],
            ),
            AgentCapabilityProfile::builtin(
                Crm,
                &["pipeline", "lead-tracking"],
                &["crm", "pipeline", "lead", "deal", "opportunit", "prospect", "صفقة", "فرصة"],
            ),
            AgentCapabilityProfile::builtin(
                Caller,
                &["voice-call"],
                &["phone call", "call ", "appel", "اتصل", "مكالمة"],
            )
            .with_languages(&["ar", "en"]),
            AgentCapabilityProfile::builtin(
                FileCreator,
                &["export", "report"],
                &[
                    "file", "export", "csv", "excel", "pdf", "report", "document", "fichier",
                    "rapport", "ملف", "تقرير", "تصدير",
                ],
            ),
            AgentCapabilityProfile::builtin(
                WebAnalyser,
                &["web-scraping", "site-analysis"],
                &["website", "http", "url", "site web", "موقع", "رابط"],
            ),
            AgentCapabilityProfile::builtin(
                CodeGenerator,
                &["code", "html-template"],
                &["code", "script", "html", "function", "programme", "كود", "برمجة"],
            ),
            AgentCapabilityProfile::builtin(
                PlatformHelper,
                &["platform-faq"],
                &["how do i", "how to", "help", "platform", "aide", "comment", "مساعدة", "كيف"],
            ),
        ];
        Self { profiles }
    }

    /// 内置表 + TOML 覆盖（`[[agents]]`，按 id 整体替换对应条目）
    pub fn from_toml_str(content: &str) -> Result<Self, HiveError> {
        let file: CapabilityFile =
            toml::from_str(content).map_err(|e| HiveError::ConfigError(e.to_string()))?;
        let mut table = Self::builtin();
        for mut profile in file.agents {
            profile.intent_affinity = profile
                .intent_affinity
                .iter()
                .map(|k| k.to_lowercase())
                .collect();
            if let Some(slot) = table.profiles.iter_mut().find(|p| p.id == profile.id) {
                *slot = profile;
            }
        }
        Ok(table)
    }

    /// 从文件加载；文件不存在时回退到内置表
    pub fn load(path: Option<&Path>) -> Result<Self, HiveError> {
        match path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(p)
                    .map_err(|e| HiveError::ConfigError(format!("{}: {}", p.display(), e)))?;
                tracing::info!("Loading agent capabilities from {:?}", p);
                Self::from_toml_str(&content)
            }
            _ => Ok(Self::builtin()),
        }
    }

    pub fn profiles(&self) -> &[AgentCapabilityProfile] {
        &self.profiles
    }

    pub fn get(&self, id: AgentId) -> Option<&AgentCapabilityProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// 关键词命中的 Agent（保持声明顺序）；language 给定时过滤不支持该语言的 Agent
    pub fn candidates(&self, text: &str, language: Option<&str>) -> Vec<AgentId> {
        let lower = text.to_lowercase();
        self.profiles
            .iter()
            .filter(|p| p.affinity_hits(&lower) > 0)
            .filter(|p| language.map_or(true, |l| p.supports_language(l)))
            .map(|p| p.id)
            .collect()
    }

    /// 供 prompt 使用的 Agent 说明
    pub fn describe(&self) -> String {
        self.profiles
            .iter()
            .map(|p| {
                format!(
                    "- {}: {}",
                    p.id,
                    p.skills.iter().cloned().collect::<Vec<_>>().join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for CapabilityTable {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_parsing() {
        assert_eq!("whatsapp-sender".parse::<AgentId>().unwrap(), AgentId::WhatsappSender);
        assert_eq!("Email_Sender_Agent".parse::<AgentId>().unwrap(), AgentId::EmailSender);
        assert!(matches!(
            "marketing-guru".parse::<AgentId>(),
            Err(HiveError::UnsupportedAgent(_))
        ));
    }

    #[test]
    fn test_serde_uses_kebab_case() {
        let json = serde_json::to_string(&AgentId::KnowledgeEnhancer).unwrap();
        assert_eq!(json, "\"knowledge-enhancer\"");
    }

    #[test]
    fn test_candidates_keep_declaration_order() {
        let table = CapabilityTable::builtin();
        let c = table.candidates("prepare a whatsapp campaign", None);
        assert_eq!(c, vec![AgentId::Content, AgentId::WhatsappSender]);
    }

    #[test]
    fn test_candidates_match_arabic_keywords() {
        let table = CapabilityTable::builtin();
        let c = table.candidates("ارسل رسالة واتساب", Some("ar"));
        assert!(c.contains(&AgentId::WhatsappSender));
    }

    #[test]
    fn test_language_filter() {
        let table = CapabilityTable::builtin();
        assert!(table.candidates("passer un appel", Some("fr")).is_empty());
        assert_eq!(table.candidates("passer un appel", None), vec![AgentId::Caller]);
    }

    #[test]
    fn test_toml_override_replaces_profile() {
        let table = CapabilityTable::from_toml_str(
            r#"
            [[agents]]
            id = "crm"
            skills = ["hubspot"]
            intent_affinity = ["HubSpot"]
            supported_languages = ["en"]
            "#,
        )
        .unwrap();
        let crm = table.get(AgentId::Crm).unwrap();
        assert!(crm.skills.contains("hubspot"));
        assert_eq!(table.candidates("sync hubspot", None), vec![AgentId::Crm]);
        assert_eq!(table.profiles().len(), 11);
    }

    #[test]
    fn test_shipped_override_file_parses() {
        let table = CapabilityTable::from_toml_str(include_str!("../../config/agents.toml")).unwrap();
        assert!(table.get(AgentId::Caller).unwrap().supports_language("fr"));
        assert_eq!(table.candidates("passer un appel", Some("fr")), vec![AgentId::Caller]);
    }
}
