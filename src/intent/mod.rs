//! 意图理解：Understanding 数据模型、启发式语言检测、Oracle 分类与必填实体校验

pub mod classifier;
pub mod language;
pub mod prompts;
pub mod types;
pub mod validation;

pub use classifier::IntentClassifier;
pub use language::{clarification_fallback, detect, detect_dialect, detect_language, DetectedLanguage};
pub use types::{
    understanding_schema_json, CoordinationType, Intent, Language, OracleUnderstanding,
    ResponseType, Tone, Understanding, UnderstandingDraft, Urgency,
};
pub use validation::{
    contains_explicit_contact, enforce_required_entities, extract_contacts, has_reference_pronoun,
    infer_context_references, mentions_audience, missing_entities_question,
    validate_required_entities,
};
