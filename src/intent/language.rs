//! 启发式语言检测（不依赖 Oracle）
//!
//! 用于按语言预筛选 Agent，以及 Oracle 未给出 language 时的兜底。
//! 阿拉伯字母占比超过阈值判为 ar，并按口语标记词猜测方言；法语重音字符或常见虚词判为 fr；其余为 en。

use crate::intent::types::Language;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedLanguage {
    pub language: Language,
    pub dialect: String,
}

const ARABIC_RATIO_THRESHOLD: f32 = 0.3;

const FRENCH_STOPWORDS: &[&str] = &[
    "le", "la", "les", "des", "une", "un", "pour", "avec", "est", "je", "vous", "nous", "mes",
    "leur", "leurs", "bonjour", "merci", "au", "aux", "du", "sur", "dans", "s'il", "svp",
];

const DIALECT_MARKERS: &[(&str, &[&str])] = &[
    ("gulf", &["شلون", "وش", "ابغى", "أبغى", "ابي", "أبي", "وايد", "زين", "حيل", "الحين"]),
    ("egyptian", &["عايز", "عاوز", "ازاي", "إزاي", "كده", "دلوقتي", "بتاع", "مش", "ايه"]),
    ("levantine", &["بدي", "شو", "هلق", "هلأ", "كتير", "منيح", "هيك", "لسا"]),
    ("maghrebi", &["بغيت", "واش", "دابا", "بزاف", "كيفاش", "غادي", "ديال"]),
];

fn is_arabic(c: char) -> bool {
    matches!(c,
        '\u{0600}'..='\u{06FF}'
        | '\u{0750}'..='\u{077F}'
        | '\u{08A0}'..='\u{08FF}'
        | '\u{FB50}'..='\u{FDFF}'
        | '\u{FE70}'..='\u{FEFF}')
}

fn is_french_accent(c: char) -> bool {
    matches!(
        c,
        'é' | 'è' | 'ê' | 'ë' | 'à' | 'â' | 'ç' | 'ù' | 'û' | 'ô' | 'î' | 'ï' | 'œ'
    )
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| c.is_whitespace() || (c.is_ascii_punctuation() && c != '\''))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// 检测语言：ar / fr / en（默认）
pub fn detect_language(text: &str) -> Language {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return Language::En;
    }

    let arabic = letters.iter().filter(|c| is_arabic(**c)).count();
    if arabic as f32 / letters.len() as f32 > ARABIC_RATIO_THRESHOLD {
        return Language::Ar;
    }

    let accents = letters
        .iter()
        .filter(|c| is_french_accent(c.to_lowercase().next().unwrap_or(**c)))
        .count();
    let stopwords = tokens(text)
        .filter(|t| FRENCH_STOPWORDS.contains(&t.as_str()))
        .count();
    if accents > 0 || stopwords >= 2 {
        return Language::Fr;
    }

    Language::En
}

/// 阿拉伯语方言：按标记词命中数取最多者，无命中为 "standard"
pub fn detect_dialect(text: &str) -> String {
    let words: Vec<String> = tokens(text).collect();
    let mut best: Option<(&str, usize)> = None;
    for (dialect, markers) in DIALECT_MARKERS {
        let hits = words.iter().filter(|w| markers.contains(&w.as_str())).count();
        if hits > 0 && best.map_or(true, |(_, n)| hits > n) {
            best = Some((*dialect, hits));
        }
    }
    best.map(|(d, _)| d.to_string())
        .unwrap_or_else(|| "standard".to_string())
}

pub fn detect(text: &str) -> DetectedLanguage {
    let language = detect_language(text);
    let dialect = if language == Language::Ar {
        detect_dialect(text)
    } else {
        "standard".to_string()
    };
    DetectedLanguage { language, dialect }
}

/// 通用澄清问题（按语言）
pub fn clarification_fallback(language: &Language) -> &'static str {
    match language {
        Language::Ar => "هل يمكنك توضيح ما تريد مني القيام به بالتفصيل؟",
        Language::Fr => "Pouvez-vous préciser ce que vous souhaitez que je fasse ?",
        _ => "Could you tell me a bit more about what you would like me to do?",
    }
}
