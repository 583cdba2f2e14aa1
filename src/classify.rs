//! Mode auto-selection from the baseline transcript.
//!
//! The classifier looks for *blockers* first: signs that the text is
//! personal study notes (shorthand, reminders, lecture headers, casual
//! wording) and therefore needs the `Readable` treatment. Only when no
//! blocker fires does it look for evidence that the text is already
//! finished prose or mathematics that must be kept `Faithful`. With no
//! evidence either way it falls back to `Readable`.
//!
//! Two checks run before the blockers: a transcript that is nearly all
//! formulas always goes `Readable`, and text that is already typeset
//! LaTeX always goes `Faithful`.

use crate::config::{Language, Mode};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

const ABBREVIATION_THRESHOLD: usize = 2;
const PERSONAL_MARKER_THRESHOLD: usize = 2;
const LECTURE_META_THRESHOLD: usize = 1;
const CASUAL_PHRASE_THRESHOLD: usize = 2;

/// Which blocker forced `Readable` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Blocker {
    FormulasOnly,
    Abbreviations,
    PersonalNotes,
    LectureMetadata,
    CasualLanguage,
}

/// Raw blocker counts, kept for the decision record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockerScores {
    pub abbreviations: usize,
    pub personal_markers: usize,
    pub lecture_metadata: usize,
    pub casual_phrases: usize,
}

impl BlockerScores {
    fn measure(text: &str, language: Language) -> Self {
        Self {
            abbreviations: count_matches(abbreviations(language), text),
            personal_markers: count_personal_markers(text, language),
            lecture_metadata: count_matches(lecture_patterns(language), text),
            casual_phrases: count_matches(casual_phrases(language), text),
        }
    }
}

/// Outcome of [`recommend_mode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeRecommendation {
    pub mode: Mode,
    /// 0.0–1.0.
    pub confidence: f64,
    pub reasons: Vec<String>,
    #[serde(default)]
    pub blocked_by: Option<Blocker>,
    pub scores: BlockerScores,
}

impl ModeRecommendation {
    fn readable(confidence: f64, reason: String, blocker: Blocker, scores: BlockerScores) -> Self {
        Self {
            mode: Mode::Readable,
            confidence,
            reasons: vec![reason],
            blocked_by: Some(blocker),
            scores,
        }
    }
}

/// Pick a mode for a transcript.
pub fn recommend_mode(text: &str, language: Language) -> ModeRecommendation {
    let scores = BlockerScores::measure(text, language);
    let recommendation = classify(text, language, scores);
    debug!(
        "Auto mode: {} ({:.2}) {:?} scores={:?}",
        recommendation.mode, recommendation.confidence, recommendation.blocked_by, scores
    );
    recommendation
}

fn classify(text: &str, language: Language, scores: BlockerScores) -> ModeRecommendation {
    if formulas_only(text) {
        return ModeRecommendation::readable(
            0.9,
            "Formulas-only document needs explanations".into(),
            Blocker::FormulasOnly,
            scores,
        );
    }
    if quality_latex(text) {
        return ModeRecommendation {
            mode: Mode::Faithful,
            confidence: 0.85,
            reasons: vec!["Already typeset LaTeX".into()],
            blocked_by: None,
            scores,
        };
    }

    if scores.abbreviations >= ABBREVIATION_THRESHOLD {
        return ModeRecommendation::readable(
            1.0,
            format!("Study abbreviations ({})", scores.abbreviations),
            Blocker::Abbreviations,
            scores,
        );
    }
    if scores.personal_markers >= PERSONAL_MARKER_THRESHOLD {
        return ModeRecommendation::readable(
            1.0,
            format!("Personal study markers ({})", scores.personal_markers),
            Blocker::PersonalNotes,
            scores,
        );
    }
    if scores.lecture_metadata >= LECTURE_META_THRESHOLD {
        return ModeRecommendation::readable(
            0.9,
            "Lecture metadata".into(),
            Blocker::LectureMetadata,
            scores,
        );
    }
    if scores.casual_phrases >= CASUAL_PHRASE_THRESHOLD {
        return ModeRecommendation::readable(
            1.0,
            format!("Casual language ({})", scores.casual_phrases),
            Blocker::CasualLanguage,
            scores,
        );
    }

    let mut reasons = Vec::new();
    if formal_essay(text, language) {
        reasons.push("Formal essay or article".to_string());
    }
    if narrative(text, language) {
        reasons.push("Literary or narrative text".to_string());
    }
    if formal_math(text, language) {
        reasons.push("Formal mathematical exposition".to_string());
    }
    if !reasons.is_empty() {
        let confidence = (0.75 + 0.05 * reasons.len() as f64).min(0.95);
        return ModeRecommendation {
            mode: Mode::Faithful,
            confidence: (confidence * 100.0).round() / 100.0,
            reasons,
            blocked_by: None,
            scores,
        };
    }

    if scores.abbreviations > 0 {
        reasons.push(format!(
            "Has abbreviations ({}), below the blocker threshold",
            scores.abbreviations
        ));
    }
    if scores.personal_markers > 0 {
        reasons.push(format!(
            "Has personal markers ({}), below the blocker threshold",
            scores.personal_markers
        ));
    }
    if reasons.is_empty() {
        reasons.push("No evidence for faithful mode".to_string());
    }
    ModeRecommendation {
        mode: Mode::Readable,
        confidence: 0.6,
        reasons,
        blocked_by: None,
        scores,
    }
}

// ── Blocker tables ───────────────────────────────────────────────────────────

/// Short shorthand needs word boundaries; longer phrases match as written.
fn shorthand(token: &str) -> Regex {
    let escaped = regex::escape(token.trim());
    let pattern = if token.trim().chars().count() <= 3 {
        let word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric());
        let lead = if word(token.trim().chars().next()) { r"\b" } else { "" };
        let tail = if word(token.trim().chars().last()) { r"\b" } else { "" };
        format!("(?i){lead}{escaped}{tail}")
    } else {
        escaped
    };
    Regex::new(&pattern).unwrap()
}

fn word_pattern(phrase: &str) -> Regex {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(phrase))).unwrap()
}

static EN_ABBREVIATIONS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        "=> ", "-> ", "~", "btw", "imo", "fyi", "aka", "asap", "etc.", "w/", "w/o", "thx", "pls",
        "plz", "lol", "idk", "tbh", "smth", "sth", "gonna", "wanna", "kinda", "sorta",
    ]
    .iter()
    .map(|t| shorthand(t))
    .collect()
});

static RU_ABBREVIATIONS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        "т.к.", "т.е.", "т.п.", "т.д.", "и т.д.", "и т.п.", "=> ", "-> ", "~", "и тд", "итд", "кмк",
        "кст", "мб", "имхо", "спс", "пжл", "пж", "норм", "ок", "в-общем", "в общем", "ну тип",
        "чет", "чё",
    ]
    .iter()
    .map(|t| shorthand(t))
    .collect()
});

const EN_PERSONAL_MARKERS: &[&str] = &[
    "TODO", "todo", "FIXME", "NOTE", "!!!", "???", "!?", "IMPORTANT", "important", "DON'T FORGET",
    "don't forget", "figure out", "understand this", "ask about", "clarify", "check", "review",
    "REMINDER", "reminder", "cool", "bad", "unclear",
];

const RU_PERSONAL_MARKERS: &[&str] = &[
    "TODO", "todo", "тудушка", "!!!", "???", "!?", "ВАЖНО", "важно", "НЕ ЗАБЫТЬ", "не забыть",
    "разобраться", "понять это", "спросить", "уточнить", "проверить", "посмотреть", "REMINDER",
    "напоминание", "круто", "фигня", "непонятно",
];

static EN_LECTURE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"Lecture\s+\d+",
        r"Class\s+\d+",
        r"Seminar\s+\d+",
        r"Notes\s+from",
        r"(?:Lecture|Class|Seminar|Professor|Instructor).*?(?:[A-Z][a-z]+\s+\d{1,2},\s+\d{4}|\d{2}/\d{2}/\d{4})",
        r"Professor:",
        r"Instructor:",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?im){p}")).unwrap())
    .collect()
});

static RU_LECTURE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"Лекция\s+\d+",
        r"Пара\s+\d+",
        r"Занятие\s+\d+",
        r"Семинар\s+\d+",
        r"Конспект\s+от",
        r"(?:Лекция|Пара|Занятие|Семинар|Препод|Преподаватель|Курс).*?\d{2}\.\d{2}\.\d{4}",
        r"Преподаватель:",
        r"Препод:",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?im){p}")).unwrap())
    .collect()
});

static EN_CASUAL: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        "basically", "kinda", "sorta", "you know", "whatever", "stuff", "gonna", "wanna",
    ]
    .iter()
    .map(|p| word_pattern(p))
    .collect()
});

static RU_CASUAL: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        "короче", "в общем", "типа", "типо", "ну вот", "ну", "блин", "короч", "как бы", "чет",
        "чёт", "кароч", "вообще", "вобще", "ваще", "прост", "просто",
    ]
    .iter()
    .map(|p| word_pattern(p))
    .collect()
});

fn abbreviations(language: Language) -> &'static [Regex] {
    match language {
        Language::En => &EN_ABBREVIATIONS,
        Language::Ru => &RU_ABBREVIATIONS,
    }
}

fn lecture_patterns(language: Language) -> &'static [Regex] {
    match language {
        Language::En => &EN_LECTURE_PATTERNS,
        Language::Ru => &RU_LECTURE_PATTERNS,
    }
}

fn casual_phrases(language: Language) -> &'static [Regex] {
    match language {
        Language::En => &EN_CASUAL,
        Language::Ru => &RU_CASUAL,
    }
}

/// Number of table entries with at least one match.
fn count_matches(table: &[Regex], text: &str) -> usize {
    table.iter().filter(|re| re.is_match(text)).count()
}

fn count_personal_markers(text: &str, language: Language) -> usize {
    let markers = match language {
        Language::En => EN_PERSONAL_MARKERS,
        Language::Ru => RU_PERSONAL_MARKERS,
    };
    markers.iter().filter(|m| text.contains(*m)).count()
}

// ── Content detectors ────────────────────────────────────────────────────────

static RE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b[a-zа-яё]+\b").unwrap());

fn formula_indicators(text: &str) -> usize {
    text.matches('$').count()
        + text.matches("\\begin{equation").count()
        + text.matches("\\[").count()
}

/// Many formulas, little explanatory text.
fn formulas_only(text: &str) -> bool {
    let formulas = formula_indicators(text);
    let words = RE_WORD.find_iter(text).count();
    (formulas >= 6 && words < 20) || (words > 0 && formulas as f64 / words as f64 > 0.5)
}

static RE_SECTION_CMD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\section").unwrap());
static RE_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\label\{").unwrap());
static RE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\(?:ref|eqref)\{").unwrap());
static RE_NUMBERED_SECTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\d+\s+[A-Z]").unwrap());
static RE_NUMBERED_SUBSECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\d+\.\d+\s+[A-Z]").unwrap());
static RE_EQUATION_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(\d+\)").unwrap());
static RE_EQUATION_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)equation\s+\(\d+\)").unwrap());
static RE_OCR_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\?\?+|â€™|\[\[illegible\]\]").unwrap());

/// LaTeX source, or a rendered document with numbered structure.
fn quality_latex(text: &str) -> bool {
    let sections = RE_SECTION_CMD.find_iter(text).count() >= 2;
    let labels = RE_LABEL.is_match(text);
    let refs = RE_REF.is_match(text);
    let source = (sections || (labels && refs)) && !RE_OCR_NOISE.is_match(text);

    let numbered = RE_NUMBERED_SECTION.find_iter(text).count() >= 2;
    let subsections = RE_NUMBERED_SUBSECTION.is_match(text);
    let equation_numbers = RE_EQUATION_NUMBER.find_iter(text).count() >= 2;
    let equation_refs = RE_EQUATION_REF.is_match(text);
    let rendered = (numbered && equation_numbers) || (subsections && equation_refs);

    source || rendered
}

const EN_CONNECTORS: &[&str] = &[
    "therefore", "consequently", "as a result", "it should be noted", "in conclusion", "moreover",
    "furthermore", "in other words",
];

const RU_CONNECTORS: &[&str] = &[
    "следовательно", "таким образом", "в результате", "необходимо отметить", "в заключение",
    "более того", "кроме того", "иными словами",
];

static RE_NUMBERED_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\d+\)").unwrap());

/// Long paragraphs joined by formal connectors.
fn formal_essay(text: &str, language: Language) -> bool {
    let long_paragraphs = text
        .split("\n\n")
        .filter(|p| p.split_whitespace().count() > 50)
        .count();
    let lower = text.to_lowercase();
    let connectors = match language {
        Language::En => EN_CONNECTORS,
        Language::Ru => RU_CONNECTORS,
    };
    let connector_count = connectors.iter().filter(|c| lower.contains(*c)).count();
    let few_numbered_items = RE_NUMBERED_ITEM.find_iter(text).count() < 3;

    let essay = if text.chars().count() < 1000 {
        (long_paragraphs >= 1 && connector_count >= 1) || long_paragraphs >= 2
    } else {
        (long_paragraphs >= 2 && connector_count >= 1) || connector_count >= 2
    };
    essay && few_numbered_items
}

static EN_PAST_TENSE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        "was", "were", "had", "went", "said", "became", "walked", "looked", "thought", "wrote",
        "offered", "argued",
    ]
    .iter()
    .map(|w| word_pattern(w))
    .collect()
});

static RU_PAST_TENSE: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        "был", "была", "были", "было", "стал", "стала", "стали", "стало", "пошёл", "пошла",
        "пошли", "сказал", "сказала", "сказали", "пролетала", "пролетал", "пролетели",
        "смешались", "смешалось", "смешалась", "оставалась", "оставался", "оставалось",
        "оставались", "отделились", "отделилась", "родила",
    ]
    .iter()
    .map(|w| word_pattern(w))
    .collect()
});

/// Past-tense storytelling or quoted dialogue.
fn narrative(text: &str, language: Language) -> bool {
    let table: &[Regex] = match language {
        Language::En => &EN_PAST_TENSE,
        Language::Ru => &RU_PAST_TENSE,
    };
    let quotes = text.contains('"')
        || text.contains('«')
        || text.contains('»')
        || text.matches('\'').count() >= 4;
    count_matches(table, text) >= 3 || quotes
}

const EN_MATH_KEYWORDS: &[&str] = &[
    "Theorem", "Lemma", "Proof", "Corollary", "Proposition", "if and only if",
    "necessary and sufficient",
];

const RU_MATH_KEYWORDS: &[&str] = &[
    "Теорема", "Лемма", "Доказательство", "Следствие", "Утверждение", "необходимо и достаточно",
    "тогда и только тогда",
];

/// Theorem/proof vocabulary with plenty of formulas.
fn formal_math(text: &str, language: Language) -> bool {
    let keywords = match language {
        Language::En => EN_MATH_KEYWORDS,
        Language::Ru => RU_MATH_KEYWORDS,
    };
    let keyword_count = keywords.iter().filter(|k| text.contains(*k)).count();
    keyword_count >= 2 && formula_indicators(text) >= 5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formulas_only_goes_readable() {
        let text = "$a=b$ $c=d$ \\[x\\] \\[y\\] then";
        let r = recommend_mode(text, Language::En);
        assert_eq!(r.mode, Mode::Readable);
        assert_eq!(r.blocked_by, Some(Blocker::FormulasOnly));
        assert_eq!(r.confidence, 0.9);
    }

    #[test]
    fn typeset_latex_goes_faithful() {
        let text = "\\section{Intro}\nSome text here about things.\n\\section{Body}\nMore words in the body of the text.";
        let r = recommend_mode(text, Language::En);
        assert_eq!(r.mode, Mode::Faithful);
        assert_eq!(r.confidence, 0.85);
        assert!(r.blocked_by.is_none());
    }

    #[test]
    fn lecture_header_blocks() {
        let text = "Lecture 5\nToday we look at the definition of a group and its basic properties.";
        let r = recommend_mode(text, Language::En);
        assert_eq!(r.mode, Mode::Readable);
        assert_eq!(r.blocked_by, Some(Blocker::LectureMetadata));
        assert_eq!(r.scores.lecture_metadata, 1);
    }

    #[test]
    fn russian_shorthand_blocks() {
        let text = "Группа, т.е. множество с операцией, т.к. операция ассоциативна и есть единица.";
        let r = recommend_mode(text, Language::Ru);
        assert_eq!(r.blocked_by, Some(Blocker::Abbreviations));
        assert_eq!(r.scores.abbreviations, 2);
    }

    #[test]
    fn personal_markers_block() {
        let text = "TODO revisit this section of the notes about limits and continuity!!!";
        let r = recommend_mode(text, Language::En);
        assert_eq!(r.blocked_by, Some(Blocker::PersonalNotes));
    }

    #[test]
    fn casual_words_need_word_boundaries() {
        let r = recommend_mode("Нужно показать, что функция непрерывна на отрезке и ограничена.", Language::Ru);
        assert_eq!(r.scores.casual_phrases, 0);
    }

    #[test]
    fn narrative_goes_faithful() {
        let text = "The old man was tired. He went home and said nothing. The road became dark and he walked slowly through the empty town.";
        let r = recommend_mode(text, Language::En);
        assert_eq!(r.mode, Mode::Faithful);
        assert_eq!(r.confidence, 0.8);
        assert_eq!(r.reasons, vec!["Literary or narrative text"]);
    }

    #[test]
    fn plain_notes_default_to_readable() {
        let text = "A group is a set with an associative operation and an identity element.";
        let r = recommend_mode(text, Language::En);
        assert_eq!(r.mode, Mode::Readable);
        assert_eq!(r.confidence, 0.6);
        assert!(r.blocked_by.is_none());
    }
}
