//! Language-keyed lexicons used by the normalizer and the validator.
//!
//! Every table is a `Lazy` static built once per process. Lookups take the
//! document [`Language`] explicitly; nothing here reads global state.

use crate::config::Language;
use crate::document::BoxKind;
use once_cell::sync::Lazy;
use regex::Regex;

// ── Box triggers ─────────────────────────────────────────────────────────────

/// One `(pattern, kind)` row of the environment-wrapping table.
pub struct BoxTrigger {
    pub kind: BoxKind,
    pattern: Regex,
    fixed_title: Option<&'static str>,
}

impl BoxTrigger {
    /// `(?i)` trigger word(s), an optional number, an optional `(Title)`
    /// and a mandatory delimiter followed by whitespace or end of text.
    fn new(kind: BoxKind, words: &str, fixed_title: Option<&'static str>) -> Self {
        let pattern = format!(
            r"(?i)^\s*(?:{words})(?:\s+\d+(?:\.\d+)*)?\s*(?:\((?P<title>[^)\n]*)\))?\s*[:.—–-](?:\s|$)"
        );
        Self {
            kind,
            pattern: Regex::new(&pattern).unwrap(),
            fixed_title,
        }
    }

    /// Returns the title (possibly none) when `text` starts with this trigger.
    pub fn matches(&self, text: &str) -> Option<Option<String>> {
        let caps = self.pattern.captures(text)?;
        if let Some(fixed) = self.fixed_title {
            return Some(Some(fixed.to_string()));
        }
        let title = caps
            .name("title")
            .map(|m| m.as_str().trim().to_string())
            .filter(|t| !t.is_empty());
        Some(title)
    }
}

static EN_TRIGGERS: Lazy<Vec<BoxTrigger>> = Lazy::new(|| {
    vec![
        BoxTrigger::new(BoxKind::Definition, r"definition|def", None),
        BoxTrigger::new(BoxKind::Theorem, r"theorem|thm", None),
        BoxTrigger::new(BoxKind::Lemma, r"lemma", None),
        BoxTrigger::new(BoxKind::Corollary, r"corollary|cor", None),
        BoxTrigger::new(BoxKind::Example, r"example|ex", None),
        BoxTrigger::new(BoxKind::Question, r"question|q", None),
        BoxTrigger::new(BoxKind::Note, r"note|remark|n\.b|nb", None),
        BoxTrigger::new(BoxKind::Proof, r"proof|pf", None),
    ]
});

static RU_TRIGGERS: Lazy<Vec<BoxTrigger>> = Lazy::new(|| {
    vec![
        BoxTrigger::new(BoxKind::Definition, r"определение|опр", None),
        BoxTrigger::new(BoxKind::Theorem, r"теорема", None),
        BoxTrigger::new(BoxKind::Lemma, r"лемма", None),
        BoxTrigger::new(BoxKind::Corollary, r"следствие", None),
        BoxTrigger::new(BoxKind::Example, r"пример", None),
        BoxTrigger::new(BoxKind::Example, r"дано", Some("Дано")),
        BoxTrigger::new(BoxKind::Question, r"вопрос", None),
        BoxTrigger::new(BoxKind::Note, r"замечание|примечание", None),
        BoxTrigger::new(BoxKind::Proof, r"доказательство|док-во", None),
    ]
});

pub fn box_triggers(language: Language) -> &'static [BoxTrigger] {
    match language {
        Language::En => &EN_TRIGGERS,
        Language::Ru => &RU_TRIGGERS,
    }
}

/// First matching trigger wins.
pub fn match_box_trigger(language: Language, text: &str) -> Option<(BoxKind, Option<String>)> {
    box_triggers(language)
        .iter()
        .find_map(|t| t.matches(text).map(|title| (t.kind, title)))
}

// ── Personal reminders ───────────────────────────────────────────────────────

// Tag lines (`TODO …`) are reminders at any length; imperative notes
// ("don't forget …") only when they open a short line.
const REMINDER_MAX_WORDS: usize = 10;

static EN_REMINDER_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:TODO|FIXME|REMINDER)\b").unwrap());

static EN_REMINDER_NOTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:please\s+)?(?:don'?t\s+forget|ask\s+(?:the\s+)?(?:professor|prof|teacher|lecturer|instructor|TA))\b",
    )
    .unwrap()
});

static RU_REMINDER_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:TODO|FIXME|напоминание)\b").unwrap());

static RU_REMINDER_NOTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:не\s+забыть|спросить|уточнить)\b",
    )
    .unwrap()
});

/// Whether a single line reads as a note-to-self.
pub fn is_personal_reminder(language: Language, line: &str) -> bool {
    let (tag, note) = match language {
        Language::En => (&EN_REMINDER_TAG, &EN_REMINDER_NOTE),
        Language::Ru => (&RU_REMINDER_TAG, &RU_REMINDER_NOTE),
    };
    tag.is_match(line)
        || (note.is_match(line) && line.split_whitespace().count() <= REMINDER_MAX_WORDS)
}

// ── Transcription artifacts ──────────────────────────────────────────────────

static ARTIFACT_LINES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^-{2,}\s*(?i:page|страница)\s+\d+\s*-{2,}$",
        r"^\\(?:newpage|clearpage|pagebreak)(?:\{\})?$",
        r"(?i)^<!--\s*page\s*\d+\s*-->$",
        r"(?i)^page\s+\d+(?:\s+of\s+\d+)?$",
        r"(?i)^страница\s+\d+(?:\s+из\s+\d+)?$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Whether a line is a page-break marker or similar leftover.
///
/// Artifact markers are language-independent: a Russian transcript may
/// still carry the `--- Page N ---` markers of the baseline extractor.
pub fn is_transcription_artifact(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && ARTIFACT_LINES.iter().any(|re| re.is_match(line))
}

// ── Heading-like lines ───────────────────────────────────────────────────────

/// Course codes such as `MAS 201`, `MATH203`, `CS-101`.
static COURSE_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{2,}[ -]?\d{2,3}[\w\- ]*$").unwrap());

static EN_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:lecture|seminar|class)\s*\d+\b[^\n]*$").unwrap());

static RU_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:лекция|семинар|занятие|пара)\s*\d+\b[^\n]*$").unwrap()
});

const MAX_HEADER_LEN: usize = 80;

/// Whether a paragraph is a course or lecture header line.
pub fn is_heading_like(language: Language, text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() || text.contains('\n') || text.chars().count() > MAX_HEADER_LEN {
        return false;
    }
    let header = match language {
        Language::En => &EN_HEADER,
        Language::Ru => &RU_HEADER,
    };
    COURSE_CODE.is_match(text) || header.is_match(text)
}

// ── Connectives ──────────────────────────────────────────────────────────────

/// Places where readable smoothing may insert a linking phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectiveSlot {
    /// Between a theorem-like box and the proof that follows it.
    BeforeProof,
    /// Between a paragraph and the aligned block that follows it.
    BeforeAligned,
}

pub fn connective(language: Language, slot: ConnectiveSlot) -> &'static str {
    match (language, slot) {
        (Language::En, ConnectiveSlot::BeforeProof) => "We now prove this statement.",
        (Language::En, ConnectiveSlot::BeforeAligned) => "This gives:",
        (Language::Ru, ConnectiveSlot::BeforeProof) => "Докажем это утверждение.",
        (Language::Ru, ConnectiveSlot::BeforeAligned) => "Получаем:",
    }
}

/// Whether `text` is one of the connectives this crate inserts.
pub fn is_known_connective(text: &str) -> bool {
    [Language::En, Language::Ru].into_iter().any(|lang| {
        [ConnectiveSlot::BeforeProof, ConnectiveSlot::BeforeAligned]
            .into_iter()
            .any(|slot| connective(lang, slot) == text)
    })
}

// ── Summary narrative ────────────────────────────────────────────────────────

static SUMMARY_PHRASES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(?:the|this)\s+document\b",
        r"(?i)\bit\s+explains\b",
        r"(?i)\bin\s+summary\b",
        r"(?i)\bto\s+summari[sz]e\b",
        r"(?i)\b(?:этот|данный)\s+документ\b",
        r"(?i)\bв\s+итоге\b",
        r"(?i)\bподводя\s+итог",
        r"(?i)\bрезюмируя\b",
        r"(?i)\bон\s+объясняет\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Narrative phrases found in `text`, in table order.
///
/// Both languages are checked: a model asked for Russian may still
/// summarise in English.
pub fn summary_phrases(text: &str) -> Vec<String> {
    SUMMARY_PHRASES
        .iter()
        .filter_map(|re| re.find(text).map(|m| m.as_str().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn theorem_trigger_without_title() {
        assert_eq!(
            match_box_trigger(Language::En, "Theorem: For all x, x=x."),
            Some((BoxKind::Theorem, None))
        );
    }

    #[test]
    fn trigger_with_parenthesised_title() {
        assert_eq!(
            match_box_trigger(Language::En, "Theorem (Pythagoras): a^2+b^2=c^2"),
            Some((BoxKind::Theorem, Some("Pythagoras".to_string())))
        );
        assert_eq!(
            match_box_trigger(Language::En, "Lemma 2.1. Every x is x."),
            Some((BoxKind::Lemma, None))
        );
    }

    #[test]
    fn trigger_needs_delimiter() {
        assert_eq!(match_box_trigger(Language::En, "Note that x is even."), None);
        assert_eq!(match_box_trigger(Language::En, "Theorem-like results"), None);
        assert_eq!(match_box_trigger(Language::En, "Examples are below."), None);
    }

    #[test]
    fn russian_given_is_titled_example() {
        assert_eq!(
            match_box_trigger(Language::Ru, "Дано: треугольник ABC"),
            Some((BoxKind::Example, Some("Дано".to_string())))
        );
        assert_eq!(
            match_box_trigger(Language::Ru, "Доказательство. Очевидно."),
            Some((BoxKind::Proof, None))
        );
    }

    #[test]
    fn reminders() {
        assert!(is_personal_reminder(Language::En, "TODO ask professor"));
        assert!(is_personal_reminder(Language::En, "don't forget the homework"));
        assert!(!is_personal_reminder(Language::En, "The professor proved it."));
        assert!(is_personal_reminder(Language::Ru, "не забыть про дз"));
        assert!(is_personal_reminder(Language::Ru, "Спросить про лемму 3"));
    }

    #[test]
    fn content_mentioning_reminders_is_not_noise() {
        assert!(!is_personal_reminder(
            Language::En,
            "If you don't forget the constant, the answer is x^2 + C."
        ));
        assert!(!is_personal_reminder(
            Language::En,
            "Don't forget that every bounded monotone sequence of real numbers converges to its supremum or infimum."
        ));
        assert!(!is_personal_reminder(Language::En, "We ask the professor's question again."));
        assert!(!is_personal_reminder(Language::Ru, "Важно не забыть про константу интегрирования."));
    }

    #[test]
    fn artifacts() {
        assert!(is_transcription_artifact("--- Page 3 ---"));
        assert!(is_transcription_artifact("\\newpage"));
        assert!(is_transcription_artifact("<!-- page 2 -->"));
        assert!(is_transcription_artifact("Page 2 of 5"));
        assert!(is_transcription_artifact("Страница 4"));
        assert!(!is_transcription_artifact("Page 2 shows the proof."));
    }

    #[test]
    fn heading_like_lines() {
        assert!(is_heading_like(Language::En, "MAS 201 Linear Algebra"));
        assert!(is_heading_like(Language::En, "Lecture 9-2"));
        assert!(is_heading_like(Language::Ru, "Лекция 3. Производные"));
        assert!(!is_heading_like(Language::En, "Lecture notes are useful"));
        assert!(!is_heading_like(Language::En, "Lecture 5\nsecond line"));
    }

    #[test]
    fn summary_hits() {
        let hits = summary_phrases("In summary, this document explains limits.");
        assert_eq!(hits.len(), 2);
        assert!(summary_phrases("Let x be real.").is_empty());
    }

    #[test]
    fn connectives_are_recognised() {
        let c = connective(Language::Ru, ConnectiveSlot::BeforeAligned);
        assert!(is_known_connective(c));
        assert!(!is_known_connective("Hence"));
    }
}
