//! Rule-based normalizer: parsed nodes → [`CandidateDocument`].
//!
//! The normalizer is an ordered table of [`Rule`]s. Each rule has a mode
//! gate and a rewrite that consumes one node sequence and returns a new
//! one; no rule edits text inside a content node. After every rule a token
//! gate checks that the rule's output text is an in-order subsequence of
//! its input text, so a faulty rule surfaces as
//! [`NormalizationError::ContentAltered`] instead of a silently changed
//! document.
//!
//! ## Rule Order
//!
//! 1. `headings`: demote part/chapter, promote or annotate header lines
//! 2. `noise`: drop whitelisted noise, logging every removal
//! 3. `boxes`: wrap trigger paragraphs in box environments
//! 4. `equations`: merge equation runs into `align*` blocks
//! 5. `lists`: turn marker paragraphs into lists
//! 6. `connectives`: readable mode only: short linking phrases
//!
//! Rule 1 maps nodes one-to-one, so rule 2 sees the parsed indices and
//! can record them in the log.

use crate::config::{Language, Mode};
use crate::document::{
    AlignedLine, BoxKind, CandidateDocument, HeadingLevel, ListStyle, NoiseCategory, Removal,
    RewriteLog, StructuralNode,
};
use crate::error::NormalizationError;
use crate::pipeline::lexicon::{self, ConnectiveSlot};
use crate::pipeline::parse::ParsedDocument;
use crate::pipeline::render;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

type Rewrite = fn(&mut RuleContext, Vec<StructuralNode>) -> Result<Vec<StructuralNode>, NormalizationError>;

/// One row of the rule table.
pub struct Rule {
    pub name: &'static str,
    applies: fn(Mode) -> bool,
    rewrite: Rewrite,
}

impl Rule {
    pub fn applies(&self, mode: Mode) -> bool {
        (self.applies)(mode)
    }
}

struct RuleContext {
    language: Language,
    log: RewriteLog,
}

fn any_mode(_: Mode) -> bool {
    true
}

fn readable_only(mode: Mode) -> bool {
    mode == Mode::Readable
}

pub static RULES: [Rule; 6] = [
    Rule { name: "headings", applies: any_mode, rewrite: normalize_headings },
    Rule { name: "noise", applies: any_mode, rewrite: remove_noise },
    Rule { name: "boxes", applies: any_mode, rewrite: wrap_boxes },
    Rule { name: "equations", applies: any_mode, rewrite: merge_equations },
    Rule { name: "lists", applies: any_mode, rewrite: convert_lists },
    Rule { name: "connectives", applies: readable_only, rewrite: insert_connectives },
];

/// Run the rule table over a parsed document.
///
/// # Errors
/// [`NormalizationError`] when a rule breaks its own contract or the
/// rendered text has unbalanced environments. Parser output should never
/// trigger either.
pub fn normalize(
    parsed: &ParsedDocument,
    mode: Mode,
    language: Language,
) -> Result<CandidateDocument, NormalizationError> {
    let mut ctx = RuleContext {
        language,
        log: RewriteLog {
            upstream_dropped: parsed.meta.dropped_notes.clone(),
            ..RewriteLog::default()
        },
    };

    let mut nodes = parsed.nodes.clone();
    for rule in RULES.iter().filter(|r| r.applies(mode)) {
        let before = nodes.clone();
        nodes = (rule.rewrite)(&mut ctx, nodes)?;
        check_token_order(rule.name, &before, &nodes)?;
        debug!("Rule '{}' done: {} → {} nodes", rule.name, before.len(), nodes.len());
    }

    let source = render::render(&nodes, language);
    render::check_environments(&source)?;

    Ok(CandidateDocument {
        mode,
        language,
        nodes,
        source,
        log: ctx.log,
    })
}

// ── Rule 1: Headings ─────────────────────────────────────────────────────────

fn normalize_headings(
    ctx: &mut RuleContext,
    nodes: Vec<StructuralNode>,
) -> Result<Vec<StructuralNode>, NormalizationError> {
    let has_section = nodes
        .iter()
        .any(|n| matches!(n, StructuralNode::Section { .. }));

    let out = nodes
        .into_iter()
        .enumerate()
        .map(|(index, node)| match node {
            StructuralNode::Section { level, text } if !level.is_allowed() => {
                StructuralNode::section(HeadingLevel::Section, text)
            }
            StructuralNode::Paragraph { text } if lexicon::is_heading_like(ctx.language, &text) => {
                if index == 0 && !has_section {
                    ctx.log.promotions.push(text.clone());
                    StructuralNode::section(HeadingLevel::Section, text.trim())
                } else {
                    ctx.log.annotations.push(text.clone());
                    StructuralNode::Annotation { text }
                }
            }
            other => other,
        })
        .collect();
    Ok(out)
}

// ── Rule 2: Noise ────────────────────────────────────────────────────────────

/// Paragraphs repeated verbatim need at least this many words to count as duplicates.
const MIN_DUPLICATE_WORDS: usize = 3;

fn duplicate_key(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Classify a paragraph against the whitelisted noise categories.
///
/// `earlier` holds the duplicate keys of the paragraphs kept so far.
pub fn classify_noise(
    language: Language,
    text: &str,
    earlier: &HashSet<String>,
) -> Option<NoiseCategory> {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.is_empty() {
        return None;
    }
    if lines.iter().all(|l| lexicon::is_transcription_artifact(l)) {
        return Some(NoiseCategory::TranscriptionArtifact);
    }
    if lines.len() == 1 && lexicon::is_personal_reminder(language, lines[0]) {
        return Some(NoiseCategory::PersonalReminder);
    }
    let key = duplicate_key(text);
    if key.split(' ').count() >= MIN_DUPLICATE_WORDS && earlier.contains(&key) {
        return Some(NoiseCategory::Duplicate);
    }
    None
}

/// Check a logged removal against the parsed sequence it came from.
///
/// The removed node must be the paragraph at `source_index`, and its text
/// must still classify as the logged category.
pub fn removal_holds(language: Language, removal: &Removal, parsed: &[StructuralNode]) -> bool {
    let Some(StructuralNode::Paragraph { text }) = parsed.get(removal.source_index) else {
        return false;
    };
    if text != &removal.text {
        return false;
    }
    let earlier: HashSet<String> = parsed[..removal.source_index]
        .iter()
        .filter_map(|n| match n {
            StructuralNode::Paragraph { text } => Some(duplicate_key(text)),
            _ => None,
        })
        .collect();
    classify_noise(language, text, &earlier) == Some(removal.category)
}

fn remove_noise(
    ctx: &mut RuleContext,
    nodes: Vec<StructuralNode>,
) -> Result<Vec<StructuralNode>, NormalizationError> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(nodes.len());
    for (source_index, node) in nodes.into_iter().enumerate() {
        if let StructuralNode::Paragraph { text } = &node {
            if let Some(category) = classify_noise(ctx.language, text, &seen) {
                debug!("Removing {} at node {}", category, source_index);
                ctx.log.removals.push(Removal {
                    category,
                    text: text.clone(),
                    source_index,
                });
                continue;
            }
            seen.insert(duplicate_key(text));
        }
        out.push(node);
    }
    Ok(out)
}

// ── Rule 3: Box wrapping ─────────────────────────────────────────────────────

fn wrap_boxes(
    ctx: &mut RuleContext,
    nodes: Vec<StructuralNode>,
) -> Result<Vec<StructuralNode>, NormalizationError> {
    let language = ctx.language;
    let out = nodes
        .into_iter()
        .map(|node| match node {
            StructuralNode::Paragraph { text } => match lexicon::match_box_trigger(language, &text) {
                Some((kind, title)) => StructuralNode::Boxed { kind, title, text },
                None => StructuralNode::Paragraph { text },
            },
            StructuralNode::Boxed {
                kind: BoxKind::Note,
                title,
                text,
            } => match lexicon::match_box_trigger(language, &text) {
                Some((kind, found)) if kind != BoxKind::Note => StructuralNode::Boxed {
                    kind,
                    title: found.or(title),
                    text,
                },
                _ => StructuralNode::Boxed {
                    kind: BoxKind::Note,
                    title,
                    text,
                },
            },
            other => other,
        })
        .collect();
    Ok(out)
}

// ── Rule 4: Equation runs ────────────────────────────────────────────────────

fn mergeable(latex: &str) -> bool {
    !latex.trim().is_empty() && !has_top_level_break(latex)
}

/// `\\` outside any environment would split an `align*` row.
fn has_top_level_break(latex: &str) -> bool {
    let mut depth = 0i32;
    let mut rest = latex;
    while let Some(pos) = rest.find('\\') {
        let after = &rest[pos + 1..];
        if after.starts_with("begin{") {
            depth += 1;
        } else if after.starts_with("end{") {
            depth -= 1;
        } else if after.starts_with('\\') && depth <= 0 {
            return true;
        }
        let skip = if after.starts_with('\\') { 2 } else { 1 };
        rest = &rest[pos + skip..];
    }
    false
}

const RELATION_COMMANDS: [&str; 6] = ["leq", "le", "geq", "ge", "approx", "equiv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Command(&'a str),
    Symbol(u8),
}

/// Tokens outside every group and every nested `\begin{..}..\end{..}`.
fn top_level_tokens(latex: &str) -> Vec<(usize, Token<'_>)> {
    let bytes = latex.as_bytes();
    let mut tokens = Vec::new();
    let mut depth = 0i32;
    let mut envs = 0i32;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                let name_len = bytes[i + 1..]
                    .iter()
                    .take_while(|b| b.is_ascii_alphabetic())
                    .count();
                if name_len == 0 {
                    // Escaped symbol such as `\{` or `\&`.
                    i += 2;
                    continue;
                }
                let name = &latex[i + 1..i + 1 + name_len];
                match name {
                    "begin" => envs += 1,
                    "end" => envs -= 1,
                    _ if depth == 0 && envs <= 0 => tokens.push((i, Token::Command(name))),
                    _ => {}
                }
                i += 1 + name_len;
                continue;
            }
            b'{' | b'(' | b'[' => depth += 1,
            b'}' | b')' | b']' => depth -= 1,
            b if depth == 0 && envs <= 0 => tokens.push((i, Token::Symbol(b))),
            _ => {}
        }
        i += 1;
    }
    tokens
}

/// Byte offset of the first top-level relation in `latex`.
pub fn relation_split(latex: &str) -> Option<usize> {
    top_level_tokens(latex)
        .into_iter()
        .find(|(_, t)| match t {
            Token::Command(name) => RELATION_COMMANDS.contains(name),
            Token::Symbol(b) => matches!(b, b'=' | b'<' | b'>'),
        })
        .map(|(i, _)| i)
}

/// True when `latex` already carries an alignment marker of its own.
fn has_alignment_marker(latex: &str) -> bool {
    top_level_tokens(latex)
        .into_iter()
        .any(|(_, t)| t == Token::Symbol(b'&'))
}

fn aligned_line(latex: String) -> AlignedLine {
    let split = if has_alignment_marker(&latex) {
        None
    } else {
        relation_split(&latex)
    };
    AlignedLine { latex, split }
}

fn merge_equations(
    _ctx: &mut RuleContext,
    nodes: Vec<StructuralNode>,
) -> Result<Vec<StructuralNode>, NormalizationError> {
    let mut out = Vec::with_capacity(nodes.len());
    let mut run: Vec<String> = Vec::new();

    fn flush(run: &mut Vec<String>, out: &mut Vec<StructuralNode>) -> Result<(), NormalizationError> {
        match run.len() {
            0 => {}
            1 => out.push(StructuralNode::equation(run.remove(0))),
            _ => {
                let lines: Vec<AlignedLine> = run.drain(..).map(aligned_line).collect();
                if let Some(bad) = lines
                    .iter()
                    .find(|l| l.split.is_some_and(|p| !l.latex.is_char_boundary(p)))
                {
                    return Err(NormalizationError::PreconditionViolated {
                        rule: "equations",
                        detail: format!("split point inside a character in '{}'", bad.latex),
                    });
                }
                out.push(StructuralNode::Aligned { lines });
            }
        }
        Ok(())
    }

    for node in nodes {
        match node {
            StructuralNode::Equation { latex } if mergeable(&latex) => run.push(latex),
            other => {
                flush(&mut run, &mut out)?;
                out.push(other);
            }
        }
    }
    flush(&mut run, &mut out)?;
    Ok(out)
}

// ── Rule 5: Lists ────────────────────────────────────────────────────────────

static RE_LIST_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:(?P<bullet>[-–•*])|(?P<number>\d{1,3}[.)])|(?P<letter>[a-zа-я]\)))\s+(?P<text>\S.*)$")
        .unwrap()
});

/// Item text of a marked line, without its marker.
pub fn list_item(line: &str) -> Option<&str> {
    RE_LIST_MARKER
        .captures(line)
        .and_then(|caps| caps.name("text"))
        .map(|m| m.as_str().trim_end())
}

/// Marker style and item text of one line, if it carries a marker.
fn list_line(line: &str) -> Option<(ListStyle, String)> {
    let caps = RE_LIST_MARKER.captures(line)?;
    let style = if caps.name("bullet").is_some() {
        ListStyle::Unordered
    } else {
        ListStyle::Ordered
    };
    Some((style, caps["text"].trim_end().to_string()))
}

/// A multi-line paragraph whose lines all carry markers.
fn marked_paragraph(text: &str) -> Option<(ListStyle, Vec<String>)> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() < 2 {
        return None;
    }
    let parsed: Option<Vec<_>> = lines.iter().map(|l| list_line(l)).collect();
    let parsed = parsed?;
    let style = parsed[0].0;
    Some((style, parsed.into_iter().map(|(_, item)| item).collect()))
}

fn single_marked_line(node: &StructuralNode) -> Option<(ListStyle, String)> {
    match node {
        StructuralNode::Paragraph { text } if !text.trim().contains('\n') => list_line(text),
        _ => None,
    }
}

fn convert_lists(
    _ctx: &mut RuleContext,
    nodes: Vec<StructuralNode>,
) -> Result<Vec<StructuralNode>, NormalizationError> {
    let mut out = Vec::with_capacity(nodes.len());
    let mut run: Vec<(ListStyle, String, StructuralNode)> = Vec::new();

    fn flush(run: &mut Vec<(ListStyle, String, StructuralNode)>, out: &mut Vec<StructuralNode>) {
        if run.len() >= 2 {
            let style = run[0].0;
            let items = run.drain(..).map(|(_, item, _)| item).collect();
            out.push(StructuralNode::ListBlock { style, items });
        } else {
            out.extend(run.drain(..).map(|(_, _, node)| node));
        }
    }

    for node in nodes {
        if let Some((style, item)) = single_marked_line(&node) {
            run.push((style, item, node));
            continue;
        }
        flush(&mut run, &mut out);
        match node {
            StructuralNode::Paragraph { text } => match marked_paragraph(&text) {
                Some((style, items)) => out.push(StructuralNode::ListBlock { style, items }),
                None => out.push(StructuralNode::Paragraph { text }),
            },
            other => out.push(other),
        }
    }
    flush(&mut run, &mut out);
    Ok(out)
}

// ── Rule 6: Connectives ──────────────────────────────────────────────────────

fn insert_connectives(
    ctx: &mut RuleContext,
    nodes: Vec<StructuralNode>,
) -> Result<Vec<StructuralNode>, NormalizationError> {
    let mut out: Vec<StructuralNode> = Vec::with_capacity(nodes.len() + 4);
    for node in nodes {
        let slot = match (&node, out.last()) {
            (
                StructuralNode::Boxed {
                    kind: BoxKind::Proof,
                    ..
                },
                Some(StructuralNode::Boxed { kind, .. }),
            ) if kind.is_theorem_like() => Some(ConnectiveSlot::BeforeProof),
            (StructuralNode::Aligned { .. }, Some(StructuralNode::Paragraph { .. })) => {
                Some(ConnectiveSlot::BeforeAligned)
            }
            _ => None,
        };
        if let Some(slot) = slot {
            out.push(StructuralNode::Connective {
                text: lexicon::connective(ctx.language, slot).to_string(),
            });
        }
        out.push(node);
    }
    Ok(out)
}

// ── Token gate ───────────────────────────────────────────────────────────────

fn content_tokens(nodes: &[StructuralNode], skip_connectives: bool) -> Vec<&str> {
    nodes
        .iter()
        .filter(|n| !(skip_connectives && matches!(n, StructuralNode::Connective { .. })))
        .flat_map(StructuralNode::texts)
        .flat_map(str::split_whitespace)
        .collect()
}

/// The output's non-connective tokens must be an in-order subsequence of
/// the input's tokens.
fn check_token_order(
    rule: &'static str,
    input: &[StructuralNode],
    output: &[StructuralNode],
) -> Result<(), NormalizationError> {
    let source = content_tokens(input, false);
    let mut cursor = source.iter();
    for token in content_tokens(output, true) {
        if !cursor.any(|t| *t == token) {
            return Err(NormalizationError::ContentAltered {
                rule,
                token: token.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::parse::{self, RawMeta, RawShape};

    fn doc(nodes: Vec<StructuralNode>) -> ParsedDocument {
        ParsedDocument {
            shape: RawShape::Blocks,
            nodes,
            meta: RawMeta::default(),
        }
    }

    fn faithful(nodes: Vec<StructuralNode>) -> CandidateDocument {
        normalize(&doc(nodes), Mode::Faithful, Language::En).unwrap()
    }

    #[test]
    fn equation_run_becomes_aligned_block() {
        let parsed = parse::parse(
            r#"{"blocks":[{"type":"equation","latex":"y'=2x"},{"type":"equation","latex":"y''=2"}]}"#,
        )
        .unwrap();
        let candidate = normalize(&parsed, Mode::Faithful, Language::En).unwrap();
        assert_eq!(
            candidate.nodes,
            vec![StructuralNode::Aligned {
                lines: vec![
                    AlignedLine { latex: "y'=2x".into(), split: Some(2) },
                    AlignedLine { latex: "y''=2".into(), split: Some(3) },
                ]
            }]
        );
        assert!(candidate.source.contains("\\begin{align*}"));
    }

    #[test]
    fn single_equation_untouched() {
        let c = faithful(vec![
            StructuralNode::equation("a=b"),
            StructuralNode::paragraph("Text here."),
            StructuralNode::equation("c=d"),
        ]);
        assert_eq!(c.nodes[0], StructuralNode::equation("a=b"));
        assert_eq!(c.nodes[2], StructuralNode::equation("c=d"));
    }

    #[test]
    fn theorem_paragraph_is_boxed_verbatim() {
        let c = faithful(vec![StructuralNode::paragraph("Theorem: For all x, x=x.")]);
        assert_eq!(
            c.nodes,
            vec![StructuralNode::Boxed {
                kind: BoxKind::Theorem,
                title: None,
                text: "Theorem: For all x, x=x.".into(),
            }]
        );
        assert!(c.source.starts_with("\\begin{theorembox}{}{}\nTheorem: For all x, x=x.\n"));
    }

    #[test]
    fn note_box_is_retargeted() {
        let c = normalize(
            &doc(vec![StructuralNode::Boxed {
                kind: BoxKind::Note,
                title: None,
                text: "Дано: треугольник ABC".into(),
            }]),
            Mode::Faithful,
            Language::Ru,
        )
        .unwrap();
        assert_eq!(
            c.nodes[0],
            StructuralNode::Boxed {
                kind: BoxKind::Example,
                title: Some("Дано".into()),
                text: "Дано: треугольник ABC".into(),
            }
        );
    }

    #[test]
    fn headings_demoted_promoted_annotated() {
        let c = faithful(vec![
            StructuralNode::paragraph("MAS 201 Linear Algebra"),
            StructuralNode::section(HeadingLevel::Chapter, "Vectors"),
            StructuralNode::paragraph("Some words here."),
        ]);
        // The document already has a section, so the header line is annotated.
        assert_eq!(
            c.nodes[0],
            StructuralNode::Annotation { text: "MAS 201 Linear Algebra".into() }
        );
        assert_eq!(c.nodes[1], StructuralNode::section(HeadingLevel::Section, "Vectors"));
        assert_eq!(c.log.annotations, vec!["MAS 201 Linear Algebra".to_string()]);

        let c = faithful(vec![
            StructuralNode::paragraph("Lecture 9"),
            StructuralNode::paragraph("Body text."),
        ]);
        assert_eq!(c.nodes[0], StructuralNode::section(HeadingLevel::Section, "Lecture 9"));
        assert_eq!(c.log.promotions, vec!["Lecture 9".to_string()]);
    }

    #[test]
    fn noise_removals_are_logged() {
        let c = faithful(vec![
            StructuralNode::paragraph("The derivative measures change."),
            StructuralNode::paragraph("TODO ask professor"),
            StructuralNode::paragraph("--- Page 2 ---"),
            StructuralNode::paragraph("The derivative measures change."),
            StructuralNode::paragraph("Ok."),
            StructuralNode::paragraph("Ok."),
        ]);
        let categories: Vec<_> = c.log.removals.iter().map(|r| (r.category, r.source_index)).collect();
        assert_eq!(
            categories,
            vec![
                (NoiseCategory::PersonalReminder, 1),
                (NoiseCategory::TranscriptionArtifact, 2),
                (NoiseCategory::Duplicate, 3),
            ]
        );
        // Short repeats are kept.
        assert_eq!(c.nodes.len(), 3);
    }

    #[test]
    fn content_sentence_with_reminder_words_is_kept() {
        let text = "If you don't forget the constant, the answer is x^2 + C.";
        let c = faithful(vec![
            StructuralNode::paragraph("The integral of 2x is computed below."),
            StructuralNode::paragraph(text),
        ]);
        assert!(c.log.removals.is_empty());
        assert_eq!(c.nodes[1], StructuralNode::paragraph(text));
        assert!(c.source.contains("the answer is x^2 + C."));
    }

    #[test]
    fn removal_verification() {
        let parsed = vec![
            StructuralNode::paragraph("TODO ask professor"),
            StructuralNode::paragraph("Real content here."),
        ];
        let good = Removal {
            category: NoiseCategory::PersonalReminder,
            text: "TODO ask professor".into(),
            source_index: 0,
        };
        assert!(removal_holds(Language::En, &good, &parsed));
        let wrong_category = Removal {
            category: NoiseCategory::Duplicate,
            ..good.clone()
        };
        assert!(!removal_holds(Language::En, &wrong_category, &parsed));
        let wrong_node = Removal {
            text: "Real content here.".into(),
            source_index: 1,
            ..good
        };
        assert!(!removal_holds(Language::En, &wrong_node, &parsed));
    }

    #[test]
    fn lists_from_markers() {
        let c = faithful(vec![
            StructuralNode::paragraph("1. first\n2. second"),
            StructuralNode::paragraph("- alpha"),
            StructuralNode::paragraph("- beta"),
            StructuralNode::paragraph("- lonely"),
        ]);
        assert_eq!(
            c.nodes[0],
            StructuralNode::ListBlock {
                style: ListStyle::Ordered,
                items: vec!["first".into(), "second".into()],
            }
        );
        assert_eq!(
            c.nodes[1],
            StructuralNode::ListBlock {
                style: ListStyle::Unordered,
                items: vec!["alpha".into(), "beta".into(), "lonely".into()],
            }
        );
    }

    #[test]
    fn readable_adds_connectives_once() {
        let nodes = vec![
            StructuralNode::paragraph("Theorem: x=x."),
            StructuralNode::paragraph("Proof: trivial."),
            StructuralNode::paragraph("We differentiate."),
            StructuralNode::equation("f=g"),
            StructuralNode::equation("g=h"),
        ];
        let c = normalize(&doc(nodes), Mode::Readable, Language::En).unwrap();
        let connectives = c
            .nodes
            .iter()
            .filter(|n| matches!(n, StructuralNode::Connective { .. }))
            .count();
        assert_eq!(connectives, 2);

        let again = normalize(&doc(c.nodes.clone()), Mode::Readable, Language::En).unwrap();
        assert_eq!(again.nodes, c.nodes);
    }

    #[test]
    fn faithful_never_adds_connectives() {
        let c = faithful(vec![
            StructuralNode::paragraph("Theorem: x=x."),
            StructuralNode::paragraph("Proof: trivial."),
        ]);
        assert!(!c.nodes.iter().any(|n| matches!(n, StructuralNode::Connective { .. })));
    }

    #[test]
    fn relation_split_points() {
        assert_eq!(relation_split("f(x) = x^2"), Some(5));
        assert_eq!(relation_split("\\frac{a=b}{c} \\le d"), Some(14));
        assert_eq!(relation_split("a \\leq b"), Some(2));
        assert_eq!(relation_split("\\{x\\} > 0"), Some(6));
        assert_eq!(relation_split("x + y"), None);
        assert_eq!(relation_split("A = \\begin{pmatrix}1 & 2\\end{pmatrix}"), Some(2));
        assert_eq!(
            relation_split("\\begin{cases} 1 & x > 0 \\end{cases} \\le 1"),
            Some(36)
        );
    }

    #[test]
    fn nested_environments_do_not_block_the_split() {
        let c = faithful(vec![
            StructuralNode::equation("f(x) = \\begin{cases} 1 & x > 0 \\\\ 0 & x \\le 0 \\end{cases}"),
            StructuralNode::equation("A = \\begin{pmatrix}1 & 2\\end{pmatrix}"),
        ]);
        match &c.nodes[0] {
            StructuralNode::Aligned { lines } => {
                assert_eq!(lines[0].split, Some(5));
                assert_eq!(lines[1].split, Some(2));
            }
            other => panic!("expected aligned, got {other:?}"),
        }
    }

    #[test]
    fn lines_with_markers_are_left_alone() {
        let c = faithful(vec![StructuralNode::equation("a &= b"), StructuralNode::equation("c = d")]);
        match &c.nodes[0] {
            StructuralNode::Aligned { lines } => {
                assert_eq!(lines[0].split, None);
                assert_eq!(lines[1].split, Some(2));
            }
            other => panic!("expected aligned, got {other:?}"),
        }
    }

    #[test]
    fn token_gate_catches_rewrites() {
        let input = vec![StructuralNode::paragraph("The cat sat.")];
        let output = vec![StructuralNode::paragraph("The feline sat.")];
        assert_eq!(
            check_token_order("test", &input, &output).unwrap_err(),
            NormalizationError::ContentAltered {
                rule: "test",
                token: "feline".into()
            }
        );
        let reordered = vec![StructuralNode::paragraph("sat. The cat")];
        assert!(check_token_order("test", &input, &reordered).is_err());
    }

    #[test]
    fn normalization_is_idempotent() {
        let nodes = vec![
            StructuralNode::paragraph("Lecture 3"),
            StructuralNode::section(HeadingLevel::Part, "Part one"),
            StructuralNode::paragraph("Definition (Limit): a number L."),
            StructuralNode::paragraph("don't forget the homework"),
            StructuralNode::equation("a=b"),
            StructuralNode::equation("b=c"),
            StructuralNode::paragraph("a) one\nb) two"),
        ];
        for mode in [Mode::Faithful, Mode::Readable] {
            let first = normalize(&doc(nodes.clone()), mode, Language::En).unwrap();
            let second = normalize(&doc(first.nodes.clone()), mode, Language::En).unwrap();
            assert_eq!(first.nodes, second.nodes, "mode {mode}");
            assert_eq!(first.source, second.source);
        }
    }
}
