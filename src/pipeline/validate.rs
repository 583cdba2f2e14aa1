//! Structural validator: checks the candidate against the raw parse.
//!
//! Every check looks at one property and yields at most one [`Issue`];
//! all findings of that check are folded into its detail string.

use crate::document::{BoxKind, CandidateDocument, ContentCounts, DocumentContext, StructuralNode};
use crate::output::{Issue, IssueKind, ValidationReport};
use crate::pipeline::lexicon;
use crate::pipeline::normalize;
use crate::pipeline::parse::{brace_group, ParsedDocument};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::debug;

/// Body words below this share of raw prose words raise `low_word_coverage`.
const MIN_WORD_COVERAGE: f64 = 0.70;

struct Inputs<'a> {
    parsed: &'a ParsedDocument,
    candidate: &'a CandidateDocument,
    context: &'a DocumentContext,
}

type Check = fn(&Inputs<'_>) -> Option<Issue>;

const CHECKS: [Check; 12] = [
    disallowed_heading,
    malformed_box,
    equation_dropped,
    content_dropped,
    figure_resource_missing,
    figure_caption_missing,
    unlisted_removal,
    document_envelope,
    figure_count_mismatch,
    summary_narrative,
    noise_reintroduced,
    low_word_coverage,
];

/// Run every structural check.
pub fn validate(
    parsed: &ParsedDocument,
    candidate: &CandidateDocument,
    context: &DocumentContext,
) -> ValidationReport {
    let inputs = Inputs {
        parsed,
        candidate,
        context,
    };
    let issues: Vec<Issue> = CHECKS.iter().filter_map(|check| check(&inputs)).collect();
    for issue in &issues {
        debug!("{:?} {}: {}", issue.severity, issue.kind, issue.detail);
    }
    ValidationReport::from_issues(issues)
}

fn uncommented_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().filter(|l| !l.trim_start().starts_with('%'))
}

fn issue_if(kind: IssueKind, findings: Vec<String>) -> Option<Issue> {
    (!findings.is_empty()).then(|| Issue::new(kind, findings.join("; ")))
}

// ── Headings ─────────────────────────────────────────────────────────────────

static RE_BANNED_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:part|chapter)\*?\s*\{").unwrap());

fn disallowed_heading(x: &Inputs<'_>) -> Option<Issue> {
    let mut found: Vec<String> = x
        .candidate
        .nodes
        .iter()
        .filter_map(|node| match node {
            StructuralNode::Section { level, text } if !level.is_allowed() => {
                Some(format!("\\{}{{{}}}", level.command(), text))
            }
            _ => None,
        })
        .collect();
    if found.is_empty() {
        found = uncommented_lines(&x.candidate.source)
            .filter(|l| RE_BANNED_HEADING.is_match(l))
            .map(|l| l.trim().to_string())
            .collect();
    }
    issue_if(IssueKind::DisallowedHeading, found)
}

// ── Boxes ────────────────────────────────────────────────────────────────────

static RE_ENV_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(begin|end)\{([A-Za-z*]+)\}").unwrap());

fn argument_groups(mut rest: &str) -> usize {
    let mut count = 0;
    while let Some((_, after)) = brace_group(rest) {
        count += 1;
        if count > 2 {
            break;
        }
        rest = after;
    }
    count
}

fn malformed_box(x: &Inputs<'_>) -> Option<Issue> {
    let mut findings = Vec::new();
    let mut balance: BTreeMap<&str, i64> = BTreeMap::new();
    for line in uncommented_lines(&x.candidate.source) {
        for caps in RE_ENV_MARKER.captures_iter(line) {
            let (Some(marker), Some(env)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let Some(kind) = BoxKind::from_environment(env.as_str()) else {
                continue;
            };
            let open = balance.entry(env.as_str()).or_default();
            if marker.as_str() == "end" {
                *open -= 1;
                continue;
            }
            *open += 1;
            if kind.has_slots() {
                let groups = argument_groups(&line[env.end() + 1..]);
                if groups != 2 {
                    findings.push(format!(
                        "\\begin{{{}}} has {} argument groups",
                        env.as_str(),
                        groups
                    ));
                }
            }
        }
    }
    findings.extend(
        balance
            .into_iter()
            .filter(|(_, open)| *open != 0)
            .map(|(env, _)| format!("{env} is not closed")),
    );
    issue_if(IssueKind::MalformedBox, findings)
}

// ── Equations and content ────────────────────────────────────────────────────

fn squash(latex: &str) -> String {
    latex.chars().filter(|c| !c.is_whitespace() && *c != '&').collect()
}

fn candidate_equations(nodes: &[StructuralNode]) -> Vec<String> {
    nodes
        .iter()
        .flat_map(|node| match node {
            StructuralNode::Equation { latex } => vec![squash(latex)],
            StructuralNode::Aligned { lines } => lines.iter().map(|l| squash(&l.latex)).collect(),
            _ => Vec::new(),
        })
        .collect()
}

fn equation_dropped(x: &Inputs<'_>) -> Option<Issue> {
    let raw = ContentCounts::of(&x.parsed.nodes).equations;
    let cand = x.candidate.counts().equations;
    let mut findings = Vec::new();
    if cand < raw {
        findings.push(format!("{cand} equations in candidate, {raw} in raw output"));
    }

    let present = candidate_equations(&x.candidate.nodes);
    let missing: Vec<&str> = x
        .parsed
        .meta
        .captured_equations
        .iter()
        .filter(|eq| {
            let key = squash(eq);
            !key.is_empty() && !present.iter().any(|p| p.contains(&key))
        })
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        findings.push(format!("captured equations missing: {}", missing.join(", ")));
    }
    issue_if(IssueKind::EquationDropped, findings)
}

fn content_dropped(x: &Inputs<'_>) -> Option<Issue> {
    let raw = ContentCounts::of(&x.parsed.nodes);
    let cand = x.candidate.counts();
    let log = &x.candidate.log;

    let expected = (raw.paragraphs + raw.figures).saturating_sub(log.removals.len());
    let kept = cand.paragraphs + cand.figures + log.promotions.len();
    (kept < expected).then(|| {
        Issue::new(
            IssueKind::ContentDropped,
            format!(
                "{kept} content nodes kept, at least {expected} expected ({} removed)",
                log.removals.len()
            ),
        )
    })
}

// ── Figures ──────────────────────────────────────────────────────────────────

fn figures(nodes: &[StructuralNode]) -> impl Iterator<Item = (&str, Option<&str>)> {
    nodes.iter().filter_map(|node| match node {
        StructuralNode::Figure { path, caption } => Some((path.as_str(), caption.as_deref())),
        _ => None,
    })
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn figure_resource_missing(x: &Inputs<'_>) -> Option<Issue> {
    let resources = &x.context.figure_resources;
    let missing: Vec<String> = figures(&x.candidate.nodes)
        .map(|(path, _)| path)
        .filter(|path| {
            let path = path.trim_start_matches("./");
            !resources.contains(path)
                && !resources.iter().any(|r| file_name(r) == file_name(path))
        })
        .map(str::to_string)
        .collect();
    issue_if(IssueKind::FigureResourceMissing, missing)
}

fn figure_caption_missing(x: &Inputs<'_>) -> Option<Issue> {
    let uncaptioned: Vec<String> = figures(&x.candidate.nodes)
        .filter(|(_, caption)| caption.map_or(true, |c| c.trim().is_empty()))
        .map(|(path, _)| path.to_string())
        .collect();
    issue_if(IssueKind::FigureCaptionMissing, uncaptioned)
}

fn figure_count_mismatch(x: &Inputs<'_>) -> Option<Issue> {
    let reported = x
        .context
        .figure_count
        .unwrap_or(0)
        .max(x.parsed.meta.figures.len());
    let present = figures(&x.candidate.nodes).count();
    (present < reported).then(|| {
        Issue::new(
            IssueKind::FigureCountMismatch,
            format!("{present} figures in candidate, {reported} reported"),
        )
    })
}

// ── Log and envelope ─────────────────────────────────────────────────────────

fn unlisted_removal(x: &Inputs<'_>) -> Option<Issue> {
    let unlisted: Vec<String> = x
        .candidate
        .log
        .removals
        .iter()
        .filter(|r| !normalize::removal_holds(x.candidate.language, r, &x.parsed.nodes))
        .map(|r| format!("{} at node {}: {:?}", r.category, r.source_index, r.text))
        .collect();
    issue_if(IssueKind::UnlistedRemoval, unlisted)
}

const ENVELOPE_MARKERS: [&str; 4] = [
    "\\documentclass",
    "\\usepackage",
    "\\begin{document}",
    "\\end{document}",
];

fn document_envelope(x: &Inputs<'_>) -> Option<Issue> {
    let found: Vec<String> = ENVELOPE_MARKERS
        .iter()
        .filter(|m| uncommented_lines(&x.candidate.source).any(|l| l.contains(*m)))
        .map(|m| m.to_string())
        .collect();
    issue_if(IssueKind::DocumentEnvelope, found)
}

// ── Prose ────────────────────────────────────────────────────────────────────

/// Text of the nodes that carry prose; math, figures and connectives excluded.
fn prose(nodes: &[StructuralNode]) -> Vec<&str> {
    nodes
        .iter()
        .filter(|n| {
            !matches!(
                n,
                StructuralNode::Connective { .. }
                    | StructuralNode::Figure { .. }
                    | StructuralNode::Equation { .. }
                    | StructuralNode::Aligned { .. }
            )
        })
        .flat_map(StructuralNode::texts)
        .collect()
}

/// Words per line, list markers excluded.
fn word_count(texts: &[&str]) -> usize {
    texts
        .iter()
        .flat_map(|t| t.lines())
        .map(|line| normalize::list_item(line).unwrap_or(line).split_whitespace().count())
        .sum()
}

fn summary_narrative(x: &Inputs<'_>) -> Option<Issue> {
    let raw_text = prose(&x.parsed.nodes).join("\n").to_lowercase();
    let body = prose(&x.candidate.nodes).join("\n");
    let mut phrases: Vec<String> = lexicon::summary_phrases(&body)
        .into_iter()
        .filter(|p| !raw_text.contains(&p.to_lowercase()))
        .collect();
    phrases.dedup();
    issue_if(IssueKind::SummaryNarrative, phrases)
}

fn noise_reintroduced(x: &Inputs<'_>) -> Option<Issue> {
    let body = prose(&x.candidate.nodes).join("\n").to_lowercase();
    let notes: Vec<String> = x
        .parsed
        .meta
        .dropped_notes
        .iter()
        .chain(&x.context.dropped_notes)
        .map(|n| n.trim())
        .filter(|n| !n.is_empty() && body.contains(&n.to_lowercase()))
        .map(str::to_string)
        .collect();
    issue_if(IssueKind::NoiseReintroduced, notes)
}

fn low_word_coverage(x: &Inputs<'_>) -> Option<Issue> {
    let removed: usize = x
        .candidate
        .log
        .removals
        .iter()
        .map(|r| r.text.split_whitespace().count())
        .sum();
    let raw = word_count(&prose(&x.parsed.nodes)).saturating_sub(removed);
    if raw == 0 {
        return None;
    }
    let body = word_count(&prose(&x.candidate.nodes));
    let coverage = body as f64 / raw as f64;
    (coverage < MIN_WORD_COVERAGE).then(|| {
        Issue::new(
            IssueKind::LowWordCoverage,
            format!("{body} of {raw} words kept ({:.0}%)", coverage * 100.0),
        )
    })
}
