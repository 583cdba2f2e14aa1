//! Fidelity scorer: measures drift of the candidate from the baseline transcript.
//!
//! Both texts are first reduced to a markup-free plain form in which every
//! math segment is a single whitespace-free `$…$` unit. Two metrics are
//! computed on that form:
//!
//! * **sentence score**: share of baseline sentences that find a close
//!   partner in a monotone alignment of the two sentence sequences;
//! * **character score**: `1 − levenshtein / baseline_len`.
//!
//! The alignment is a banded dynamic program over match, 2→1 merge, 1→2
//! split and skip operations, so a sentence split or joined by the
//! refinement pass still counts as matched.

use crate::document::{BaselineTranscript, CandidateDocument, RewriteLog};
use crate::output::{BlockDelta, SimilarityReport};
use crate::pipeline::lexicon;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

/// Penalty added to merge and split operations.
const REGROUP_PENALTY: f64 = 0.15;
/// Cost of a baseline sentence with no partner.
const SKIP_BASELINE_COST: f64 = 1.0;
/// Cost of a candidate sentence with no partner.
const SKIP_CANDIDATE_COST: f64 = 0.5;
/// Extra diagonal slack on top of the length difference.
const BAND_SLACK: usize = 8;
const EXCERPT_CHARS: usize = 60;

/// Score a candidate against its baseline.
///
/// `sentence_floor` is the per-sentence similarity needed to count a
/// baseline sentence as matched; it also decides which blocks are
/// reported in `per_block_deltas`.
pub fn score(
    baseline: &BaselineTranscript,
    candidate: &CandidateDocument,
    sentence_floor: f64,
) -> SimilarityReport {
    let base = baseline_sentences(baseline, &candidate.log);
    let cand: Vec<String> = sentences(&strip_markup(&candidate.source));

    let base_texts: Vec<&str> = base.iter().map(|s| s.text.as_str()).collect();
    let cand_texts: Vec<&str> = cand.iter().map(String::as_str).collect();

    let sims = align(&base_texts, &cand_texts);
    let matched = sims.iter().filter(|&&s| s >= sentence_floor).count();
    let sentence_score = if base.is_empty() {
        if cand.is_empty() {
            1.0
        } else {
            0.0
        }
    } else {
        matched as f64 / base.len() as f64
    };

    let base_plain = base_texts.join(" ");
    let cand_plain = cand_texts.join(" ");
    let baseline_chars = base_plain.chars().count();
    let candidate_chars = cand_plain.chars().count();
    let edit_distance = strsim::levenshtein(&base_plain, &cand_plain);
    let char_score = (1.0 - edit_distance as f64 / baseline_chars.max(1) as f64).clamp(0.0, 1.0);

    let per_block_deltas = block_deltas(baseline, &base, &sims, sentence_floor);

    SimilarityReport {
        sentence_score,
        char_score,
        per_block_deltas,
        baseline_sentences: base.len(),
        candidate_sentences: cand.len(),
        matched_sentences: matched,
        baseline_chars,
        candidate_chars,
        edit_distance,
    }
}

// ── Baseline preparation ─────────────────────────────────────────────────────

struct BaselineSentence {
    text: String,
    block: usize,
}

fn line_key(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Baseline sentences, minus lines the normalizer removed on purpose.
///
/// Logged removals and annotations are consumed as a multiset while the
/// baseline is walked from the end, so an early genuine occurrence of a
/// repeated line survives. Transcription artifacts are always dropped.
fn baseline_sentences(baseline: &BaselineTranscript, log: &RewriteLog) -> Vec<BaselineSentence> {
    let mut pending: HashMap<String, usize> = HashMap::new();
    for line in log.excluded_lines() {
        *pending.entry(line_key(line)).or_default() += 1;
    }

    let mut kept: Vec<(usize, Vec<&str>)> = baseline
        .blocks()
        .iter()
        .enumerate()
        .map(|(index, block)| (index, block.lines().collect()))
        .collect();

    for (_, lines) in kept.iter_mut().rev() {
        let mut survivors: Vec<&str> = Vec::with_capacity(lines.len());
        for &line in lines.iter().rev() {
            if lexicon::is_transcription_artifact(line) {
                continue;
            }
            if let Some(count) = pending.get_mut(&line_key(line)).filter(|c| **c > 0) {
                *count -= 1;
                continue;
            }
            survivors.push(line);
        }
        survivors.reverse();
        *lines = survivors;
    }

    kept.into_iter()
        .flat_map(|(block, lines)| {
            sentences(&strip_markup(&lines.join("\n")))
                .into_iter()
                .map(move |text| BaselineSentence { text, block })
        })
        .collect()
}

fn block_deltas(
    baseline: &BaselineTranscript,
    base: &[BaselineSentence],
    sims: &[f64],
    floor: f64,
) -> Vec<BlockDelta> {
    let mut totals: Vec<(f64, usize)> = vec![(0.0, 0); baseline.blocks().len()];
    for (sentence, sim) in base.iter().zip(sims) {
        let entry = &mut totals[sentence.block];
        entry.0 += sim;
        entry.1 += 1;
    }
    totals
        .iter()
        .enumerate()
        .filter(|(_, (_, n))| *n > 0)
        .map(|(block_index, (sum, n))| (block_index, sum / *n as f64))
        .filter(|(_, local)| *local < floor)
        .map(|(block_index, local_score)| BlockDelta {
            block_index,
            local_score,
            excerpt: baseline.blocks()[block_index]
                .chars()
                .take(EXCERPT_CHARS)
                .collect(),
        })
        .collect()
}

// ── Markup stripping ─────────────────────────────────────────────────────────

/// Math units are swapped for these sentinels while the rest is stripped.
const UNIT_OPEN: char = '\u{E000}';
const UNIT_CLOSE: char = '\u{E001}';

static RE_MATH_ENV: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)\\begin\{(?:equation|align|gather|multline|eqnarray|flalign|alignat|displaymath|math)\*?\}(.*?)\\end\{(?:equation|align|gather|multline|eqnarray|flalign|alignat|displaymath|math)\*?\}",
    )
    .unwrap()
});
static RE_DISPLAY_MATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\\\[(.*?)\\\]|\$\$(.*?)\$\$|\\\((.*?)\\\)").unwrap());
static RE_INLINE_MATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$([^$\n]+?)\$").unwrap());
static RE_TEXT_IN_MATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:text|textrm|mathrm|mbox)\{([^{}]*)\}").unwrap());
static RE_MATH_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:nonumber|notag)\b|\\label\{[^}]*\}|&|\s+").unwrap());

static RE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)(^|[^\\])%.*$").unwrap());
static RE_ENV_DELIMITER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(?:begin\{[^}]*\}(?:\s*\[[^\]]*\]|\s*\{[^{}]*\})*|end\{[^}]*\})").unwrap()
});
static RE_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\item\b(?:\s*\[([^\]]*)\])?").unwrap());
static RE_DROPPED_COMMAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\\(?:label|ref|eqref|cite|includegraphics|vspace|hspace|vskip|hskip)\*?(?:\[[^\]]*\])?\{[^}]*\}|\\(?:centering|noindent|newline|medskip|bigskip|smallskip|par|newpage|clearpage|pagebreak|maketitle)\b",
    )
    .unwrap()
});
static RE_ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\([%&_$#{}])").unwrap());
static RE_COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\[A-Za-z]+\*?(?:\[[^\]]*\])?").unwrap());
static RE_LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:[-–•*]|\d{1,3}[.)]|[a-zа-я]\))[ \t]+").unwrap());

/// Reduce LaTeX-ish text to plain lines with opaque math units.
pub fn strip_markup(text: &str) -> String {
    let mut units: Vec<String> = Vec::new();

    let s = RE_COMMENT.replace_all(text, "${1}");

    // Environments first, one unit per row.
    let s = RE_MATH_ENV.replace_all(&s, |caps: &Captures<'_>| {
        caps[1]
            .split("\\\\")
            .map(|row| stash(row, &mut units))
            .collect::<Vec<_>>()
            .join("\n")
    });
    let s = RE_DISPLAY_MATH.replace_all(&s, |caps: &Captures<'_>| {
        let inner = caps
            .get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .map_or("", |m| m.as_str());
        format!("\n{}\n", stash(inner, &mut units))
    });
    let s = RE_INLINE_MATH.replace_all(&s, |caps: &Captures<'_>| stash(&caps[1], &mut units));

    let s = RE_ENV_DELIMITER.replace_all(&s, "\n");
    let s = RE_ITEM.replace_all(&s, |caps: &Captures<'_>| {
        format!("\n{} ", caps.get(1).map_or("", |m| m.as_str()))
    });
    let s = RE_DROPPED_COMMAND.replace_all(&s, " ");
    let s = s.replace("\\\\", "\n");
    let s = RE_ESCAPE.replace_all(&s, "${1}");
    let s = RE_COMMAND.replace_all(&s, "");
    let s = s.replace(['{', '}', '&'], "");
    let s = RE_LIST_MARKER.replace_all(&s, "");

    let plain = s
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    restore_units(&plain, &units)
}

/// Park a math segment in `units`, leaving a sentinel behind.
fn stash(content: &str, units: &mut Vec<String>) -> String {
    let unit = math_unit(content);
    if unit.is_empty() {
        return " ".to_string();
    }
    units.push(unit);
    format!(" {UNIT_OPEN}{}{UNIT_CLOSE} ", units.len() - 1)
}

/// Whitespace-free canonical form of one math segment.
fn math_unit(content: &str) -> String {
    let s = RE_TEXT_IN_MATH.replace_all(content, "${1}");
    RE_MATH_NOISE.replace_all(&s, "").into_owned()
}

fn restore_units(text: &str, units: &[String]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find(UNIT_OPEN) {
        out.push_str(&rest[..open]);
        let after = &rest[open + UNIT_OPEN.len_utf8()..];
        let Some(close) = after.find(UNIT_CLOSE) else {
            out.push_str(&rest[open..]);
            return out;
        };
        match after[..close].parse::<usize>().ok().and_then(|i| units.get(i)) {
            Some(unit) => {
                out.push('$');
                out.push_str(unit);
                out.push('$');
            }
            None => out.push_str(&after[..close]),
        }
        rest = &after[close + UNIT_CLOSE.len_utf8()..];
    }
    out.push_str(rest);
    out
}

// ── Sentences ────────────────────────────────────────────────────────────────

/// Split plain text on `.`, `!`, `?` followed by whitespace, and on line ends.
///
/// Math units contain no whitespace, so a period inside `$…$` never
/// splits a sentence.
pub fn sentences(plain: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in plain.lines() {
        let mut in_math = false;
        let mut current = String::new();
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            current.push(c);
            if c == '$' {
                in_math = !in_math;
                continue;
            }
            let at_boundary = chars.peek().map_or(true, |n| n.is_whitespace());
            if !in_math && matches!(c, '.' | '!' | '?') && at_boundary {
                push_sentence(&mut out, &current);
                current.clear();
            }
        }
        push_sentence(&mut out, &current);
    }
    out
}

fn push_sentence(out: &mut Vec<String>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        out.push(text.to_string());
    }
}

// ── Alignment ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Step {
    Start,
    Match(f64),
    Merge(f64),
    Split(f64),
    SkipBaseline,
    SkipCandidate,
}

fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

/// DP cells within `band` of the scaled diagonal: one row of
/// `2 * band + 1` cells per baseline index.
struct BandTable {
    n: usize,
    m: usize,
    band: usize,
    cells: Vec<(f64, Step)>,
}

impl BandTable {
    fn new(n: usize, m: usize, band: usize) -> Self {
        Self {
            n,
            m,
            band,
            cells: vec![(f64::INFINITY, Step::Start); (n + 1) * (2 * band + 1)],
        }
    }

    fn center(&self, i: usize) -> usize {
        i * self.m / self.n
    }

    /// Columns of row `i` inside the band.
    fn columns(&self, i: usize) -> std::ops::RangeInclusive<usize> {
        let center = self.center(i);
        center.saturating_sub(self.band)..=(center + self.band).min(self.m)
    }

    fn index(&self, i: usize, j: usize) -> Option<usize> {
        let center = self.center(i);
        (i <= self.n && j <= self.m && center.abs_diff(j) <= self.band)
            .then(|| i * (2 * self.band + 1) + j + self.band - center)
    }

    fn cost(&self, i: usize, j: usize) -> f64 {
        self.index(i, j).map_or(f64::INFINITY, |k| self.cells[k].0)
    }

    fn step(&self, i: usize, j: usize) -> Step {
        self.index(i, j).map_or(Step::Start, |k| self.cells[k].1)
    }

    fn set(&mut self, i: usize, j: usize, cell: (f64, Step)) {
        if let Some(k) = self.index(i, j) {
            self.cells[k] = cell;
        }
    }
}

/// Best aligned similarity for every baseline sentence (0 when skipped).
fn align(base: &[&str], cand: &[&str]) -> Vec<f64> {
    let (n, m) = (base.len(), cand.len());
    if n == 0 {
        return Vec::new();
    }
    let band = n.abs_diff(m) + BAND_SLACK;
    let mut table = BandTable::new(n, m, band);
    table.set(0, 0, (0.0, Step::Start));

    for i in 0..=n {
        for j in table.columns(i) {
            if i == 0 && j == 0 {
                continue;
            }
            let mut best = (f64::INFINITY, Step::Start);
            let mut relax = |c: f64, s: Step| {
                if c < best.0 {
                    best = (c, s);
                }
            };
            if i >= 1 && j >= 1 && table.cost(i - 1, j - 1).is_finite() {
                let s = similarity(base[i - 1], cand[j - 1]);
                relax(table.cost(i - 1, j - 1) + 1.0 - s, Step::Match(s));
            }
            if i >= 2 && j >= 1 && table.cost(i - 2, j - 1).is_finite() {
                let joined = format!("{} {}", base[i - 2], base[i - 1]);
                let s = similarity(&joined, cand[j - 1]);
                relax(table.cost(i - 2, j - 1) + 1.0 - s + REGROUP_PENALTY, Step::Merge(s));
            }
            if i >= 1 && j >= 2 && table.cost(i - 1, j - 2).is_finite() {
                let joined = format!("{} {}", cand[j - 2], cand[j - 1]);
                let s = similarity(base[i - 1], &joined);
                relax(table.cost(i - 1, j - 2) + 1.0 - s + REGROUP_PENALTY, Step::Split(s));
            }
            if i >= 1 {
                relax(table.cost(i - 1, j) + SKIP_BASELINE_COST, Step::SkipBaseline);
            }
            if j >= 1 {
                relax(table.cost(i, j - 1) + SKIP_CANDIDATE_COST, Step::SkipCandidate);
            }
            table.set(i, j, best);
        }
    }

    let mut sims = vec![0.0; n];
    let (mut i, mut j) = (n, m);
    while i > 0 || j > 0 {
        match table.step(i, j) {
            Step::Match(s) => {
                sims[i - 1] = s;
                i -= 1;
                j -= 1;
            }
            Step::Merge(s) => {
                sims[i - 1] = s;
                sims[i - 2] = s;
                i -= 2;
                j -= 1;
            }
            Step::Split(s) => {
                sims[i - 1] = s;
                i -= 1;
                j -= 2;
            }
            Step::SkipBaseline => i -= 1,
            Step::SkipCandidate => j -= 1,
            Step::Start => break,
        }
    }
    sims
}
