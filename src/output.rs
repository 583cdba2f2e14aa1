//! Reports and records produced by a pipeline run.

use crate::classify::ModeRecommendation;
use crate::config::{Language, Mode};
use crate::document::{CandidateDocument, ContentCounts};
use crate::error::Notes2TexError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Similarity ───────────────────────────────────────────────────────────

/// Local drift in one baseline block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDelta {
    pub block_index: usize,
    /// Mean best aligned similarity of the block's sentences.
    pub local_score: f64,
    /// First characters of the block, for humans.
    pub excerpt: String,
}

/// Output of the fidelity scorer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarityReport {
    pub sentence_score: f64,
    pub char_score: f64,
    /// Blocks whose local score fell below the per-sentence floor, in
    /// baseline order.
    pub per_block_deltas: Vec<BlockDelta>,
    pub baseline_sentences: usize,
    pub candidate_sentences: usize,
    pub matched_sentences: usize,
    pub baseline_chars: usize,
    pub candidate_chars: usize,
    pub edit_distance: usize,
}

// ── Validation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Fatal,
}

/// Kinds of structural issue. Each check yields at most one issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    DisallowedHeading,
    MalformedBox,
    EquationDropped,
    ContentDropped,
    FigureResourceMissing,
    FigureCaptionMissing,
    UnlistedRemoval,
    DocumentEnvelope,
    FigureCountMismatch,
    SummaryNarrative,
    NoiseReintroduced,
    LowWordCoverage,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::DisallowedHeading => "disallowed_heading",
            IssueKind::MalformedBox => "malformed_box",
            IssueKind::EquationDropped => "equation_dropped",
            IssueKind::ContentDropped => "content_dropped",
            IssueKind::FigureResourceMissing => "figure_resource_missing",
            IssueKind::FigureCaptionMissing => "figure_caption_missing",
            IssueKind::UnlistedRemoval => "unlisted_removal",
            IssueKind::DocumentEnvelope => "document_envelope",
            IssueKind::FigureCountMismatch => "figure_count_mismatch",
            IssueKind::SummaryNarrative => "summary_narrative",
            IssueKind::NoiseReintroduced => "noise_reintroduced",
            IssueKind::LowWordCoverage => "low_word_coverage",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            IssueKind::FigureCaptionMissing
            | IssueKind::FigureCountMismatch
            | IssueKind::SummaryNarrative
            | IssueKind::NoiseReintroduced
            | IssueKind::LowWordCoverage => Severity::Warning,
            _ => Severity::Fatal,
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub detail: String,
}

impl Issue {
    pub fn new(kind: IssueKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            detail: detail.into(),
        }
    }
}

/// Output of the structural validator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<Issue>,
    /// `true` when no issue is fatal.
    pub pass: bool,
}

impl ValidationReport {
    pub fn from_issues(issues: Vec<Issue>) -> Self {
        let pass = issues.iter().all(|i| i.severity != Severity::Fatal);
        Self { issues, pass }
    }

    pub fn fatal(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Fatal)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn has(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }
}

// ── Decision ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    AcceptWithWarnings,
    Reject,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Accept => "accept",
            Verdict::AcceptWithWarnings => "accept_with_warnings",
            Verdict::Reject => "reject",
        })
    }
}

/// Terminal verdict plus everything that supports it.
///
/// Serialised as `decision.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub language: Language,
    pub mode: Mode,
    pub verdict: Verdict,
    /// Names of every issue raised, fatal first.
    pub issues: Vec<String>,
    /// Ranked, human-readable fixes.
    pub suggestions: Vec<String>,
    /// The score that gates the verdict hardest: the lower of the two
    /// fidelity scores.
    pub verbatim_score: f64,
    pub similarity: SimilarityReport,
    pub validation: ValidationReport,
    #[serde(default)]
    pub mode_recommendation: Option<ModeRecommendation>,
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        self.verdict != Verdict::Reject
    }

    /// Turn a `Reject` into [`Notes2TexError::Rejected`].
    pub fn into_result(self) -> Result<Self, Notes2TexError> {
        if self.verdict == Verdict::Reject {
            let mut issues = self.issues.clone();
            if issues.is_empty() {
                issues.push("fidelity_below_threshold".into());
            }
            Err(Notes2TexError::Rejected { issues })
        } else {
            Ok(self)
        }
    }
}

// ── Metadata & stats ─────────────────────────────────────────────────────

/// Serialised as `meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub language: Language,
    pub page_count: usize,
    pub mode: Mode,
    pub figure_count: usize,
    /// RFC 3339, UTC.
    pub timestamp: DateTime<Utc>,
}

/// Timing and counting for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub parse_ms: u64,
    pub normalize_ms: u64,
    /// Scorer and validator run side by side; this is their wall time.
    pub check_ms: u64,
    pub total_ms: u64,
    pub raw_counts: ContentCounts,
    pub candidate_counts: ContentCounts,
    pub removed_nodes: usize,
}

/// Everything produced for one document.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Final document source (`content.tex`).
    pub document: String,
    pub candidate: CandidateDocument,
    pub decision: Decision,
    pub metadata: MetadataRecord,
    pub stats: RunStats,
}
