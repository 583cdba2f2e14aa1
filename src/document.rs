//! Document model shared by every pipeline stage.
//!
//! A document travels through the pipeline as an ordered `Vec<StructuralNode>`.
//! Stages never mutate a sequence in place: the normalizer consumes the
//! parsed sequence and builds a new one, and the scorer and validator only
//! read the [`CandidateDocument`] snapshot.

use crate::config::{Language, Mode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Depth of a heading. Only `Section` and below may reach the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadingLevel {
    Part,
    Chapter,
    Section,
    Subsection,
    Subsubsection,
}

impl HeadingLevel {
    /// Map a numeric depth from the blocks object.
    ///
    /// `1` is a section; `0` a chapter; negative depths a part. Anything
    /// deeper than 3 collapses into a subsubsection.
    pub fn from_depth(depth: i64) -> Self {
        match depth {
            i64::MIN..=-1 => HeadingLevel::Part,
            0 => HeadingLevel::Chapter,
            1 => HeadingLevel::Section,
            2 => HeadingLevel::Subsection,
            _ => HeadingLevel::Subsubsection,
        }
    }

    /// Map a LaTeX sectioning command name (without backslash or star).
    pub fn from_command(name: &str) -> Option<Self> {
        match name {
            "part" => Some(HeadingLevel::Part),
            "chapter" => Some(HeadingLevel::Chapter),
            "section" => Some(HeadingLevel::Section),
            "subsection" => Some(HeadingLevel::Subsection),
            "subsubsection" => Some(HeadingLevel::Subsubsection),
            _ => None,
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            HeadingLevel::Part => "part",
            HeadingLevel::Chapter => "chapter",
            HeadingLevel::Section => "section",
            HeadingLevel::Subsection => "subsection",
            HeadingLevel::Subsubsection => "subsubsection",
        }
    }

    /// Whether this level may appear in a normalized candidate.
    pub fn is_allowed(&self) -> bool {
        *self >= HeadingLevel::Section
    }
}

/// Ordered (`enumerate`) or unordered (`itemize`) list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListStyle {
    Ordered,
    #[default]
    Unordered,
}

impl ListStyle {
    pub fn environment(&self) -> &'static str {
        match self {
            ListStyle::Ordered => "enumerate",
            ListStyle::Unordered => "itemize",
        }
    }
}

/// Canonical box environment kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxKind {
    Definition,
    Theorem,
    Lemma,
    Corollary,
    Example,
    Note,
    Question,
    Proof,
}

impl BoxKind {
    pub const ALL: [BoxKind; 8] = [
        BoxKind::Definition,
        BoxKind::Theorem,
        BoxKind::Lemma,
        BoxKind::Corollary,
        BoxKind::Example,
        BoxKind::Note,
        BoxKind::Question,
        BoxKind::Proof,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BoxKind::Definition => "definition",
            BoxKind::Theorem => "theorem",
            BoxKind::Lemma => "lemma",
            BoxKind::Corollary => "corollary",
            BoxKind::Example => "example",
            BoxKind::Note => "note",
            BoxKind::Question => "question",
            BoxKind::Proof => "proof",
        }
    }

    /// LaTeX environment emitted by the renderer.
    pub fn environment(&self) -> &'static str {
        match self {
            BoxKind::Definition => "definitionbox",
            BoxKind::Theorem => "theorembox",
            BoxKind::Lemma => "lemmabox",
            BoxKind::Corollary => "corollarybox",
            BoxKind::Example => "examplebox",
            BoxKind::Note => "notebox",
            BoxKind::Question => "questionbox",
            BoxKind::Proof => "proof",
        }
    }

    /// Recognise a box environment name in model output.
    ///
    /// Accepts the canonical `…box` names, the bare amsthm-style names, and
    /// the `…nox` misspellings the templates once shipped with.
    pub fn from_environment(env: &str) -> Option<Self> {
        let base = env
            .strip_suffix("box")
            .or_else(|| env.strip_suffix("nox"))
            .unwrap_or(env);
        BoxKind::ALL.into_iter().find(|k| k.name() == base)
    }

    /// Every kind except `proof` carries the (title, reserved) slot pair.
    pub fn has_slots(&self) -> bool {
        !matches!(self, BoxKind::Proof)
    }

    /// Kinds a proof conventionally follows.
    pub fn is_theorem_like(&self) -> bool {
        matches!(self, BoxKind::Theorem | BoxKind::Lemma | BoxKind::Corollary)
    }
}

/// One row of an aligned equation block.
///
/// `split` is the byte offset of the alignment point in `latex`; the
/// renderer inserts the `&` marker there, so the equation text itself stays
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignedLine {
    pub latex: String,
    pub split: Option<usize>,
}

/// A typed structural node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum StructuralNode {
    Section {
        level: HeadingLevel,
        text: String,
    },
    Paragraph {
        text: String,
    },
    Equation {
        latex: String,
    },
    ListBlock {
        style: ListStyle,
        items: Vec<String>,
    },
    Figure {
        path: String,
        caption: Option<String>,
    },
    /// A box environment wrapping the full text of one paragraph.
    Boxed {
        kind: BoxKind,
        title: Option<String>,
        text: String,
    },
    /// Two or more equations merged into one `align*` block.
    Aligned {
        lines: Vec<AlignedLine>,
    },
    /// Inert text kept as a LaTeX comment.
    Annotation {
        text: String,
    },
    /// Linking phrase added by readable smoothing.
    Connective {
        text: String,
    },
}

impl StructuralNode {
    pub fn paragraph(text: impl Into<String>) -> Self {
        StructuralNode::Paragraph { text: text.into() }
    }

    pub fn equation(latex: impl Into<String>) -> Self {
        StructuralNode::Equation {
            latex: latex.into(),
        }
    }

    pub fn section(level: HeadingLevel, text: impl Into<String>) -> Self {
        StructuralNode::Section {
            level,
            text: text.into(),
        }
    }

    /// Short name used in logs and issue details.
    pub fn kind_name(&self) -> &'static str {
        match self {
            StructuralNode::Section { .. } => "section",
            StructuralNode::Paragraph { .. } => "paragraph",
            StructuralNode::Equation { .. } => "equation",
            StructuralNode::ListBlock { .. } => "list",
            StructuralNode::Figure { .. } => "figure",
            StructuralNode::Boxed { .. } => "box",
            StructuralNode::Aligned { .. } => "aligned",
            StructuralNode::Annotation { .. } => "annotation",
            StructuralNode::Connective { .. } => "connective",
        }
    }

    /// Text carried by the node, in reading order.
    ///
    /// Box titles are derived from the body and therefore not included.
    /// Connectives are included; callers that check verbatim preservation
    /// skip them explicitly.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            StructuralNode::Section { text, .. }
            | StructuralNode::Paragraph { text }
            | StructuralNode::Boxed { text, .. }
            | StructuralNode::Annotation { text }
            | StructuralNode::Connective { text } => vec![text.as_str()],
            StructuralNode::Equation { latex } => vec![latex.as_str()],
            StructuralNode::Aligned { lines } => lines.iter().map(|l| l.latex.as_str()).collect(),
            StructuralNode::ListBlock { items, .. } => items.iter().map(String::as_str).collect(),
            StructuralNode::Figure { caption, .. } => caption.iter().map(String::as_str).collect(),
        }
    }
}

/// Counts of content-bearing units in a node sequence.
///
/// Merging and wrapping never lower these numbers: a box still holds its
/// paragraph, an aligned block holds one equation per line, and each list
/// item counts as a paragraph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentCounts {
    pub paragraphs: usize,
    pub equations: usize,
    pub figures: usize,
}

impl ContentCounts {
    pub fn of(nodes: &[StructuralNode]) -> Self {
        let mut counts = Self::default();
        for node in nodes {
            match node {
                StructuralNode::Paragraph { .. }
                | StructuralNode::Boxed { .. }
                | StructuralNode::Annotation { .. } => counts.paragraphs += 1,
                StructuralNode::ListBlock { items, .. } => counts.paragraphs += items.len(),
                StructuralNode::Equation { .. } => counts.equations += 1,
                StructuralNode::Aligned { lines } => counts.equations += lines.len(),
                StructuralNode::Figure { .. } => counts.figures += 1,
                StructuralNode::Section { .. } | StructuralNode::Connective { .. } => {}
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.paragraphs + self.equations + self.figures
    }
}

/// Whitelisted reasons for removing a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseCategory {
    /// "TODO ask professor", "не забыть …".
    PersonalReminder,
    /// Exact repeat of an earlier paragraph.
    Duplicate,
    /// Page-break markers and similar transcription leftovers.
    TranscriptionArtifact,
}

impl fmt::Display for NoiseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NoiseCategory::PersonalReminder => "personal_reminder",
            NoiseCategory::Duplicate => "duplicate",
            NoiseCategory::TranscriptionArtifact => "transcription_artifact",
        })
    }
}

/// One node removed by the normalizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Removal {
    pub category: NoiseCategory,
    pub text: String,
    /// Index of the removed node in the parsed sequence.
    pub source_index: usize,
}

/// Everything the normalizer did that is not visible as a plain wrap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteLog {
    pub removals: Vec<Removal>,
    /// Header paragraphs retyped into the top heading.
    pub promotions: Vec<String>,
    /// Header paragraphs demoted to annotations.
    pub annotations: Vec<String>,
    /// Notes the model reported dropping itself.
    pub upstream_dropped: Vec<String>,
}

impl RewriteLog {
    /// Baseline lines that should not count as drift, in removal order.
    pub fn excluded_lines(&self) -> Vec<&str> {
        self.removals
            .iter()
            .map(|r| r.text.as_str())
            .chain(self.annotations.iter().map(String::as_str))
            .chain(self.upstream_dropped.iter().map(String::as_str))
            .flat_map(str::lines)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect()
    }
}

/// First-pass transcript: the ground truth for drift measurement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineTranscript {
    blocks: Vec<String>,
}

impl BaselineTranscript {
    /// Split a transcript into blocks on blank lines.
    pub fn from_text(text: &str) -> Self {
        let normalised = text.replace("\r\n", "\n");
        let mut blocks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        for line in normalised.lines() {
            if line.trim().is_empty() {
                if !current.is_empty() {
                    blocks.push(current.join("\n"));
                    current.clear();
                }
            } else {
                current.push(line.trim_end());
            }
        }
        if !current.is_empty() {
            blocks.push(current.join("\n"));
        }
        Self { blocks }
    }

    pub fn from_blocks(blocks: Vec<String>) -> Self {
        Self { blocks }
    }

    pub fn blocks(&self) -> &[String] {
        &self.blocks
    }

    pub fn text(&self) -> String {
        self.blocks.join("\n\n")
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.iter().all(|b| b.trim().is_empty())
    }
}

/// The normalized document produced by one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDocument {
    pub mode: Mode,
    pub language: Language,
    pub nodes: Vec<StructuralNode>,
    /// Rendered LaTeX body, without any document envelope.
    pub source: String,
    pub log: RewriteLog,
}

impl CandidateDocument {
    pub fn counts(&self) -> ContentCounts {
        ContentCounts::of(&self.nodes)
    }
}

/// Collaborator-supplied facts about the original document.
///
/// Read from `job.json` by the file collaborator; every field is optional
/// there.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentContext {
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(default)]
    pub page_count: usize,
    /// Figures the upstream extractor reported, if it ran.
    #[serde(default)]
    pub figure_count: Option<usize>,
    /// Figure asset paths that exist in the bundle (e.g. `figures/fig_p1_i1.png`).
    #[serde(default)]
    pub figure_resources: BTreeSet<String>,
    /// Notes the transcriber was told to drop.
    #[serde(default)]
    pub dropped_notes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_depths() {
        assert_eq!(HeadingLevel::from_depth(-1), HeadingLevel::Part);
        assert_eq!(HeadingLevel::from_depth(0), HeadingLevel::Chapter);
        assert_eq!(HeadingLevel::from_depth(1), HeadingLevel::Section);
        assert_eq!(HeadingLevel::from_depth(7), HeadingLevel::Subsubsection);
        assert!(!HeadingLevel::Chapter.is_allowed());
        assert!(HeadingLevel::Subsection.is_allowed());
    }

    #[test]
    fn box_environment_names() {
        assert_eq!(BoxKind::from_environment("theorembox"), Some(BoxKind::Theorem));
        assert_eq!(BoxKind::from_environment("lemmanox"), Some(BoxKind::Lemma));
        assert_eq!(BoxKind::from_environment("proof"), Some(BoxKind::Proof));
        assert_eq!(BoxKind::from_environment("definition"), Some(BoxKind::Definition));
        assert_eq!(BoxKind::from_environment("itemize"), None);
        assert!(!BoxKind::Proof.has_slots());
        assert!(BoxKind::Note.has_slots());
    }

    #[test]
    fn counts_look_through_wrappers() {
        let nodes = vec![
            StructuralNode::Boxed {
                kind: BoxKind::Theorem,
                title: None,
                text: "Theorem: x".into(),
            },
            StructuralNode::Aligned {
                lines: vec![
                    AlignedLine { latex: "a=b".into(), split: Some(1) },
                    AlignedLine { latex: "c=d".into(), split: Some(1) },
                ],
            },
            StructuralNode::ListBlock {
                style: ListStyle::Unordered,
                items: vec!["one".into(), "two".into()],
            },
            StructuralNode::Connective { text: "Thus".into() },
        ];
        let counts = ContentCounts::of(&nodes);
        assert_eq!(counts.paragraphs, 3);
        assert_eq!(counts.equations, 2);
        assert_eq!(counts.figures, 0);
    }

    #[test]
    fn baseline_splits_on_blank_lines() {
        let b = BaselineTranscript::from_text("a\nb\n\n\nc\r\n");
        assert_eq!(b.blocks(), &["a\nb".to_string(), "c".to_string()]);
        assert_eq!(b.text(), "a\nb\n\nc");
    }

    #[test]
    fn excluded_lines_flatten_log() {
        let log = RewriteLog {
            removals: vec![Removal {
                category: NoiseCategory::PersonalReminder,
                text: "TODO ask professor".into(),
                source_index: 3,
            }],
            annotations: vec!["Lecture 5".into()],
            ..Default::default()
        };
        assert_eq!(log.excluded_lines(), vec!["TODO ask professor", "Lecture 5"]);
    }

    #[test]
    fn node_serialises_with_node_tag() {
        let json = serde_json::to_string(&StructuralNode::equation("x=1")).unwrap();
        assert_eq!(json, r#"{"node":"equation","latex":"x=1"}"#);
    }

    #[test]
    fn boxed_node_keeps_its_kind_through_json() {
        let node = StructuralNode::Boxed {
            kind: BoxKind::Lemma,
            title: Some("Zorn".into()),
            text: "Lemma (Zorn): every chain has a bound.".into(),
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["node"], "boxed");
        assert!(json.get("kind").is_some());
        let back: StructuralNode = serde_json::from_value(json).unwrap();
        assert_eq!(back, node);
    }
}
