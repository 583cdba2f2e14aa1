//! Integration tests for notes2tex.
//!
//! Each scenario runs the public entry points end to end: raw text through
//! [`run_text`], or a recorded job directory through [`process_job`] with
//! the [`FileCollaborator`].

use async_trait::async_trait;
use notes2tex::engine::{CONTENT_FILE, DECISION_FILE, JOB_FILE, META_FILE};
use notes2tex::pipeline::decide::FIDELITY_BELOW_THRESHOLD;
use notes2tex::{
    process_job, process_job_sync, run_text, BoxKind, DocumentContext, FileCollaborator,
    IssueKind, JobInput, Mode, ModeSelection, ModelCollaborator,
    Notes2TexError, PipelineConfig, StructuralNode, UpstreamError, Verdict,
};
use std::path::{Path, PathBuf};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn config(mode: Mode) -> PipelineConfig {
    PipelineConfig::builder()
        .mode(ModeSelection::Fixed(mode))
        .build()
        .unwrap()
}

fn blocks(paragraphs: &[&str]) -> String {
    let items: Vec<serde_json::Value> = paragraphs
        .iter()
        .map(|p| serde_json::json!({"type": "paragraph", "text": p}))
        .collect();
    serde_json::json!({ "blocks": items }).to_string()
}

fn write_job(root: &Path, name: &str, transcript: &str, refined: &str) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(dir.join("logs")).unwrap();
    std::fs::write(dir.join("logs").join("transcript.txt"), transcript).unwrap();
    std::fs::write(dir.join("logs").join("refined.txt"), refined).unwrap();
    dir
}

fn artifacts(dir: &Path) -> Vec<bool> {
    [CONTENT_FILE, META_FILE, DECISION_FILE]
        .iter()
        .map(|f| dir.join(f).exists())
        .collect()
}

// ── Scenarios on text in hand ────────────────────────────────────────────────

#[test]
fn reworded_sentence_is_rejected_in_faithful_mode() {
    let raw = blocks(&["The feline sat. It slept."]);
    let out = run_text(
        &raw,
        "The cat sat. It slept.",
        &DocumentContext::default(),
        &config(Mode::Faithful),
    )
    .unwrap();

    assert!(out.decision.similarity.char_score < 0.98);
    assert_eq!(out.decision.verdict, Verdict::Reject);
    assert!(out
        .decision
        .issues
        .iter()
        .any(|i| i == FIDELITY_BELOW_THRESHOLD));
    assert!(!out.decision.suggestions.is_empty());
    assert!(matches!(
        out.decision.clone().into_result(),
        Err(Notes2TexError::Rejected { .. })
    ));
}

#[test]
fn consecutive_equations_become_one_aligned_block() {
    let raw = r#"{"blocks":[{"type":"equation","latex":"y'=2x"},{"type":"equation","latex":"y''=2"}]}"#;
    let out = run_text(
        raw,
        "y'=2x\ny''=2",
        &DocumentContext::default(),
        &config(Mode::Faithful),
    )
    .unwrap();

    match out.candidate.nodes.as_slice() {
        [StructuralNode::Aligned { lines }] => {
            let latex: Vec<&str> = lines.iter().map(|l| l.latex.as_str()).collect();
            assert_eq!(latex, vec!["y'=2x", "y''=2"]);
        }
        other => panic!("expected one aligned block, got {other:?}"),
    }
    assert_eq!(out.document.matches("\\begin{align*}").count(), 1);
    assert!(!out.decision.validation.has(IssueKind::EquationDropped));
}

#[test]
fn theorem_paragraph_is_wrapped_whole() {
    let raw = blocks(&["Theorem: For all x, x=x."]);
    let out = run_text(
        &raw,
        "Theorem: For all x, x=x.",
        &DocumentContext::default(),
        &config(Mode::Faithful),
    )
    .unwrap();

    assert_eq!(
        out.candidate.nodes,
        vec![StructuralNode::Boxed {
            kind: BoxKind::Theorem,
            title: None,
            text: "Theorem: For all x, x=x.".into(),
        }]
    );
    assert!(out.document.starts_with("\\begin{theorembox}{}{}\n"));
    assert!(!out.decision.validation.has(IssueKind::MalformedBox));
    assert!(out.decision.is_accepted());
}

#[test]
fn personal_reminder_removal_is_not_fatal() {
    let raw = blocks(&["The derivative measures change.", "TODO ask professor"]);
    let out = run_text(
        &raw,
        "The derivative measures change.\n\nTODO ask professor",
        &DocumentContext::default(),
        &config(Mode::Faithful),
    )
    .unwrap();

    assert_eq!(out.candidate.log.removals.len(), 1);
    assert!(!out.document.contains("TODO"));
    assert_eq!(out.decision.validation.fatal().count(), 0);
    assert_eq!(out.decision.similarity.sentence_score, 1.0);
    assert!(out.decision.is_accepted());
}

#[test]
fn sentence_mentioning_a_reminder_is_content() {
    let sentence = "If you don't forget the constant, the answer is x^2 + C.";
    let raw = blocks(&["The integral of 2x is computed below.", sentence]);
    let out = run_text(
        &raw,
        &format!("The integral of 2x is computed below.\n\n{sentence}"),
        &DocumentContext::default(),
        &config(Mode::Faithful),
    )
    .unwrap();

    assert!(out.candidate.log.removals.is_empty());
    assert!(out.document.contains(sentence));
}

#[test]
fn marker_list_is_accepted() {
    let notes = "- apples\n- pears\n- plums";
    let out = run_text(
        &blocks(&[notes]),
        notes,
        &DocumentContext::default(),
        &config(Mode::Faithful),
    )
    .unwrap();

    assert!(out.document.contains("\\begin{itemize}"));
    assert!(!out.decision.validation.has(IssueKind::LowWordCoverage));
    assert_eq!(out.decision.verdict, Verdict::Accept);
}

#[test]
fn malformed_output_is_an_error_not_a_verdict() {
    let err = run_text(
        "{\"blocks\": 3}",
        "anything",
        &DocumentContext::default(),
        &PipelineConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Notes2TexError::Parse(_)));
}

#[test]
fn readable_mode_keeps_the_wording() {
    let raw = blocks(&["Theorem: x=x.", "Proof: trivial."]);
    let out = run_text(
        &raw,
        "Theorem: x=x.\n\nProof: trivial.",
        &DocumentContext::default(),
        &config(Mode::Readable),
    )
    .unwrap();

    assert_eq!(out.decision.mode, Mode::Readable);
    assert!(out.document.contains("Theorem: x=x."));
    assert!(out.document.contains("Proof: trivial."));
    assert_eq!(out.decision.validation.fatal().count(), 0);
}

// ── Job directories ──────────────────────────────────────────────────────────

#[tokio::test]
async fn accepted_job_writes_full_bundle() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = write_job(
        tmp.path(),
        "lecture",
        "Groups act on sets.",
        &blocks(&["Groups act on sets."]),
    );
    std::fs::write(dir.join(JOB_FILE), r#"{"language":"en","page_count":1}"#).unwrap();

    let out = process_job(&dir, &FileCollaborator::new(), &config(Mode::Faithful))
        .await
        .unwrap();
    assert_eq!(out.decision.verdict, Verdict::Accept);
    assert_eq!(artifacts(&dir), vec![true, true, true]);

    let content = std::fs::read_to_string(dir.join(CONTENT_FILE)).unwrap();
    assert_eq!(content, out.document);
    let meta: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join(META_FILE)).unwrap()).unwrap();
    assert_eq!(meta["language"], "en");
    assert_eq!(meta["page_count"], 1);
    assert_eq!(meta["mode"], "faithful");
}

#[tokio::test]
async fn rejected_job_still_records_its_decision() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = write_job(
        tmp.path(),
        "reworded",
        "The cat sat. It slept.",
        &blocks(&["The feline sat. It slept."]),
    );

    let out = process_job(&dir, &FileCollaborator::new(), &config(Mode::Faithful))
        .await
        .unwrap();
    assert_eq!(out.decision.verdict, Verdict::Reject);

    let decision: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join(DECISION_FILE)).unwrap()).unwrap();
    assert_eq!(decision["verdict"], "reject");
    assert!(decision["verbatim_score"].as_f64().unwrap() < 0.98);
}

#[tokio::test]
async fn failed_job_writes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = write_job(tmp.path(), "broken", "Some text.", "{\"blocks\": 3}");

    let err = process_job(&dir, &FileCollaborator::new(), &PipelineConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Notes2TexError::Parse(_)));
    assert_eq!(artifacts(&dir), vec![false, false, false]);
}

struct Unreachable;

#[async_trait]
impl ModelCollaborator for Unreachable {
    async fn transcribe(&self, _job: &JobInput) -> Result<String, UpstreamError> {
        Ok("Fine transcript.".into())
    }

    async fn refine(
        &self,
        _job: &JobInput,
        _transcript: &str,
        _mode: Mode,
    ) -> Result<String, UpstreamError> {
        Err(UpstreamError::Failed {
            pass: "refine".into(),
            detail: "connection reset".into(),
        })
    }
}

#[test]
fn upstream_failure_aborts_the_job() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("job");
    std::fs::create_dir_all(&dir).unwrap();

    let err = tokio_test::block_on(process_job(&dir, &Unreachable, &PipelineConfig::default()))
        .unwrap_err();
    assert!(matches!(
        err,
        Notes2TexError::Upstream(UpstreamError::Failed { ref pass, .. }) if pass == "refine"
    ));
    assert_eq!(artifacts(&dir), vec![false, false, false]);
}

#[test]
fn auto_mode_picks_readable_for_lecture_notes() {
    let tmp = tempfile::tempdir().unwrap();
    let transcript = "Lecture 4\nGroups and rings.";
    let dir = write_job(
        tmp.path(),
        "auto",
        transcript,
        &blocks(&["Lecture 4", "Groups and rings."]),
    );

    let out = process_job_sync(&dir, &FileCollaborator::new(), &PipelineConfig::default()).unwrap();
    assert_eq!(out.decision.mode, Mode::Readable);
    let rec = out.decision.mode_recommendation.as_ref().unwrap();
    assert_eq!(rec.mode, Mode::Readable);
    assert!(rec.blocked_by.is_some());
}
