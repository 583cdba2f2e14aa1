//! Pipeline entry points: one document from raw output to decision.
//!
//! [`run`] is the pure core. It takes the raw refined output, the baseline
//! transcript and the document context, and returns a [`PipelineOutput`]
//! without touching the file system. [`process`] wraps it with the two
//! collaborator passes, and [`process_job`] adds job-directory I/O: it
//! reads `job.json`, runs the pipeline and writes the artifact bundle.
//!
//! Business outcomes never surface as `Err`: a rejected candidate is an
//! `Ok(PipelineOutput)` whose decision says `Reject`. Only malformed input,
//! normalizer defects, collaborator failures and I/O problems are errors,
//! and none of them leaves a partial bundle behind.

use crate::classify::{self, ModeRecommendation};
use crate::collaborator::{JobInput, ModelCollaborator, REFINE_PASS, TRANSCRIBE_PASS};
use crate::config::{Language, Mode, ModeSelection, PipelineConfig};
use crate::document::{BaselineTranscript, ContentCounts, DocumentContext};
use crate::error::{Notes2TexError, UpstreamError};
use crate::output::{MetadataRecord, PipelineOutput, RunStats};
use crate::pipeline::decide::{self, Policy};
use crate::pipeline::parse::{self, ParsedDocument};
use crate::pipeline::{normalize, score, validate};
use chrono::Utc;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Stable artifact names inside a job directory.
pub const CONTENT_FILE: &str = "content.tex";
pub const META_FILE: &str = "meta.json";
pub const DECISION_FILE: &str = "decision.json";
pub const JOB_FILE: &str = "job.json";
pub const FIGURES_DIR: &str = "figures";

/// Language and mode of one run, fixed before normalization starts.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub language: Language,
    pub mode: Mode,
    /// Present when the mode was chosen automatically.
    pub recommendation: Option<ModeRecommendation>,
}

/// Resolve the document language.
///
/// Config override, then collaborator metadata, then the model's own
/// metadata, then script detection on the baseline.
pub fn resolve_language(
    config: &PipelineConfig,
    context: &DocumentContext,
    reported: Option<Language>,
    baseline: &BaselineTranscript,
) -> Language {
    config
        .language
        .or(context.language)
        .or(reported)
        .unwrap_or_else(|| Language::detect(&baseline.text()))
}

/// Pick the mode for a run in `language`.
pub fn plan(config: &PipelineConfig, language: Language, baseline: &BaselineTranscript) -> RunPlan {
    match config.mode {
        ModeSelection::Fixed(mode) => RunPlan {
            language,
            mode,
            recommendation: None,
        },
        ModeSelection::Auto => {
            let recommendation = classify::recommend_mode(&baseline.text(), language);
            RunPlan {
                language,
                mode: recommendation.mode,
                recommendation: Some(recommendation),
            }
        }
    }
}

/// Run the pipeline on text already in hand.
///
/// # Errors
/// [`Notes2TexError::Parse`] for malformed raw output and
/// [`Notes2TexError::Normalization`] for a rule defect.
pub fn run(
    raw: &str,
    baseline: &BaselineTranscript,
    context: &DocumentContext,
    config: &PipelineConfig,
) -> Result<PipelineOutput, Notes2TexError> {
    let started = Instant::now();
    let parsed = parse::parse(raw)?;
    let parse_ms = started.elapsed().as_millis() as u64;

    let language = resolve_language(config, context, parsed.meta.language, baseline);
    let plan = plan(config, language, baseline);
    execute(parsed, parse_ms, started, baseline, context, config, plan)
}

/// Run with a plan fixed by the caller (the mode the refine pass used).
fn run_planned(
    raw: &str,
    baseline: &BaselineTranscript,
    context: &DocumentContext,
    config: &PipelineConfig,
    mut plan: RunPlan,
) -> Result<PipelineOutput, Notes2TexError> {
    let started = Instant::now();
    let parsed = parse::parse(raw)?;
    let parse_ms = started.elapsed().as_millis() as u64;

    plan.language = resolve_language(config, context, parsed.meta.language, baseline);
    execute(parsed, parse_ms, started, baseline, context, config, plan)
}

fn execute(
    parsed: ParsedDocument,
    parse_ms: u64,
    started: Instant,
    baseline: &BaselineTranscript,
    context: &DocumentContext,
    config: &PipelineConfig,
    plan: RunPlan,
) -> Result<PipelineOutput, Notes2TexError> {
    info!(
        "Parsed {:?} output: {} nodes ({} / {})",
        parsed.shape,
        parsed.nodes.len(),
        plan.mode,
        plan.language
    );

    // ── Normalize ────────────────────────────────────────────────────────
    let normalize_start = Instant::now();
    let candidate = normalize::normalize(&parsed, plan.mode, plan.language)?;
    let normalize_ms = normalize_start.elapsed().as_millis() as u64;
    debug!(
        "Normalized to {} nodes, {} removals, {} promotions, {} annotations",
        candidate.nodes.len(),
        candidate.log.removals.len(),
        candidate.log.promotions.len(),
        candidate.log.annotations.len()
    );

    // ── Score and validate in parallel ───────────────────────────────────
    let check_start = Instant::now();
    let (similarity, validation) = std::thread::scope(|s| {
        let scorer = s.spawn(|| score::score(baseline, &candidate, config.sentence_floor));
        let validation = validate::validate(&parsed, &candidate, context);
        (scorer.join(), validation)
    });
    let similarity =
        similarity.map_err(|_| Notes2TexError::Internal("fidelity scorer panicked".into()))?;
    let check_ms = check_start.elapsed().as_millis() as u64;

    // ── Decide ───────────────────────────────────────────────────────────
    let policy = Policy::from_config(config, plan.mode);
    let decision = decide::decide(
        plan.language,
        plan.mode,
        similarity,
        validation,
        &policy,
        plan.recommendation,
    );

    let raw_counts = ContentCounts::of(&parsed.nodes);
    let candidate_counts = candidate.counts();
    let metadata = MetadataRecord {
        language: plan.language,
        page_count: context.page_count,
        mode: plan.mode,
        figure_count: candidate_counts.figures,
        timestamp: Utc::now(),
    };
    let stats = RunStats {
        parse_ms,
        normalize_ms,
        check_ms,
        total_ms: started.elapsed().as_millis() as u64,
        raw_counts,
        candidate_counts,
        removed_nodes: candidate.log.removals.len(),
    };

    Ok(PipelineOutput {
        document: candidate.source.clone(),
        candidate,
        decision,
        metadata,
        stats,
    })
}

/// [`run`] with the baseline given as plain transcript text.
pub fn run_text(
    raw: &str,
    baseline: &str,
    context: &DocumentContext,
    config: &PipelineConfig,
) -> Result<PipelineOutput, Notes2TexError> {
    run(raw, &BaselineTranscript::from_text(baseline), context, config)
}

// ── Collaborator passes ──────────────────────────────────────────────────

async fn within<F>(pass: &str, secs: u64, call: F) -> Result<String, UpstreamError>
where
    F: Future<Output = Result<String, UpstreamError>>,
{
    tokio::time::timeout(Duration::from_secs(secs), call)
        .await
        .map_err(|_| UpstreamError::Timeout {
            pass: pass.to_string(),
            secs,
        })?
}

/// Run both collaborator passes and the pipeline for one job.
///
/// # Errors
/// [`Notes2TexError::Upstream`] when a pass fails or times out, plus
/// everything [`run`] can return.
pub async fn process(
    job: &JobInput,
    collaborator: &dyn ModelCollaborator,
    config: &PipelineConfig,
) -> Result<PipelineOutput, Notes2TexError> {
    let secs = config.upstream_timeout_secs;
    info!("Processing job {}", job.id);

    let transcript = within(TRANSCRIBE_PASS, secs, collaborator.transcribe(job)).await?;
    let baseline = BaselineTranscript::from_text(&transcript);

    let language = resolve_language(config, &job.context, None, &baseline);
    let plan = plan(config, language, &baseline);
    debug!("Job {}: refining in {} mode", job.id, plan.mode);

    let raw = within(REFINE_PASS, secs, collaborator.refine(job, &transcript, plan.mode)).await?;
    run_planned(&raw, &baseline, &job.context, config, plan)
}

// ── Job directories ──────────────────────────────────────────────────────

fn invalid_job(path: &Path, detail: impl Into<String>) -> Notes2TexError {
    Notes2TexError::InvalidJob {
        path: path.to_path_buf(),
        detail: detail.into(),
    }
}

/// Read `job.json` and list `figures/` for a job directory.
///
/// A missing `job.json` means an empty context.
pub async fn load_job(dir: impl AsRef<Path>) -> Result<JobInput, Notes2TexError> {
    let dir = dir.as_ref();
    if !tokio::fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(Notes2TexError::JobNotFound {
            path: dir.to_path_buf(),
        });
    }

    let job_file = dir.join(JOB_FILE);
    let mut context: DocumentContext = match tokio::fs::read_to_string(&job_file).await {
        Ok(text) => serde_json::from_str(&text)
            .map_err(|e| invalid_job(dir, format!("{JOB_FILE}: {e}")))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => DocumentContext::default(),
        Err(e) => return Err(invalid_job(dir, format!("{JOB_FILE}: {e}"))),
    };

    let figures = dir.join(FIGURES_DIR);
    if let Ok(mut entries) = tokio::fs::read_dir(&figures).await {
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| invalid_job(dir, format!("{FIGURES_DIR}/: {e}")))?
        {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                let name = entry.file_name().to_string_lossy().to_string();
                context.figure_resources.insert(format!("{FIGURES_DIR}/{name}"));
            }
        }
    }

    let id = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| dir.display().to_string());
    debug!(
        "Loaded job {}: {} figure resources, {} pages",
        id,
        context.figure_resources.len(),
        context.page_count
    );

    Ok(JobInput {
        id,
        dir: dir.to_path_buf(),
        context,
    })
}

fn to_json<T: serde::Serialize>(name: &str, value: &T) -> Result<String, Notes2TexError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| Notes2TexError::Internal(format!("serialising {name}: {e}")))
}

/// Write `content.tex`, `meta.json` and `decision.json` into `dir`.
///
/// All three are staged as temp files in `dir` first and only renamed
/// into place once every one of them was written. `decision.json` goes
/// last; if any rename fails the artifacts already renamed are removed.
pub fn write_bundle(dir: &Path, output: &PipelineOutput) -> Result<(), Notes2TexError> {
    let artifacts = [
        (CONTENT_FILE, output.document.clone()),
        (META_FILE, to_json(META_FILE, &output.metadata)?),
        (DECISION_FILE, to_json(DECISION_FILE, &output.decision)?),
    ];

    let write_failed = |path: PathBuf| {
        move |source: std::io::Error| Notes2TexError::ArtifactWriteFailed { path, source }
    };

    std::fs::create_dir_all(dir).map_err(write_failed(dir.to_path_buf()))?;
    let mut staged = Vec::with_capacity(artifacts.len());
    for (name, contents) in &artifacts {
        let target = dir.join(name);
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_failed(target.clone()))?;
        tmp.write_all(contents.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(write_failed(target.clone()))?;
        staged.push((tmp, target));
    }
    // The decision file is renamed last; a bundle without it is never left behind.
    let mut persisted: Vec<PathBuf> = Vec::with_capacity(staged.len());
    for (tmp, target) in staged {
        if let Err(e) = tmp.persist(&target) {
            for path in &persisted {
                if let Err(cleanup) = std::fs::remove_file(path) {
                    warn!("Could not remove partial artifact {}: {}", path.display(), cleanup);
                }
            }
            return Err(Notes2TexError::ArtifactWriteFailed {
                path: target,
                source: e.error,
            });
        }
        persisted.push(target);
    }
    Ok(())
}

/// Load a job directory, process it and write its bundle.
///
/// Returns the output whatever the verdict; the bundle is written for
/// rejected candidates too, so the decision record explains the reject.
pub async fn process_job(
    dir: impl AsRef<Path>,
    collaborator: &dyn ModelCollaborator,
    config: &PipelineConfig,
) -> Result<PipelineOutput, Notes2TexError> {
    let job = load_job(dir).await?;
    let output = process(&job, collaborator, config).await?;

    let dir = job.dir.clone();
    let bundle = output.clone();
    tokio::task::spawn_blocking(move || write_bundle(&dir, &bundle))
        .await
        .map_err(|e| Notes2TexError::Internal(format!("bundle writer: {e}")))??;

    if output.decision.is_accepted() {
        info!("Job {}: {}", job.id, output.decision.verdict);
    } else {
        warn!("Job {}: rejected ({})", job.id, output.decision.issues.join(", "));
    }
    Ok(output)
}

/// Synchronous wrapper around [`process_job`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_job_sync(
    dir: impl AsRef<Path>,
    collaborator: &dyn ModelCollaborator,
    config: &PipelineConfig,
) -> Result<PipelineOutput, Notes2TexError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Notes2TexError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process_job(dir, collaborator, config))
}
