//! # notes2tex
//!
//! Normalize, validate and fidelity-score LaTeX produced by a generative
//! model from scanned handwritten notes.
//!
//! ## Why this crate?
//!
//! A model asked to typeset lecture notes drifts: it rewords sentences,
//! drops equations, invents summaries and emits environments that do not
//! compile. This crate sits between the raw model output and the accepted
//! document source. It parses both output shapes the model produces,
//! rewrites them into a canonical node sequence with a deterministic rule
//! table, scores the result against the first-pass transcript and refuses
//! anything that breaks a hard invariant.
//!
//! ## Pipeline Overview
//!
//! ```text
//! job directory
//!  │
//!  ├─ 1. Transcribe  first model pass (baseline transcript)
//!  ├─ 2. Plan        language detection, mode auto-selection
//!  ├─ 3. Refine      second model pass in the chosen mode
//!  ├─ 4. Parse       blocks object or dual block → node sequence
//!  ├─ 5. Normalize   ordered rewrite rules, token gate after each
//!  ├─ 6. Check       fidelity scorer ∥ structural validator
//!  ├─ 7. Decide      Accept / AcceptWithWarnings / Reject + suggestions
//!  └─ 8. Write       content.tex, meta.json, decision.json
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use notes2tex::{process_job, FileCollaborator, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let output = process_job("jobs/lecture-03", &FileCollaborator::new(), &config).await?;
//!     println!("{}", output.decision.verdict);
//!     for s in &output.decision.suggestions {
//!         eprintln!("  {s}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `notes2tex` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! notes2tex = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod classify;
pub mod collaborator;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use classify::{recommend_mode, Blocker, ModeRecommendation};
pub use collaborator::{FileCollaborator, JobInput, ModelCollaborator};
pub use config::{
    FidelityThresholds, Language, Mode, ModeSelection, PipelineConfig, PipelineConfigBuilder,
};
pub use document::{
    BaselineTranscript, BoxKind, CandidateDocument, DocumentContext, HeadingLevel,
    StructuralNode,
};
pub use engine::{load_job, process, process_job, process_job_sync, run, run_text, write_bundle};
pub use error::{JobError, NormalizationError, Notes2TexError, ParseError, UpstreamError};
pub use output::{
    Decision, Issue, IssueKind, MetadataRecord, PipelineOutput, RunStats, Severity,
    SimilarityReport, ValidationReport, Verdict,
};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{discover_jobs, process_batch, process_stream, JobOutcome, JobStream};
