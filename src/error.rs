//! Error types for the notes2tex library.
//!
//! Failures come in two flavours:
//!
//! * [`Notes2TexError`] (**fatal**): the run for a document cannot produce a
//!   complete bundle (malformed model output, a normalizer defect, a failed
//!   model call, unreadable job directory). Returned as `Err(Notes2TexError)`
//!   from the top-level `run*`/`process*` functions. Nothing is written.
//!
//! * [`JobError`] (**non-fatal**): one document in a batch failed while the
//!   others carry on. Stored inside [`crate::stream::JobOutcome`].
//!
//! Structural and fidelity shortfalls are *not* errors at all. A candidate
//! that loses an equation or drifts from the baseline transcript produces a
//! [`crate::output::Verdict::Reject`] decision, which is a normal result.

use std::path::PathBuf;
use thiserror::Error;

/// Raw model output could not be turned into a node sequence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Neither the blocks object nor the dual-block form was recognised.
    #[error("Unrecognised model output: {detail}")]
    UnrecognizedShape { detail: String },

    /// A block in the `blocks` array carries no `type` discriminator.
    #[error("Block {index} has no \"type\" field")]
    MissingKind { index: usize },

    /// A block in the `blocks` array has an unknown `type`.
    #[error("Block {index} has unknown type '{kind}'")]
    UnknownBlockKind { index: usize, kind: String },

    /// A block is missing a field required for its kind, or has a bad value.
    #[error("Block {index} ({kind}) is invalid: {detail}")]
    InvalidBlock {
        index: usize,
        kind: String,
        detail: String,
    },

    /// The dual-block metadata object is not valid JSON.
    #[error("Metadata object is not valid JSON: {detail}")]
    InvalidMetadata { detail: String },

    /// The LaTeX fragment opens an environment that is never closed.
    #[error("Environment '{env}' opened on line {line} is never closed")]
    UnclosedEnvironment { env: String, line: usize },

    /// The LaTeX fragment closes an environment it never opened.
    #[error("Unexpected \\end{{{env}}} on line {line}")]
    UnexpectedEnd { env: String, line: usize },
}

/// The rewrite rules produced something that cannot be a valid document.
///
/// Parser output should always be normalizable, so every variant here
/// signals a defect rather than bad input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizationError {
    /// Rendered environments do not nest.
    #[error("Rule output has mismatched environments: expected \\end{{{expected}}}, found \\end{{{found}}}")]
    MismatchedEnvironment { expected: String, found: String },

    /// Rendered environment left open at the end of the document.
    #[error("Rule output leaves environment '{env}' unclosed")]
    UnclosedEnvironment { env: String },

    /// A merge or wrap rule found its own precondition violated.
    #[error("Rule '{rule}' precondition violated: {detail}")]
    PreconditionViolated { rule: &'static str, detail: String },

    /// Text inside content nodes was altered, reordered or invented.
    #[error("Rule '{rule}' altered content text near token '{token}'")]
    ContentAltered { rule: &'static str, token: String },
}

/// A collaborator (the model passes) failed.
///
/// Propagated untouched; it aborts only the affected document.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UpstreamError {
    /// The model call returned an error.
    #[error("{pass} pass failed: {detail}")]
    Failed { pass: String, detail: String },

    /// The model call did not answer in time.
    #[error("{pass} pass timed out after {secs}s")]
    Timeout { pass: String, secs: u64 },

    /// The model call answered with nothing usable.
    #[error("{pass} pass returned an empty response")]
    Empty { pass: String },
}

/// All fatal errors returned by the notes2tex library.
#[derive(Debug, Error)]
pub enum Notes2TexError {
    // ── Core errors ───────────────────────────────────────────────────────
    /// Raw model output is malformed.
    #[error("Failed to parse model output: {0}")]
    Parse(#[from] ParseError),

    /// The normalizer hit an internal contract violation.
    #[error("Normalization failed: {0}")]
    Normalization(#[from] NormalizationError),

    /// The model collaborator failed.
    #[error("Upstream failure: {0}")]
    Upstream(#[from] UpstreamError),

    // ── Job I/O errors ────────────────────────────────────────────────────
    /// Job directory does not exist.
    #[error("Job directory not found: '{path}'")]
    JobNotFound { path: PathBuf },

    /// Job directory exists but its contents are unusable.
    #[error("Invalid job '{path}': {detail}")]
    InvalidJob { path: PathBuf, detail: String },

    /// Could not write one of the output artifacts.
    #[error("Failed to write artifact '{path}': {source}")]
    ArtifactWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Decision ──────────────────────────────────────────────────────────
    /// The decision was `Reject`.
    ///
    /// Only returned by [`crate::output::Decision::into_result`] for
    /// callers that want a reject to be an error.
    #[error("Candidate rejected: {}", issues.join(", "))]
    Rejected { issues: Vec<String> },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for one job in a batch.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum JobError {
    /// The model output for this job could not be parsed.
    #[error("Job {job}: parse failed: {detail}")]
    ParseFailed { job: String, detail: String },

    /// The normalizer rejected the parsed output.
    #[error("Job {job}: normalization failed: {detail}")]
    NormalizationFailed { job: String, detail: String },

    /// A model pass failed for this job.
    #[error("Job {job}: {source}")]
    Upstream { job: String, source: UpstreamError },

    /// Reading inputs or writing artifacts failed.
    #[error("Job {job}: I/O failed: {detail}")]
    Io { job: String, detail: String },
}

impl JobError {
    /// Classify a fatal error into the per-job form.
    pub fn from_fatal(job: impl Into<String>, err: Notes2TexError) -> Self {
        let job = job.into();
        match err {
            Notes2TexError::Parse(e) => JobError::ParseFailed {
                job,
                detail: e.to_string(),
            },
            Notes2TexError::Normalization(e) => JobError::NormalizationFailed {
                job,
                detail: e.to_string(),
            },
            Notes2TexError::Upstream(source) => JobError::Upstream { job, source },
            other => JobError::Io {
                job,
                detail: other.to_string(),
            },
        }
    }
}
