//! The two model passes, behind an opaque trait.
//!
//! The core never talks to a model itself. A [`ModelCollaborator`] supplies
//! the first-pass transcript (the fidelity baseline) and the second-pass
//! refined output (the raw input to the parser). [`FileCollaborator`]
//! replays passes recorded in a job directory's `logs/`.

use crate::config::Mode;
use crate::document::DocumentContext;
use crate::error::UpstreamError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const TRANSCRIBE_PASS: &str = "transcribe";
pub const REFINE_PASS: &str = "refine";

/// Directory of recorded pass logs inside a job directory.
pub const LOGS_DIR: &str = "logs";
pub const TRANSCRIPT_LOG: &str = "transcript.txt";
pub const REFINED_LOG: &str = "refined.txt";

/// One document to process.
#[derive(Debug, Clone)]
pub struct JobInput {
    /// Job directory name, used in logs and batch outcomes.
    pub id: String,
    pub dir: PathBuf,
    pub context: DocumentContext,
}

/// Source of the two model passes.
#[async_trait]
pub trait ModelCollaborator: Send + Sync {
    /// First pass: maximal-fidelity transcript of the notes.
    async fn transcribe(&self, job: &JobInput) -> Result<String, UpstreamError>;

    /// Second pass: structured output for `mode`, given the transcript.
    async fn refine(
        &self,
        job: &JobInput,
        transcript: &str,
        mode: Mode,
    ) -> Result<String, UpstreamError>;
}

/// Replays `logs/transcript.txt` and `logs/refined.txt`.
///
/// A mode-specific `logs/refined_<mode>.txt` takes precedence over the
/// generic refined log when present.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileCollaborator;

impl FileCollaborator {
    pub fn new() -> Self {
        Self
    }
}

async fn read_pass(pass: &str, path: &Path) -> Result<String, UpstreamError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| UpstreamError::Failed {
            pass: pass.to_string(),
            detail: format!("{}: {}", path.display(), e),
        })?;
    if text.trim().is_empty() {
        return Err(UpstreamError::Empty {
            pass: pass.to_string(),
        });
    }
    debug!("Replayed {} pass from {} ({} bytes)", pass, path.display(), text.len());
    Ok(text)
}

#[async_trait]
impl ModelCollaborator for FileCollaborator {
    async fn transcribe(&self, job: &JobInput) -> Result<String, UpstreamError> {
        read_pass(TRANSCRIBE_PASS, &job.dir.join(LOGS_DIR).join(TRANSCRIPT_LOG)).await
    }

    async fn refine(
        &self,
        job: &JobInput,
        _transcript: &str,
        mode: Mode,
    ) -> Result<String, UpstreamError> {
        let logs = job.dir.join(LOGS_DIR);
        let specific = logs.join(format!("refined_{}.txt", mode.as_str()));
        if tokio::fs::try_exists(&specific).await.unwrap_or(false) {
            return read_pass(REFINE_PASS, &specific).await;
        }
        read_pass(REFINE_PASS, &logs.join(REFINED_LOG)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(dir: &Path) -> JobInput {
        JobInput {
            id: "job".into(),
            dir: dir.to_path_buf(),
            context: DocumentContext::default(),
        }
    }

    #[tokio::test]
    async fn replays_recorded_passes() {
        let tmp = tempfile::tempdir().unwrap();
        let logs = tmp.path().join(LOGS_DIR);
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::write(logs.join(TRANSCRIPT_LOG), "The cat sat.").unwrap();
        std::fs::write(logs.join(REFINED_LOG), "generic").unwrap();
        std::fs::write(logs.join("refined_readable.txt"), "readable").unwrap();

        let c = FileCollaborator::new();
        let j = job(tmp.path());
        assert_eq!(c.transcribe(&j).await.unwrap(), "The cat sat.");
        assert_eq!(c.refine(&j, "", Mode::Faithful).await.unwrap(), "generic");
        assert_eq!(c.refine(&j, "", Mode::Readable).await.unwrap(), "readable");
    }

    #[tokio::test]
    async fn missing_and_empty_logs_are_upstream_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let c = FileCollaborator::new();
        let j = job(tmp.path());
        assert!(matches!(
            c.transcribe(&j).await,
            Err(UpstreamError::Failed { ref pass, .. }) if pass == TRANSCRIBE_PASS
        ));

        std::fs::create_dir_all(tmp.path().join(LOGS_DIR)).unwrap();
        std::fs::write(tmp.path().join(LOGS_DIR).join(REFINED_LOG), "  \n").unwrap();
        assert_eq!(
            c.refine(&j, "", Mode::Faithful).await,
            Err(UpstreamError::Empty { pass: REFINE_PASS.into() })
        );
    }
}
