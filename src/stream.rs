//! Batch driver: many job directories, results streamed as they finish.
//!
//! Each job is an independent pipeline instance; no state is shared
//! between them apart from the progress callback. Up to
//! [`PipelineConfig::concurrency`] jobs run at once and outcomes arrive in
//! completion order, not input order. A failing job yields a [`JobError`]
//! and the batch carries on.

use crate::collaborator::{ModelCollaborator, LOGS_DIR};
use crate::config::PipelineConfig;
use crate::engine;
use crate::error::{JobError, Notes2TexError};
use crate::output::PipelineOutput;
use futures::future;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::{info, warn};

/// Result of one job in a batch.
#[derive(Debug)]
pub struct JobOutcome {
    pub job: String,
    pub dir: PathBuf,
    pub result: Result<PipelineOutput, JobError>,
}

/// A boxed stream of job outcomes.
pub type JobStream = Pin<Box<dyn Stream<Item = JobOutcome> + Send>>;

fn job_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| dir.display().to_string())
}

/// Process job directories concurrently, streaming outcomes as they finish.
///
/// Progress events go to `config.progress_callback`; `on_batch_complete`
/// fires after the last outcome has been produced.
pub fn process_stream(
    dirs: Vec<PathBuf>,
    collaborator: Arc<dyn ModelCollaborator>,
    config: &PipelineConfig,
) -> JobStream {
    let total = dirs.len();
    let concurrency = config.concurrency;
    let decided = Arc::new(AtomicUsize::new(0));
    info!("Starting batch of {} jobs ({} at a time)", total, concurrency);
    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    let jobs = {
        let config = config.clone();
        let decided = Arc::clone(&decided);
        stream::iter(dirs)
            .map(move |dir| {
                let collaborator = Arc::clone(&collaborator);
                let config = config.clone();
                let decided = Arc::clone(&decided);
                async move {
                    let job = job_name(&dir);
                    let cb = config.progress_callback.clone();
                    if let Some(ref cb) = cb {
                        cb.on_job_start(&job);
                    }

                    let result = match engine::process_job(&dir, collaborator.as_ref(), &config).await {
                        Ok(output) => {
                            decided.fetch_add(1, Ordering::SeqCst);
                            if let Some(ref cb) = cb {
                                cb.on_job_complete(&job, output.decision.verdict);
                            }
                            Ok(output)
                        }
                        Err(e) => {
                            warn!("Job {} failed: {}", job, e);
                            if let Some(ref cb) = cb {
                                cb.on_job_error(&job, &e.to_string());
                            }
                            Err(JobError::from_fatal(job.clone(), e))
                        }
                    };
                    Some(JobOutcome { job, dir, result })
                }
            })
            .buffer_unordered(concurrency)
    };

    let callback = config.progress_callback.clone();
    let tail = stream::once(async move {
        let decided = decided.load(Ordering::SeqCst);
        info!("Batch complete: {}/{} jobs decided", decided, total);
        if let Some(cb) = callback {
            cb.on_batch_complete(total, decided);
        }
        None
    });

    Box::pin(jobs.chain(tail).filter_map(future::ready))
}

/// Process a batch and collect every outcome.
pub async fn process_batch(
    dirs: Vec<PathBuf>,
    collaborator: Arc<dyn ModelCollaborator>,
    config: &PipelineConfig,
) -> Vec<JobOutcome> {
    process_stream(dirs, collaborator, config).collect().await
}

/// Job directories under `root`: subdirectories holding a `logs/` directory.
///
/// Sorted by path.
pub async fn discover_jobs(root: impl AsRef<Path>) -> Result<Vec<PathBuf>, Notes2TexError> {
    let root = root.as_ref();
    let mut entries = tokio::fs::read_dir(root)
        .await
        .map_err(|_| Notes2TexError::JobNotFound {
            path: root.to_path_buf(),
        })?;

    let mut dirs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Notes2TexError::InvalidJob {
            path: root.to_path_buf(),
            detail: e.to_string(),
        })?
    {
        let path = entry.path();
        if tokio::fs::metadata(path.join(LOGS_DIR))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::{FileCollaborator, REFINED_LOG, TRANSCRIPT_LOG};
    use crate::config::{Mode, ModeSelection};
    use crate::output::Verdict;
    use crate::progress::BatchProgressCallback;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl BatchProgressCallback for Recorder {
        fn on_batch_start(&self, total_jobs: usize) {
            self.events.lock().unwrap().push(format!("start {total_jobs}"));
        }
        fn on_job_complete(&self, job: &str, verdict: Verdict) {
            self.events.lock().unwrap().push(format!("{job} {verdict}"));
        }
        fn on_job_error(&self, job: &str, _error: &str) {
            self.events.lock().unwrap().push(format!("{job} error"));
        }
        fn on_batch_complete(&self, total_jobs: usize, decided: usize) {
            self.events.lock().unwrap().push(format!("done {decided}/{total_jobs}"));
        }
    }

    fn write_job(root: &Path, name: &str, transcript: &str, refined: &str) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(dir.join(LOGS_DIR)).unwrap();
        std::fs::write(dir.join(LOGS_DIR).join(TRANSCRIPT_LOG), transcript).unwrap();
        std::fs::write(dir.join(LOGS_DIR).join(REFINED_LOG), refined).unwrap();
        dir
    }

    #[tokio::test]
    async fn batch_reports_every_job() {
        let tmp = tempfile::tempdir().unwrap();
        write_job(
            tmp.path(),
            "a",
            "Groups act on sets.",
            r#"{"blocks":[{"type":"paragraph","text":"Groups act on sets."}]}"#,
        );
        write_job(tmp.path(), "b", "Anything.", "{\"blocks\": 3}");
        std::fs::create_dir_all(tmp.path().join("not-a-job")).unwrap();

        let recorder = Arc::new(Recorder::default());
        let config = PipelineConfig::builder()
            .mode(ModeSelection::Fixed(Mode::Faithful))
            .progress_callback(recorder.clone())
            .build()
            .unwrap();

        let dirs = discover_jobs(tmp.path()).await.unwrap();
        assert_eq!(dirs.len(), 2);

        let mut outcomes = process_batch(dirs, Arc::new(FileCollaborator::new()), &config).await;
        outcomes.sort_by(|x, y| x.job.cmp(&y.job));
        assert!(outcomes[0].result.is_ok());
        assert!(matches!(outcomes[1].result, Err(JobError::ParseFailed { .. })));
        assert!(tmp.path().join("a").join(engine::DECISION_FILE).exists());
        assert!(!tmp.path().join("b").join(engine::CONTENT_FILE).exists());

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events.first().map(String::as_str), Some("start 2"));
        assert_eq!(events.last().map(String::as_str), Some("done 1/2"));
        assert!(events.contains(&"a accept".to_string()));
        assert!(events.contains(&"b error".to_string()));
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            discover_jobs(tmp.path().join("missing")).await,
            Err(Notes2TexError::JobNotFound { .. })
        ));
    }
}
