//! Progress-callback trait for per-job batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the batch driver works through job directories.
//!
//! # Example
//!
//! ```rust
//! use notes2tex::{BatchProgressCallback, PipelineConfig, Verdict};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct AcceptCounter {
//!     accepted: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for AcceptCounter {
//!     fn on_job_complete(&self, job: &str, verdict: Verdict) {
//!         if verdict != Verdict::Reject {
//!             self.accepted.fetch_add(1, Ordering::SeqCst);
//!         }
//!         eprintln!("{job}: {verdict}");
//!     }
//! }
//!
//! let counter = Arc::new(AcceptCounter { accepted: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::Verdict;
use std::sync::Arc;

/// Called by the batch driver as it processes each job.
///
/// Jobs run concurrently, so `on_job_start`, `on_job_complete` and
/// `on_job_error` may be called from different tasks at once.
/// Implementations must protect shared mutable state (`Mutex`,
/// `AtomicUsize`, …). All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before any job starts.
    fn on_batch_start(&self, total_jobs: usize) {
        let _ = total_jobs;
    }

    /// Called before the first collaborator pass of a job.
    fn on_job_start(&self, job: &str) {
        let _ = job;
    }

    /// Called when a job produced a decision (whatever the verdict).
    fn on_job_complete(&self, job: &str, verdict: Verdict) {
        let _ = (job, verdict);
    }

    /// Called when a job failed with an error and wrote nothing.
    fn on_job_error(&self, job: &str, error: &str) {
        let _ = (job, error);
    }

    /// Called once after every job has been attempted.
    ///
    /// `decided` counts jobs that reached a verdict, accepted or not.
    fn on_batch_complete(&self, total_jobs: usize, decided: usize) {
        let _ = (total_jobs, decided);
    }
}

/// Default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        total: AtomicUsize,
        started: AtomicUsize,
        rejected: Mutex<Vec<String>>,
        errors: AtomicUsize,
        decided: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_batch_start(&self, total_jobs: usize) {
            self.total.store(total_jobs, Ordering::SeqCst);
        }

        fn on_job_start(&self, _job: &str) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_job_complete(&self, job: &str, verdict: Verdict) {
            if verdict == Verdict::Reject {
                self.rejected.lock().unwrap().push(job.to_string());
            }
        }

        fn on_job_error(&self, _job: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _total_jobs: usize, decided: usize) {
            self.decided.store(decided, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_job_start("a");
        cb.on_job_complete("a", Verdict::Accept);
        cb.on_job_error("b", "refine pass timed out");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_batch_start(3);
        tracker.on_job_start("lecture-01");
        tracker.on_job_complete("lecture-01", Verdict::Accept);
        tracker.on_job_start("lecture-02");
        tracker.on_job_complete("lecture-02", Verdict::Reject);
        tracker.on_job_start("lecture-03");
        tracker.on_job_error("lecture-03", "parse failed");
        tracker.on_batch_complete(3, 2);

        assert_eq!(tracker.total.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.started.load(Ordering::SeqCst), 3);
        assert_eq!(*tracker.rejected.lock().unwrap(), vec!["lecture-02".to_string()]);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.decided.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(10);
        cb.on_job_complete("x", Verdict::AcceptWithWarnings);
    }
}
