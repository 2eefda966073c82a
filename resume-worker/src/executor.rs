//! The per-job state machine: fetch, claim, download, extract, persist.
//!
//! The executor never returns an error; its only output is the side effect on
//! the job row. Work runs under the per-job deadline, while terminal status
//! writes run under their own short timeout with no cancellation token, so a
//! job that failed or finished during shutdown still gets its row settled.
//! Jobs that run out of transient retry budget, or get cancelled mid-step,
//! keep their `processing` status and are re-delivered by the janitor.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use resume_common::blob::BlobStore;
use resume_common::error::JobError;
use resume_common::extract::Extractor;
use resume_common::job::JobStatus;
use resume_common::retry::RetryPolicy;
use resume_common::store::JobStore;

/// Budget for a terminal status write, including its retries.
const TERMINAL_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// What the work pipeline produced, before the terminal write.
enum Outcome {
    /// A duplicate delivery: the row is already terminal, nothing to write.
    AlreadySettled(JobStatus),
    /// Text extracted and persisted; ready to be marked completed.
    Extracted,
}

pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<dyn Extractor>,
    job_timeout: Duration,
    store_retry: RetryPolicy,
    content_retry: RetryPolicy,
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn JobStore>,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn Extractor>,
        job_timeout: Duration,
    ) -> Self {
        Self {
            store,
            blobs,
            extractor,
            job_timeout,
            store_retry: RetryPolicy::store(),
            content_retry: RetryPolicy::bulk(),
        }
    }

    /// Drive one job to rest. `shutdown` is only observed at retry sleeps and
    /// never aborts an attempt in flight, so a worker drains its current job
    /// during shutdown instead of abandoning it halfway.
    pub async fn execute(&self, id: Uuid, shutdown: &CancellationToken) {
        info!("processing job {}", id);
        let started = tokio::time::Instant::now();
        metrics::counter!("resume_jobs_total").increment(1);

        let outcome = match tokio::time::timeout(self.job_timeout, self.process(id, shutdown)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(JobError::Cancelled),
        };

        match outcome {
            Ok(Outcome::AlreadySettled(status)) => {
                info!("job {} is already {}; nothing to do", id, status);
            }
            Ok(Outcome::Extracted) => {
                self.settle(id, JobStatus::Completed, None).await;
                metrics::counter!("resume_jobs_completed").increment(1);
                metrics::histogram!("resume_jobs_processing_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
            }
            Err(error) if error.is_permanent() => {
                warn!("job {} failed permanently: {}", id, error);
                self.settle(id, JobStatus::Failed, Some(error.to_string()))
                    .await;
                metrics::counter!("resume_jobs_failed").increment(1);
            }
            Err(JobError::Cancelled) => {
                warn!("job {} cancelled mid-flight; leaving it for re-delivery", id);
                metrics::counter!("resume_jobs_cancelled").increment(1);
            }
            Err(error) => {
                warn!(
                    "job {} exhausted its retries: {}; leaving it for re-delivery",
                    id, error
                );
                metrics::counter!("resume_jobs_stalled").increment(1);
            }
        }
    }

    /// The work pipeline, run under the per-job deadline.
    async fn process(&self, id: Uuid, shutdown: &CancellationToken) -> Result<Outcome, JobError> {
        let job = self
            .store_retry
            .retry(shutdown, || self.store.get(id))
            .await?
            .ok_or_else(|| JobError::permanent(format!("no job row for {id}")))?;

        // The idempotence gate: a re-delivered entry whose row is already
        // terminal must not be written again.
        if job.status.is_terminal() {
            return Ok(Outcome::AlreadySettled(job.status));
        }

        self.store_retry
            .retry(shutdown, || self.store.update_status(id, JobStatus::Processing))
            .await?;

        let data = self
            .store_retry
            .retry(shutdown, || self.blobs.get(&job.file_key))
            .await?;

        // Extraction runs once: its failures are permanent by definition.
        let text = self.extractor.extract(&data)?;

        self.content_retry
            .retry(shutdown, || self.store.set_content(id, &text))
            .await?;

        Ok(Outcome::Extracted)
    }

    /// Terminal status write. Runs under its own timeout with a fresh,
    /// never-cancelled token: neither the per-job deadline nor shutdown may
    /// stop a finished job from being recorded. Write failures are logged and
    /// not escalated; a row stuck in `processing` is the operator's signal.
    async fn settle(&self, id: Uuid, status: JobStatus, message: Option<String>) {
        let unstoppable = CancellationToken::new();

        let write = async {
            match &message {
                Some(message) => {
                    self.store_retry
                        .retry(&unstoppable, || self.store.mark_failed(id, message))
                        .await
                }
                None => {
                    self.store_retry
                        .retry(&unstoppable, || self.store.update_status(id, status))
                        .await
                }
            }
        };

        match tokio::time::timeout(TERMINAL_WRITE_TIMEOUT, write).await {
            Ok(Ok(())) => info!("job {} is now {}", id, status),
            Ok(Err(error)) => error!("could not move job {} to {}: {}", id, status, error),
            Err(_) => error!("timed out moving job {} to {}", id, status),
        }
    }
}

#[cfg(test)]
mod tests {
    use resume_common::blob::MockBlobStore;
    use resume_common::extract::MockExtractor;
    use resume_common::job::Job;
    use resume_common::store::MockJobStore;

    use super::*;

    const JOB_TIMEOUT: Duration = Duration::from_secs(120);

    struct Fixture {
        store: MockJobStore,
        blobs: MockBlobStore,
        extractor: MockExtractor,
        executor: JobExecutor,
    }

    fn fixture(extractor: MockExtractor) -> Fixture {
        let store = MockJobStore::new();
        let blobs = MockBlobStore::new();
        let executor = JobExecutor::new(
            Arc::new(store.clone()),
            Arc::new(blobs.clone()),
            Arc::new(extractor.clone()),
            JOB_TIMEOUT,
        );
        Fixture {
            store,
            blobs,
            extractor,
            executor,
        }
    }

    fn seeded_job(fixture: &Fixture, data: &[u8]) -> Uuid {
        let job = Job::new(Uuid::now_v7(), "upload-pdf");
        let id = job.id;
        fixture.store.insert(job);
        fixture.blobs.insert("upload-pdf", data.to_vec());
        id
    }

    #[tokio::test]
    async fn happy_path_completes_with_content() {
        let f = fixture(MockExtractor::returning("hello"));
        let id = seeded_job(&f, b"%PDF-1.5 fake");
        let shutdown = CancellationToken::new();

        f.executor.execute(id, &shutdown).await;

        let job = f.store.job(id).expect("job vanished");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.content.as_deref(), Some("hello"));
        assert_eq!(job.error_message, None);
        // Content lands before the completed transition.
        assert_eq!(
            f.store.status_writes(),
            vec![(id, JobStatus::Processing), (id, JobStatus::Completed)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_fetch_failures_are_retried_then_succeed() {
        let f = fixture(MockExtractor::returning("hello"));
        let id = seeded_job(&f, b"%PDF-1.5 fake");
        f.store.fail_next_get(JobError::transient("connection reset"));
        f.store.fail_next_get(JobError::transient("connection reset"));
        let shutdown = CancellationToken::new();

        let started = tokio::time::Instant::now();
        f.executor.execute(id, &shutdown).await;

        assert_eq!(f.store.get_calls(), 3);
        // Two backoff sleeps: 1s then 2s.
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(f.store.job(id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_exhaustion_leaves_the_job_for_redelivery() {
        let f = fixture(MockExtractor::returning("hello"));
        let id = seeded_job(&f, b"%PDF-1.5 fake");
        for _ in 0..4 {
            f.store.fail_next_get(JobError::transient("still down"));
        }
        let shutdown = CancellationToken::new();

        f.executor.execute(id, &shutdown).await;

        // Exactly max_attempts calls, then no status write at all.
        assert_eq!(f.store.get_calls(), 4);
        assert_eq!(f.store.job(id).unwrap().status, JobStatus::Queued);
        assert!(f.store.status_writes().is_empty());
    }

    #[tokio::test]
    async fn permanent_extraction_failure_marks_the_job_failed() {
        let f = fixture(MockExtractor::failing("looks like a scanned image"));
        let id = seeded_job(&f, b"garbage");
        let shutdown = CancellationToken::new();

        f.executor.execute(id, &shutdown).await;

        let job = f.store.job(id).expect("job vanished");
        assert_eq!(job.status, JobStatus::Failed);
        let message = job.error_message.expect("missing failure cause");
        assert!(message.contains("scanned image"));
        assert_eq!(f.extractor.calls(), 1);
    }

    #[tokio::test]
    async fn empty_extracted_text_still_completes() {
        let f = fixture(MockExtractor::returning(""));
        let id = seeded_job(&f, b"%PDF-1.5 fake");
        let shutdown = CancellationToken::new();

        f.executor.execute(id, &shutdown).await;

        let job = f.store.job(id).expect("job vanished");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.content.as_deref(), Some(""));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_leaves_the_job_in_processing() {
        let f = fixture(MockExtractor::returning("never reached"));
        let id = seeded_job(&f, b"%PDF-1.5 fake");
        f.blobs.delay_gets(Duration::from_secs(200));
        let shutdown = CancellationToken::new();

        f.executor.execute(id, &shutdown).await;

        // The download outlived the 120s deadline: neither completed nor
        // failed, so the janitor will re-deliver it.
        let job = f.store.job(id).expect("job vanished");
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.error_message, None);
        assert_eq!(f.extractor.calls(), 0);
    }

    #[tokio::test]
    async fn duplicate_delivery_of_a_terminal_job_writes_nothing() {
        let f = fixture(MockExtractor::returning("hello"));
        let id = seeded_job(&f, b"%PDF-1.5 fake");
        let shutdown = CancellationToken::new();

        f.executor.execute(id, &shutdown).await;
        let settled = f.store.job(id).unwrap();
        let writes_before = f.store.status_writes().len();

        f.executor.execute(id, &shutdown).await;

        assert_eq!(f.store.job(id).unwrap(), settled);
        assert_eq!(f.store.status_writes().len(), writes_before);
        assert_eq!(f.extractor.calls(), 1);
    }

    #[tokio::test]
    async fn missing_job_row_never_escapes_the_executor() {
        let f = fixture(MockExtractor::returning("hello"));
        let shutdown = CancellationToken::new();

        // No row, no blob: fetch classifies permanent and the failure write
        // itself has nowhere to land. The executor must swallow both.
        f.executor.execute(Uuid::now_v7(), &shutdown).await;
        assert!(f.store.status_writes().is_empty());
    }

    #[tokio::test]
    async fn shutdown_mid_job_still_settles_the_row() {
        let f = fixture(MockExtractor::returning("hello"));
        let id = seeded_job(&f, b"%PDF-1.5 fake");
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        // A cancelled scope stops retry sleeps, not first attempts: the job
        // drains to completion and the terminal write lands regardless.
        f.executor.execute(id, &shutdown).await;

        assert_eq!(f.store.job(id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_retry_sleep_abandons_the_job_without_writes() {
        let f = fixture(MockExtractor::returning("hello"));
        let id = seeded_job(&f, b"%PDF-1.5 fake");
        f.store.fail_next_get(JobError::transient("connection reset"));
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        f.executor.execute(id, &shutdown).await;

        // The first fetch failed and the backoff sleep observed shutdown.
        assert_eq!(f.store.get_calls(), 1);
        assert!(f.store.status_writes().is_empty());
        assert_eq!(f.store.job(id).unwrap().status, JobStatus::Queued);
    }
}
