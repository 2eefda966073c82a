//! Persistence for job records, backed by a PostgreSQL `jobs` table.
//!
//! Rows are inserted by ingress and mutated only by the worker's executor;
//! nothing in here deletes, so retention stays an operational concern.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::error::JobError;
use crate::job::{Job, JobStatus};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a freshly ingested job row.
    async fn create(&self, job: &Job) -> Result<(), JobError>;

    /// Fetch a job by id. `Ok(None)` means the row does not exist.
    async fn get(&self, id: Uuid) -> Result<Option<Job>, JobError>;

    /// Move the job to `status`, leaving all other columns untouched.
    async fn update_status(&self, id: Uuid, status: JobStatus) -> Result<(), JobError>;

    /// Persist the extracted text. Called before the transition to completed.
    async fn set_content(&self, id: Uuid, content: &str) -> Result<(), JobError>;

    /// Move the job to failed and record the cause in one statement, so a
    /// failed row always carries its message.
    async fn mark_failed(&self, id: Uuid, message: &str) -> Result<(), JobError>;
}

/// Job store over a PostgreSQL connection pool.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub async fn new(url: &str, max_connections: u32) -> Result<Self, JobError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    pub fn new_from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Raw row shape; `status` parses into [`JobStatus`] on the way out.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    status: String,
    file_key: String,
    content: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = JobError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|_| JobError::permanent(format!("invalid status stored: {}", row.status)))?;

        Ok(Job {
            id: row.id,
            status,
            file_key: row.file_key,
            content: row.content,
            error_message: row.error_message,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &Job) -> Result<(), JobError> {
        sqlx::query(
            r#"
INSERT INTO jobs (id, status, file_key, created_at)
VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(&job.file_key)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, JobError> {
        let row: Option<JobRow> = sqlx::query_as(
            r#"
SELECT id, status, file_key, content, error_message, created_at
FROM jobs
WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Job::try_from).transpose()
    }

    async fn update_status(&self, id: Uuid, status: JobStatus) -> Result<(), JobError> {
        let result = sqlx::query("UPDATE jobs SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(JobError::permanent(format!(
                "no job with id {id} to move to {status}"
            )));
        }

        Ok(())
    }

    async fn set_content(&self, id: Uuid, content: &str) -> Result<(), JobError> {
        let result = sqlx::query("UPDATE jobs SET content = $2 WHERE id = $1")
            .bind(id)
            .bind(content)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(JobError::permanent(format!(
                "no job with id {id} to store content for"
            )));
        }

        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, message: &str) -> Result<(), JobError> {
        let result =
            sqlx::query("UPDATE jobs SET status = 'failed', error_message = $2 WHERE id = $1")
                .bind(id)
                .bind(message)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(JobError::permanent(format!("no job with id {id} to fail")));
        }

        Ok(())
    }
}

/// In-memory job store for tests: programmable per-operation failures and
/// call counters, same pattern as the mock queue client.
#[derive(Clone, Default)]
pub struct MockJobStore {
    jobs: Arc<Mutex<HashMap<Uuid, Job>>>,
    get_failures: Arc<Mutex<VecDeque<JobError>>>,
    update_failures: Arc<Mutex<VecDeque<JobError>>>,
    get_calls: Arc<AtomicUsize>,
    status_writes: Arc<Mutex<Vec<(Uuid, JobStatus)>>>,
}

impl MockJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Job) {
        self.jobs.lock().unwrap().insert(job.id, job);
    }

    pub fn job(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    /// Queue an error to be returned by the next `get` call.
    pub fn fail_next_get(&self, error: JobError) {
        self.get_failures.lock().unwrap().push_back(error);
    }

    /// Queue an error for the next status/content/failure write.
    pub fn fail_next_update(&self, error: JobError) {
        self.update_failures.lock().unwrap().push_back(error);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Every status transition observed, in write order.
    pub fn status_writes(&self) -> Vec<(Uuid, JobStatus)> {
        self.status_writes.lock().unwrap().clone()
    }

    fn take_update_failure(&self) -> Option<JobError> {
        self.update_failures.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl JobStore for MockJobStore {
    async fn create(&self, job: &Job) -> Result<(), JobError> {
        if let Some(error) = self.take_update_failure() {
            return Err(error);
        }
        self.insert(job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, JobError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.get_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self.job(id))
    }

    async fn update_status(&self, id: Uuid, status: JobStatus) -> Result<(), JobError> {
        if let Some(error) = self.take_update_failure() {
            return Err(error);
        }
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| JobError::permanent(format!("no job with id {id} to move to {status}")))?;
        job.status = status;
        self.status_writes.lock().unwrap().push((id, status));
        Ok(())
    }

    async fn set_content(&self, id: Uuid, content: &str) -> Result<(), JobError> {
        if let Some(error) = self.take_update_failure() {
            return Err(error);
        }
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&id).ok_or_else(|| {
            JobError::permanent(format!("no job with id {id} to store content for"))
        })?;
        job.content = Some(content.to_owned());
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, message: &str) -> Result<(), JobError> {
        if let Some(error) = self.take_update_failure() {
            return Err(error);
        }
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| JobError::permanent(format!("no job with id {id} to fail")))?;
        job.status = JobStatus::Failed;
        job.error_message = Some(message.to_owned());
        self.status_writes
            .lock()
            .unwrap()
            .push((id, JobStatus::Failed));
        Ok(())
    }
}
