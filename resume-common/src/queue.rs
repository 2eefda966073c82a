//! Durable FIFO of job identifiers, backed by a pair of Redis lists.
//!
//! Producers LPUSH onto `job-queue:pending`; `reserve` atomically moves the
//! oldest entry onto `job-queue:inflight` and hands it to the caller. Entries
//! are never acknowledged by workers: the job row in PostgreSQL is the source
//! of truth for completion, and the janitor sweeps the in-flight list using
//! the reservation timestamps kept in `job-queue:inflight-since`. An entry
//! with no recorded timestamp counts as already expired, which covers a crash
//! between the move and the timestamp write.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, IntoConnectionInfo};
use tokio::sync::Notify;
use tracing::warn;

use crate::error::JobError;

const PENDING_LIST: &str = "job-queue:pending";
const INFLIGHT_LIST: &str = "job-queue:inflight";
const INFLIGHT_SINCE_HASH: &str = "job-queue:inflight-since";

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append an entry; returns once the queue has durably accepted it.
    async fn enqueue(&self, entry: &str) -> Result<(), JobError>;

    /// Block until an entry is available and move it to the in-flight list.
    /// Callers race this against their cancellation scope; dropping the
    /// future abandons the blocking wait.
    async fn reserve(&self) -> Result<String, JobError>;

    /// Snapshot of the in-flight list.
    async fn list_inflight(&self) -> Result<Vec<String>, JobError>;

    /// Drop a settled entry from the in-flight list.
    async fn remove_inflight(&self, entry: &str) -> Result<(), JobError>;

    /// Move every in-flight entry reserved longer than `timeout` ago back to
    /// the consuming end of the pending list. Returns the moved entries.
    async fn requeue_expired(&self, timeout: Duration) -> Result<Vec<String>, JobError>;
}

/// Queue client over a Redis (or Valkey) server.
pub struct RedisJobQueue {
    client: redis::Client,
}

impl RedisJobQueue {
    pub fn new(url: &str, password: Option<&str>) -> Result<Self, JobError> {
        let mut info = url
            .into_connection_info()
            .map_err(|error| JobError::permanent(format!("invalid queue url: {error}")))?;

        if let Some(password) = password.filter(|p| !p.is_empty()) {
            info.redis.password = Some(password.to_owned());
        }

        let client = redis::Client::open(info)?;

        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::Connection, JobError> {
        Ok(self.client.get_async_connection().await?)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, entry: &str) -> Result<(), JobError> {
        let mut conn = self.connection().await?;
        let _: i64 = conn.lpush(PENDING_LIST, entry).await?;
        Ok(())
    }

    async fn reserve(&self) -> Result<String, JobError> {
        let mut conn = self.connection().await?;

        let entry: String = redis::cmd("BLMOVE")
            .arg(PENDING_LIST)
            .arg(INFLIGHT_LIST)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(0)
            .query_async(&mut conn)
            .await?;

        // The entry is reserved either way; a lost timestamp only makes the
        // janitor reclaim it sooner.
        let stamp: Result<i64, redis::RedisError> = conn
            .hset(INFLIGHT_SINCE_HASH, &entry, Utc::now().timestamp())
            .await;
        if let Err(error) = stamp {
            warn!("failed to record reservation time for {}: {}", entry, error);
        }

        Ok(entry)
    }

    async fn list_inflight(&self) -> Result<Vec<String>, JobError> {
        let mut conn = self.connection().await?;
        let entries: Vec<String> = conn.lrange(INFLIGHT_LIST, 0, -1).await?;
        Ok(entries)
    }

    async fn remove_inflight(&self, entry: &str) -> Result<(), JobError> {
        let mut conn = self.connection().await?;
        let _: i64 = conn.lrem(INFLIGHT_LIST, 1, entry).await?;
        let _: i64 = conn.hdel(INFLIGHT_SINCE_HASH, entry).await?;
        Ok(())
    }

    async fn requeue_expired(&self, timeout: Duration) -> Result<Vec<String>, JobError> {
        let mut conn = self.connection().await?;
        let entries: Vec<String> = conn.lrange(INFLIGHT_LIST, 0, -1).await?;
        let now = Utc::now().timestamp();
        let mut moved = Vec::new();

        for entry in entries {
            let since: Option<i64> = conn.hget(INFLIGHT_SINCE_HASH, &entry).await?;
            let expired = match since {
                Some(reserved_at) => now - reserved_at >= timeout.as_secs() as i64,
                None => true,
            };
            if !expired {
                continue;
            }

            let removed: i64 = conn.lrem(INFLIGHT_LIST, 1, &entry).await?;
            if removed == 0 {
                // Another sweeper got there first.
                continue;
            }
            // RPUSH lands the entry at the consuming end, so recovered jobs
            // run before freshly enqueued ones.
            let _: i64 = conn.rpush(PENDING_LIST, &entry).await?;
            let _: i64 = conn.hdel(INFLIGHT_SINCE_HASH, &entry).await?;
            moved.push(entry);
        }

        Ok(moved)
    }
}

/// In-memory queue for tests.
///
/// `reserve` parks on a [`Notify`] until an entry arrives, mirroring the
/// blocking pop. Failures can be queued per call, and `requeue_expired`
/// ignores the timeout and moves everything back, which lets janitor tests
/// drive expiry explicitly.
#[derive(Clone, Default)]
pub struct MockJobQueue {
    state: Arc<Mutex<MockQueueState>>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct MockQueueState {
    pending: VecDeque<String>,
    inflight: Vec<String>,
    reserve_failures: VecDeque<JobError>,
}

impl MockJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error to be returned by the next `reserve` call.
    pub fn fail_next_reserve(&self, error: JobError) {
        self.state.lock().unwrap().reserve_failures.push_back(error);
        self.notify.notify_one();
    }

    pub fn pending(&self) -> Vec<String> {
        self.state.lock().unwrap().pending.iter().cloned().collect()
    }

    pub fn inflight(&self) -> Vec<String> {
        self.state.lock().unwrap().inflight.clone()
    }
}

#[async_trait]
impl JobQueue for MockJobQueue {
    async fn enqueue(&self, entry: &str) -> Result<(), JobError> {
        self.state
            .lock()
            .unwrap()
            .pending
            .push_front(entry.to_owned());
        self.notify.notify_one();
        Ok(())
    }

    async fn reserve(&self) -> Result<String, JobError> {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if let Some(error) = state.reserve_failures.pop_front() {
                    return Err(error);
                }
                if let Some(entry) = state.pending.pop_back() {
                    state.inflight.push(entry.clone());
                    return Ok(entry);
                }
            }
            self.notify.notified().await;
        }
    }

    async fn list_inflight(&self) -> Result<Vec<String>, JobError> {
        Ok(self.inflight())
    }

    async fn remove_inflight(&self, entry: &str) -> Result<(), JobError> {
        let mut state = self.state.lock().unwrap();
        if let Some(position) = state.inflight.iter().position(|e| e == entry) {
            state.inflight.remove(position);
        }
        Ok(())
    }

    async fn requeue_expired(&self, _timeout: Duration) -> Result<Vec<String>, JobError> {
        let mut state = self.state.lock().unwrap();
        let moved: Vec<String> = state.inflight.drain(..).collect();
        for entry in &moved {
            state.pending.push_back(entry.clone());
        }
        self.notify.notify_one();
        Ok(moved)
    }
}
