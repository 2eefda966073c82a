//! Recovery of reserved-but-unsettled queue entries.
//!
//! Workers never acknowledge queue entries; the job row is the source of
//! truth. That leaves two kinds of residue on the in-flight list: entries
//! whose job already reached a terminal state (the normal case) and entries
//! whose worker died mid-job. The sweep settles the former and requeues the
//! latter once their reservation is older than the in-flight timeout.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use resume_common::error::JobError;
use resume_common::queue::JobQueue;
use resume_common::store::JobStore;

pub struct InflightSweeper {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    inflight_timeout: Duration,
}

impl InflightSweeper {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        inflight_timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            inflight_timeout,
        }
    }

    /// Run one sweep. Failures are logged and retried on the next tick.
    pub async fn sweep(&self) {
        if let Err(err) = self.sweep_inner().await {
            error!("in-flight sweep failed: {}", err);
        }
    }

    async fn sweep_inner(&self) -> Result<(), JobError> {
        let mut settled = 0u64;

        for entry in self.queue.list_inflight().await? {
            if self.is_settled(&entry).await? {
                self.queue.remove_inflight(&entry).await?;
                settled += 1;
            }
        }

        let requeued = self.queue.requeue_expired(self.inflight_timeout).await?;

        metrics::counter!("resume_janitor_settled").increment(settled);
        metrics::counter!("resume_janitor_requeued").increment(requeued.len() as u64);

        if !requeued.is_empty() {
            warn!(
                "requeued {} stale in-flight entries: {:?}",
                requeued.len(),
                requeued
            );
        }
        info!(
            "in-flight sweep complete: settled {}, requeued {}",
            settled,
            requeued.len()
        );

        Ok(())
    }

    /// An entry is settled when nothing will ever write to it again: its job
    /// reached a terminal state, its row is gone, or it never named a job.
    async fn is_settled(&self, entry: &str) -> Result<bool, JobError> {
        let id = match entry.parse::<Uuid>() {
            Ok(id) => id,
            Err(_) => {
                warn!("removing malformed in-flight entry: {}", entry);
                return Ok(true);
            }
        };

        match self.store.get(id).await? {
            Some(job) => Ok(job.status.is_terminal()),
            None => {
                warn!("removing in-flight entry with no job row: {}", entry);
                Ok(true)
            }
        }
    }
}
