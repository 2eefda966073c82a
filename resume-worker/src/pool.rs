//! The worker pool and its supervision.
//!
//! One consumer task feeds a fixed set of peer workers over the hand-off
//! channel. `run` returns only after the consumer and every worker have
//! exited, which happens when the shutdown token fires: the consumer closes
//! the hand-off, and each worker drains its current job before observing the
//! closed channel.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use resume_common::health::HealthHandle;
use resume_common::queue::JobQueue;

use crate::consumer::run_consumer;
use crate::executor::JobExecutor;

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    executor: Arc<JobExecutor>,
    worker_count: usize,
    liveness: HealthHandle,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        executor: Arc<JobExecutor>,
        worker_count: usize,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            queue,
            executor,
            worker_count,
            liveness,
        }
    }

    /// Launch everything and wait for it all to come back.
    pub async fn run(self, shutdown: CancellationToken) {
        let (handoff_tx, handoff_rx) = mpsc::channel::<Uuid>(1);
        let handoff_rx = Arc::new(Mutex::new(handoff_rx));

        let consumer = tokio::spawn(run_consumer(
            self.queue.clone(),
            handoff_tx,
            shutdown.clone(),
            self.liveness.clone(),
        ));

        let mut workers = Vec::with_capacity(self.worker_count);
        for worker_id in 0..self.worker_count {
            workers.push(tokio::spawn(run_worker(
                worker_id,
                handoff_rx.clone(),
                self.executor.clone(),
                shutdown.clone(),
            )));
        }
        info!("started {} workers", self.worker_count);

        if let Err(error) = consumer.await {
            error!("consumer task panicked: {}", error);
        }
        for worker in workers {
            if let Err(error) = worker.await {
                error!("worker task panicked: {}", error);
            }
        }
        info!("worker pool drained");
    }
}

/// A single worker: take a job id off the hand-off, run it to rest, repeat.
/// The shared receiver makes the hand-off a rendezvous between the consumer
/// and whichever worker is idle; pickup order across workers is unspecified.
async fn run_worker(
    worker_id: usize,
    handoff: Arc<Mutex<mpsc::Receiver<Uuid>>>,
    executor: Arc<JobExecutor>,
    shutdown: CancellationToken,
) {
    loop {
        let received = { handoff.lock().await.recv().await };

        match received {
            Some(id) => executor.execute(id, &shutdown).await,
            None => break,
        }
    }
    info!("worker {} exiting", worker_id);
}
