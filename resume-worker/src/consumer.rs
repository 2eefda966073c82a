//! The consumer: the single task allowed to pop the durable queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use resume_common::health::HealthHandle;
use resume_common::queue::JobQueue;

/// Fixed wait after the queue reports a transient failure. The outage itself
/// is the bound, so there is no exponential backoff here.
const RESERVE_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Pull entries off the durable queue and hand them to idle workers.
///
/// The hand-off channel has a single slot and is driven through
/// `Sender::reserve`: a new queue entry is only popped once the previous one
/// has been handed over, so arrival spikes stay on the durable queue instead
/// of accumulating in process memory. Returning drops the sender, which
/// closes the channel and tells every worker to wind down.
pub async fn run_consumer(
    queue: Arc<dyn JobQueue>,
    handoff: mpsc::Sender<Uuid>,
    shutdown: CancellationToken,
    liveness: HealthHandle,
) {
    loop {
        liveness.report_healthy();

        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = handoff.reserve() => match permit {
                Ok(permit) => permit,
                // Every worker is gone; nobody left to hand work to.
                Err(_) => break,
            },
        };

        let entry = tokio::select! {
            _ = shutdown.cancelled() => break,
            reserved = queue.reserve() => match reserved {
                Ok(entry) => entry,
                Err(error) => {
                    warn!("could not reserve a queue entry: {}", error);
                    metrics::counter!("resume_consumer_reserve_errors").increment(1);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RESERVE_RETRY_INTERVAL) => {}
                    }
                    continue;
                }
            },
        };

        match entry.parse::<Uuid>() {
            Ok(id) => permit.send(id),
            Err(_) => {
                warn!("dropping malformed queue entry: {}", entry);
                metrics::counter!("resume_consumer_malformed_entries").increment(1);
            }
        }
    }

    info!("consumer stopping; closing the hand-off channel");
}
