use crate::aggregator::Aggregator;
use crate::decoder::BatchDecoder;
use crate::dispatcher::AlertDispatcher;
use crate::error::ProcessingError;
use crate::model::{AggregationResult, CompletionSummary, WorkItem};
use crate::queue::WorkQueue;
use chrono::Utc;
use common_observability::StockMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Where one drain pass currently is.
#[derive(Debug)]
pub enum DrainState {
    Polling,
    Processing(WorkItem),
    Acknowledging(WorkItem, Vec<AggregationResult>),
    Drained,
}

#[derive(Debug, Default)]
struct PassTally {
    processed_ids: Vec<String>,
    failed_count: usize,
    deadline_reached: bool,
}

/// Pulls work items until the queue stays empty for one poll wait, the
/// deadline passes, or the queue fails. A work item is acknowledged only
/// when every record in its batch was aggregated.
pub struct DrainController {
    queue: Arc<dyn WorkQueue>,
    decoder: Box<dyn BatchDecoder>,
    aggregator: Aggregator,
    dispatcher: AlertDispatcher,
    metrics: Arc<StockMetrics>,
    poll_wait: Duration,
}

impl DrainController {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        decoder: Box<dyn BatchDecoder>,
        aggregator: Aggregator,
        dispatcher: AlertDispatcher,
        metrics: Arc<StockMetrics>,
        poll_wait: Duration,
    ) -> Self {
        Self { queue, decoder, aggregator, dispatcher, metrics, poll_wait }
    }

    /// Runs one pass to DRAINED. The dispatcher is reused across passes, so
    /// repeat suppression (when enabled) survives between them.
    pub async fn run(&mut self, deadline: Option<Instant>) -> CompletionSummary {
        let start_time = Utc::now();
        let started = Instant::now();
        let mut tally = PassTally::default();
        let mut state = DrainState::Polling;

        loop {
            state = match state {
                DrainState::Polling => self.poll(deadline, &mut tally).await,
                DrainState::Processing(item) => self.process(item, &mut tally).await,
                DrainState::Acknowledging(item, results) => {
                    self.acknowledge(item, results, &mut tally).await
                }
                DrainState::Drained => break,
            };
        }

        let flushed = self.dispatcher.flush().await;
        let end_time = Utc::now();
        self.metrics.drain_duration_seconds.observe(started.elapsed().as_secs_f64());

        let summary = CompletionSummary {
            start_time,
            end_time,
            duration_ms: (end_time - start_time).num_milliseconds(),
            processed_count: tally.processed_ids.len(),
            processed_ids: tally.processed_ids,
            failed_count: tally.failed_count,
            alerts_sent: flushed.sent,
            alerts_failed: flushed.failed,
            deadline_reached: tally.deadline_reached,
        };
        match serde_json::to_string(&summary) {
            Ok(json) => info!(summary = %json, "Drain pass complete"),
            Err(err) => warn!(
                ?err,
                processed = summary.processed_count,
                "Drain pass complete; summary not serializable"
            ),
        }
        summary
    }

    async fn poll(&self, deadline: Option<Instant>, tally: &mut PassTally) -> DrainState {
        let wait = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    info!("Drain deadline reached; no further polling");
                    tally.deadline_reached = true;
                    return DrainState::Drained;
                }
                remaining.min(self.poll_wait)
            }
            None => self.poll_wait,
        };

        match self.queue.poll(wait).await {
            Ok(Some(item)) => {
                debug!(work_item = %item.id, deliveries = item.deliveries, "Work item received");
                DrainState::Processing(item)
            }
            Ok(None) => {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    tally.deadline_reached = true;
                }
                info!(wait_ms = wait.as_millis() as u64, "Queue empty; drained");
                DrainState::Drained
            }
            Err(err) => {
                error!(?err, "Queue poll failed; ending drain pass");
                DrainState::Drained
            }
        }
    }

    async fn process(&self, item: WorkItem, tally: &mut PassTally) -> DrainState {
        match self.aggregate(&item).await {
            Ok(results) => DrainState::Acknowledging(item, results),
            Err(err) => {
                warn!(
                    work_item = %item.id,
                    deliveries = item.deliveries,
                    reason = err.reason(),
                    error = %err,
                    "Work item aborted; left for redelivery"
                );
                self.metrics.record_failed_item(err.reason());
                tally.failed_count += 1;
                match self.queue.release(&item).await {
                    Ok(()) => DrainState::Polling,
                    Err(err) => {
                        // Later acknowledgments could commit past the unreleased item.
                        error!(
                            ?err,
                            work_item = %item.id,
                            "Failed to release aborted work item; ending drain pass"
                        );
                        self.metrics.record_failed_item("release");
                        DrainState::Drained
                    }
                }
            }
        }
    }

    /// The batch is decoded in full before anything is applied, so a
    /// malformed batch leaves the ledger untouched. Records applied before a
    /// check or store failure stay applied.
    async fn aggregate(
        &self,
        item: &WorkItem,
    ) -> Result<Vec<AggregationResult>, ProcessingError> {
        let records = self.decoder.decode(&item.payload)?;
        let mut results = Vec::with_capacity(records.len());
        for record in &records {
            results.push(self.aggregator.process_record(record).await?);
        }
        Ok(results)
    }

    async fn acknowledge(
        &mut self,
        item: WorkItem,
        results: Vec<AggregationResult>,
        tally: &mut PassTally,
    ) -> DrainState {
        match self.queue.acknowledge(&item.receipt).await {
            Ok(()) => {
                self.metrics.work_items_acked.inc();
                info!(work_item = %item.id, records = results.len(), "Work item acknowledged");
                for result in &results {
                    self.dispatcher.collect(result);
                }
                tally.processed_ids.push(item.id);
            }
            Err(err) => {
                error!(
                    ?err,
                    work_item = %item.id,
                    "Acknowledge failed; work item will be redelivered"
                );
                self.metrics.record_failed_item("acknowledge");
                tally.failed_count += 1;
            }
        }
        DrainState::Polling
    }
}
