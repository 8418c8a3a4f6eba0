#![allow(dead_code)]

use async_trait::async_trait;
use common_observability::StockMetrics;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stock_ledger_service::{
    Aggregator, AlertDispatcher, AlertPolicy, CsvBatchDecoder, DispatchError, DrainController,
    InMemoryLedger, InMemoryQueue, InMemoryThresholds, NotificationSink, QueueError, ReceiptToken,
    RecordCheck, TransactionRecord, WorkItem, WorkQueue,
};
use tokio::sync::Mutex;

pub const HEADER: &str = "Timestamp;WarehouseName;ItemId;ItemName;StockLevelChange";

/// Builds a semicolon CSV batch from (item, warehouse, delta) rows.
pub fn csv_batch(rows: &[(&str, &str, i64)]) -> Vec<u8> {
    let mut out = String::from(HEADER);
    out.push('\n');
    for (i, (item, warehouse, delta)) in rows.iter().enumerate() {
        let minute = i % 60;
        out.push_str(&format!(
            "2024-05-02T08:{minute:02}:00+00:00;{warehouse};{item};Item {item};{delta}\n"
        ));
    }
    out.into_bytes()
}

#[derive(Default)]
pub struct CaptureSink {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail: AtomicBool,
}

impl CaptureSink {
    pub fn failing() -> Self {
        Self { sent: Mutex::new(Vec::new()), fail: AtomicBool::new(true) }
    }

    pub async fn bodies(&self) -> Vec<String> {
        self.sent.lock().await.iter().map(|(_, body)| body.clone()).collect()
    }
}

#[async_trait]
impl NotificationSink for CaptureSink {
    async fn send(&self, subject: &str, body: &str) -> Result<(), DispatchError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DispatchError::Transport("sink offline".into()));
        }
        self.sent.lock().await.push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

/// Wraps a queue and counts calls. Acknowledge can be switched to fail.
pub struct CountingQueue {
    pub inner: Arc<InMemoryQueue>,
    pub polls: AtomicUsize,
    pub acks: AtomicUsize,
    pub fail_acknowledge: AtomicBool,
}

impl CountingQueue {
    pub fn new(inner: Arc<InMemoryQueue>) -> Self {
        Self {
            inner,
            polls: AtomicUsize::new(0),
            acks: AtomicUsize::new(0),
            fail_acknowledge: AtomicBool::new(false),
        }
    }

    pub fn rejecting_acks(inner: Arc<InMemoryQueue>) -> Self {
        let queue = Self::new(inner);
        queue.fail_acknowledge.store(true, Ordering::SeqCst);
        queue
    }
}

#[async_trait]
impl WorkQueue for CountingQueue {
    async fn poll(&self, max_wait: Duration) -> Result<Option<WorkItem>, QueueError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.inner.poll(max_wait).await
    }

    async fn acknowledge(&self, receipt: &ReceiptToken) -> Result<(), QueueError> {
        self.acks.fetch_add(1, Ordering::SeqCst);
        if self.fail_acknowledge.load(Ordering::SeqCst) {
            return Err(QueueError::Acknowledge {
                receipt: receipt.0.clone(),
                reason: "commit timed out".into(),
            });
        }
        self.inner.acknowledge(receipt).await
    }
}

pub struct Harness {
    pub queue: Arc<InMemoryQueue>,
    pub ledger: Arc<InMemoryLedger>,
    pub thresholds: Arc<InMemoryThresholds>,
    pub sink: Arc<CaptureSink>,
    pub metrics: Arc<StockMetrics>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_sink(CaptureSink::default())
    }

    pub fn with_sink(sink: CaptureSink) -> Self {
        Self {
            queue: Arc::new(InMemoryQueue::new(Duration::from_secs(30))),
            ledger: Arc::new(InMemoryLedger::new()),
            thresholds: Arc::new(InMemoryThresholds::new()),
            sink: Arc::new(sink),
            metrics: Arc::new(StockMetrics::new().expect("metrics")),
        }
    }

    pub fn aggregator(&self) -> Aggregator {
        Aggregator::new(self.ledger.clone(), self.thresholds.clone(), self.metrics.clone())
    }

    pub fn controller_with(
        &self,
        queue: Arc<dyn WorkQueue>,
        aggregator: Aggregator,
        policy: AlertPolicy,
    ) -> DrainController {
        let dispatcher = AlertDispatcher::new(self.sink.clone(), self.metrics.clone(), policy);
        DrainController::new(
            queue,
            Box::new(CsvBatchDecoder),
            aggregator,
            dispatcher,
            self.metrics.clone(),
            Duration::from_secs(1),
        )
    }

    pub fn controller(&self) -> DrainController {
        self.controller_with(self.queue.clone(), self.aggregator(), AlertPolicy::default())
    }
}

/// Rejects the first record with the given delta, then lets everything through.
pub struct RejectOnce {
    pub delta: i64,
    pub tripped: AtomicBool,
}

impl RejectOnce {
    pub fn new(delta: i64) -> Self {
        Self { delta, tripped: AtomicBool::new(false) }
    }
}

#[async_trait]
impl RecordCheck for RejectOnce {
    async fn check(&self, record: &TransactionRecord) -> Result<(), String> {
        if record.delta == self.delta && !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(format!("check failed for delta {}", record.delta));
        }
        Ok(())
    }
}
