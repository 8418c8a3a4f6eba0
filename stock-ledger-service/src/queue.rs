use crate::error::QueueError;
use crate::model::{ReceiptToken, WorkItem};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep_until, Instant};
use tracing::debug;
use uuid::Uuid;

/// At-least-once work source. No ordering guarantee across work items.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Wait up to `max_wait` for one work item.
    async fn poll(&self, max_wait: Duration) -> Result<Option<WorkItem>, QueueError>;

    /// Delete a delivered item. Only the receipt from the latest delivery is valid.
    async fn acknowledge(&self, receipt: &ReceiptToken) -> Result<(), QueueError>;

    /// Called when processing of `item` was aborted. Queues with a visibility
    /// timeout need nothing here; log-based queues use it to schedule the
    /// redelivery before moving past the item.
    async fn release(&self, _item: &WorkItem) -> Result<(), QueueError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Message {
    id: String,
    payload: Vec<u8>,
    deliveries: u32,
}

#[derive(Debug)]
struct InFlight {
    message: Message,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Message>,
    in_flight: HashMap<String, InFlight>,
}

impl QueueState {
    /// Moves every in-flight message whose visibility timeout passed back to
    /// the ready queue.
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some(flight) = self.in_flight.remove(&receipt) {
                debug!(
                    work_item = %flight.message.id,
                    "Visibility timeout expired; item redeliverable"
                );
                self.ready.push_back(flight.message);
            }
        }
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.in_flight.values().map(|f| f.visible_at).min()
    }
}

/// Process-local queue with a visibility timeout: a delivered item stays
/// hidden until acknowledged or until the timeout expires, after which it is
/// delivered again under a new receipt.
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    visibility_timeout: Duration,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self { state: Mutex::new(QueueState::default()), notify: Notify::new(), visibility_timeout }
    }

    /// Enqueue a raw batch under a generated id.
    pub async fn enqueue(&self, payload: Vec<u8>) -> String {
        let id = Uuid::new_v4().to_string();
        self.enqueue_with_id(id.clone(), payload).await;
        id
    }

    pub async fn enqueue_with_id(&self, id: impl Into<String>, payload: Vec<u8>) {
        self.state
            .lock()
            .await
            .ready
            .push_back(Message { id: id.into(), payload, deliveries: 0 });
        self.notify.notify_waiters();
    }

    /// Items currently visible to `poll`.
    pub async fn visible_len(&self) -> usize {
        let mut state = self.state.lock().await;
        state.reclaim_expired(Instant::now());
        state.ready.len()
    }

    pub async fn in_flight_len(&self) -> usize {
        let mut state = self.state.lock().await;
        state.reclaim_expired(Instant::now());
        state.in_flight.len()
    }

    /// How many times the item with `id` has been handed out, if still queued.
    pub async fn deliveries(&self, id: &str) -> Option<u32> {
        let state = self.state.lock().await;
        state
            .ready
            .iter()
            .chain(state.in_flight.values().map(|f| &f.message))
            .find(|m| m.id == id)
            .map(|m| m.deliveries)
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn poll(&self, max_wait: Duration) -> Result<Option<WorkItem>, QueueError> {
        let deadline = Instant::now() + max_wait;
        loop {
            let notified = self.notify.notified();
            let wake_at = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.reclaim_expired(now);
                if let Some(mut message) = state.ready.pop_front() {
                    message.deliveries += 1;
                    let receipt = Uuid::new_v4().to_string();
                    let item = WorkItem {
                        id: message.id.clone(),
                        receipt: ReceiptToken(receipt.clone()),
                        payload: message.payload.clone(),
                        deliveries: message.deliveries,
                    };
                    state.in_flight.insert(
                        receipt,
                        InFlight { message, visible_at: now + self.visibility_timeout },
                    );
                    return Ok(Some(item));
                }
                if now >= deadline {
                    return Ok(None);
                }
                state.next_expiry().map_or(deadline, |expiry| expiry.min(deadline))
            };
            tokio::select! {
                _ = notified => {}
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    async fn acknowledge(&self, receipt: &ReceiptToken) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        match state.in_flight.remove(&receipt.0) {
            Some(flight) => {
                debug!(
                    work_item = %flight.message.id,
                    deliveries = flight.message.deliveries,
                    "Work item deleted"
                );
                Ok(())
            }
            None => Err(QueueError::UnknownReceipt(receipt.0.clone())),
        }
    }
}
