//! Kafka adapters: the work topic as a [`WorkQueue`] and the low-stock topic
//! as a [`NotificationSink`].
//!
//! Offsets are committed manually, one per acknowledged work item. The drain
//! loop handles a single item at a time, so the committed offset never moves
//! past an item that was neither acknowledged nor released. Releasing
//! republishes the payload with a bumped delivery count; after
//! `max_deliveries` it goes to `<topic>.dlq` instead. When the republish
//! fails the consumer is rewound to the item's offset and the error is
//! returned, so the item is read again rather than committed past.

use crate::dispatcher::NotificationSink;
use crate::error::{DispatchError, QueueError};
use crate::model::{ReceiptToken, WorkItem};
use crate::queue::WorkQueue;
use async_trait::async_trait;
use chrono::Utc;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use std::time::Duration;
use tracing::{debug, error, warn};

const DELIVERIES_HEADER: &str = "x-stock-deliveries";
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

pub fn producer(bootstrap: &str) -> anyhow::Result<FutureProducer> {
    let producer = ClientConfig::new()
        .set("bootstrap.servers", bootstrap)
        .create()?;
    Ok(producer)
}

pub struct KafkaWorkQueue {
    consumer: StreamConsumer,
    producer: FutureProducer,
    topic: String,
    dead_letter_topic: String,
    max_deliveries: u32,
}

impl KafkaWorkQueue {
    pub fn connect(
        bootstrap: &str,
        group: &str,
        topic: &str,
        producer: FutureProducer,
        max_deliveries: u32,
    ) -> anyhow::Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        consumer.subscribe(&[topic])?;
        Ok(Self {
            consumer,
            producer,
            topic: topic.to_string(),
            dead_letter_topic: format!("{topic}.dlq"),
            max_deliveries,
        })
    }

    async fn publish(
        &self,
        topic: &str,
        item: &WorkItem,
        deliveries: u32,
    ) -> Result<(), QueueError> {
        let count = deliveries.to_string();
        let headers =
            OwnedHeaders::new().insert(Header { key: DELIVERIES_HEADER, value: Some(&count) });
        self.producer
            .send(
                FutureRecord::to(topic)
                    .payload(item.payload.as_slice())
                    .key(item.id.as_str())
                    .headers(headers),
                SEND_TIMEOUT,
            )
            .await
            .map(|_| ())
            .map_err(|(err, _)| {
                release_error(&item.receipt, format!("republish to {topic} failed: {err}"))
            })
    }

    /// Moves the consumer back onto the item so the next poll returns it.
    fn rewind(&self, receipt: &ReceiptToken) -> Result<(), QueueError> {
        let (topic, partition, offset) = decode_receipt(receipt)
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.0.clone()))?;
        self.consumer
            .seek(topic, partition, Offset::Offset(offset), SEND_TIMEOUT)
            .map_err(|e| release_error(receipt, format!("seek back failed: {e}")))
    }
}

fn ack_error(receipt: &ReceiptToken, reason: impl ToString) -> QueueError {
    QueueError::Acknowledge { receipt: receipt.0.clone(), reason: reason.to_string() }
}

fn release_error(receipt: &ReceiptToken, reason: impl ToString) -> QueueError {
    QueueError::Release { receipt: receipt.0.clone(), reason: reason.to_string() }
}

fn encode_receipt(topic: &str, partition: i32, offset: i64) -> ReceiptToken {
    ReceiptToken(format!("{topic}:{partition}:{offset}"))
}

fn decode_receipt(receipt: &ReceiptToken) -> Option<(&str, i32, i64)> {
    let mut parts = receipt.0.rsplitn(3, ':');
    let offset = parts.next()?.parse().ok()?;
    let partition = parts.next()?.parse().ok()?;
    let topic = parts.next()?;
    Some((topic, partition, offset))
}

#[async_trait]
impl WorkQueue for KafkaWorkQueue {
    async fn poll(&self, max_wait: Duration) -> Result<Option<WorkItem>, QueueError> {
        let message = match tokio::time::timeout(max_wait, self.consumer.recv()).await {
            Err(_) => return Ok(None),
            Ok(Err(err)) => return Err(QueueError::Poll(err.to_string())),
            Ok(Ok(message)) => message,
        };
        let deliveries = message
            .headers()
            .and_then(|headers| {
                headers
                    .iter()
                    .find(|h| h.key == DELIVERIES_HEADER)
                    .and_then(|h| h.value)
                    .and_then(|v| std::str::from_utf8(v).ok())
                    .and_then(|v| v.parse::<u32>().ok())
            })
            .unwrap_or(0)
            + 1;
        let id = match message.key().map(String::from_utf8_lossy) {
            Some(key) if !key.is_empty() => key.into_owned(),
            _ => format!("{}/{}/{}", message.topic(), message.partition(), message.offset()),
        };
        Ok(Some(WorkItem {
            id,
            receipt: encode_receipt(message.topic(), message.partition(), message.offset()),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            deliveries,
        }))
    }

    async fn acknowledge(&self, receipt: &ReceiptToken) -> Result<(), QueueError> {
        let (topic, partition, offset) = decode_receipt(receipt)
            .ok_or_else(|| QueueError::UnknownReceipt(receipt.0.clone()))?;
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| ack_error(receipt, e))?;
        self.consumer.commit(&tpl, CommitMode::Sync).map_err(|e| ack_error(receipt, e))
    }

    async fn release(&self, item: &WorkItem) -> Result<(), QueueError> {
        let target = if item.deliveries >= self.max_deliveries {
            warn!(
                work_item = %item.id,
                deliveries = item.deliveries,
                topic = %self.dead_letter_topic,
                "Delivery limit reached; dead-lettering work item"
            );
            &self.dead_letter_topic
        } else {
            debug!(
                work_item = %item.id,
                deliveries = item.deliveries,
                "Requeueing aborted work item"
            );
            &self.topic
        };
        if let Err(err) = self.publish(target, item, item.deliveries).await {
            if let Err(seek_err) = self.rewind(&item.receipt) {
                error!(?seek_err, work_item = %item.id, "Could not rewind consumer");
            }
            return Err(err);
        }
        self.acknowledge(&item.receipt).await
    }
}

/// Publishes restock notifications as JSON to the low-stock topic.
pub struct KafkaAlertSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaAlertSink {
    pub fn new(producer: FutureProducer, topic: impl Into<String>) -> Self {
        Self { producer, topic: topic.into() }
    }
}

#[async_trait]
impl NotificationSink for KafkaAlertSink {
    async fn send(&self, subject: &str, body: &str) -> Result<(), DispatchError> {
        let alert = serde_json::json!({
            "subject": subject,
            "body": body,
            "emitted_at": Utc::now(),
        });
        self.producer
            .send(
                FutureRecord::to(&self.topic)
                    .payload(&alert.to_string())
                    .key(subject),
                Duration::from_secs(0),
            )
            .await
            .map(|_| ())
            .map_err(|(err, _)| DispatchError::Transport(err.to_string()))
    }
}
