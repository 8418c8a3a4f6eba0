//! Stock ledger: drains inventory transaction batches from a work queue into
//! per-(item, warehouse) stock levels and alerts when an item drops below its
//! restock limit.

pub mod aggregator;
pub mod app;
pub mod config;
pub mod decoder;
pub mod dispatcher;
pub mod drain;
pub mod error;
#[cfg(feature = "kafka-producer")]
pub mod kafka;
pub mod ledger;
pub mod model;
pub mod pg_store;
pub mod queue;
pub mod restock_check;
pub mod thresholds;

pub use aggregator::{Aggregator, NoopCheck, RecordCheck};
pub use app::{router, AppState};
pub use config::StockConfig;
pub use decoder::{BatchDecoder, CsvBatchDecoder, JsonBatchDecoder, PayloadFormat};
pub use dispatcher::{
    AlertDispatcher, AlertPolicy, LogSink, NotificationSink, WebhookSink, ALERT_SUBJECT,
};
pub use drain::{DrainController, DrainState};
pub use error::{DecodeError, DispatchError, PersistenceError, ProcessingError, QueueError};
pub use ledger::{InMemoryLedger, LedgerStore};
pub use model::*;
pub use queue::{InMemoryQueue, WorkQueue};
pub use restock_check::{KeyCheck, RestockChecker};
pub use thresholds::{
    InMemoryThresholds, ThresholdIngest, ThresholdStore, ThresholdUpdate, ThresholdUpdateBatch,
};
