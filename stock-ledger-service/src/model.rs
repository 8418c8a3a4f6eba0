use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One inventory movement as exported by the warehouse systems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "WarehouseName")]
    pub warehouse: String,
    #[serde(rename = "ItemId")]
    pub item_id: String,
    #[serde(rename = "ItemName")]
    pub item_name: String,
    #[serde(rename = "StockLevelChange")]
    pub delta: i64,
}

impl TransactionRecord {
    pub fn key(&self) -> StockKey {
        StockKey::new(&self.item_id, &self.warehouse)
    }
}

/// Composite ledger key. Ordering is (item_id, warehouse).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub item_id: String,
    pub warehouse: String,
}

impl StockKey {
    pub fn new(item_id: impl Into<String>, warehouse: impl Into<String>) -> Self {
        Self { item_id: item_id.into(), warehouse: warehouse.into() }
    }
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.item_id, self.warehouse)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StockLevel {
    pub item_id: String,
    pub warehouse: String,
    pub level: i64,
    pub last_applied: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RestockThreshold {
    pub item_id: String,
    #[sqlx(rename = "restock_if_below")]
    pub limit: i64,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of applying one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationResult {
    pub item_id: String,
    pub item_name: String,
    pub warehouse: String,
    pub level: i64,
    pub limit: Option<i64>,
    pub limit_crossed: bool,
}

impl AggregationResult {
    pub fn key(&self) -> StockKey {
        StockKey::new(&self.item_id, &self.warehouse)
    }
}

/// Opaque acknowledgment handle handed out by a [`crate::queue::WorkQueue`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptToken(pub String);

impl fmt::Display for ReceiptToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Stable identity reported in the completion summary.
    pub id: String,
    pub receipt: ReceiptToken,
    /// Raw batch, decoded during processing.
    pub payload: Vec<u8>,
    /// 1 on first delivery.
    pub deliveries: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionSummary {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub processed_count: usize,
    pub processed_ids: Vec<String>,
    pub failed_count: usize,
    pub alerts_sent: usize,
    pub alerts_failed: usize,
    pub deadline_reached: bool,
}
