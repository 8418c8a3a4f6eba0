use crate::error::{DecodeError, PersistenceError};
use crate::model::RestockThreshold;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_observability::StockMetrics;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Restock limit per item. Last write wins; no merging.
#[async_trait]
pub trait ThresholdStore: Send + Sync {
    async fn upsert(
        &self,
        item_id: &str,
        limit: i64,
        updated_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;

    async fn get(&self, item_id: &str) -> Result<Option<i64>, PersistenceError>;
}

/// One map lock is enough here. Each write replaces a whole entry, and no
/// guard is held across an `.await`.
#[derive(Default)]
pub struct InMemoryThresholds {
    limits: RwLock<HashMap<String, RestockThreshold>>,
}

impl InMemoryThresholds {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entry(&self, item_id: &str) -> Option<RestockThreshold> {
        self.limits.read().await.get(item_id).cloned()
    }
}

#[async_trait]
impl ThresholdStore for InMemoryThresholds {
    async fn upsert(
        &self,
        item_id: &str,
        limit: i64,
        updated_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        self.limits.write().await.insert(
            item_id.to_string(),
            RestockThreshold { item_id: item_id.to_string(), limit, updated_at },
        );
        Ok(())
    }

    async fn get(&self, item_id: &str) -> Result<Option<i64>, PersistenceError> {
        Ok(self.limits.read().await.get(item_id).map(|t| t.limit))
    }
}

/// `{"ThresholdList": [{"ItemId": "...", "RestockIfBelow": 12}, ...]}`
#[derive(Debug, Deserialize)]
pub struct ThresholdUpdateBatch {
    #[serde(rename = "ThresholdList")]
    pub thresholds: Vec<ThresholdUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThresholdUpdate {
    #[serde(rename = "ItemId")]
    pub item_id: String,
    #[serde(rename = "RestockIfBelow")]
    pub limit: i64,
}

impl ThresholdUpdateBatch {
    pub fn from_slice(payload: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(payload).map_err(|e| DecodeError::Json(e.to_string()))
    }
}

/// Writes threshold batches into a [`ThresholdStore`].
#[derive(Clone)]
pub struct ThresholdIngest {
    store: Arc<dyn ThresholdStore>,
    metrics: Arc<StockMetrics>,
}

impl ThresholdIngest {
    pub fn new(store: Arc<dyn ThresholdStore>, metrics: Arc<StockMetrics>) -> Self {
        Self { store, metrics }
    }

    /// Upserts every entry in payload order and returns the distinct item ids
    /// touched, in first-seen order. A failure stops the batch; entries
    /// already written stay written.
    pub async fn ingest(
        &self,
        batch: &ThresholdUpdateBatch,
    ) -> Result<Vec<String>, PersistenceError> {
        let now = Utc::now();
        let mut touched: Vec<String> = Vec::new();
        for update in &batch.thresholds {
            self.store.upsert(&update.item_id, update.limit, now).await?;
            self.metrics.thresholds_upserted.inc();
            if !touched.contains(&update.item_id) {
                touched.push(update.item_id.clone());
            }
        }
        info!(count = batch.thresholds.len(), items = touched.len(), "Restock thresholds updated");
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_is_last_write_wins() {
        let store = InMemoryThresholds::new();
        store.upsert("X", 5, Utc::now()).await.unwrap();
        store.upsert("X", 9, Utc::now()).await.unwrap();
        assert_eq!(store.get("X").await.unwrap(), Some(9));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_upserts_and_reads_see_whole_entries() {
        let store = Arc::new(InMemoryThresholds::new());
        let mut tasks = Vec::new();
        for writer in 0..4i64 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                for round in 0..200i64 {
                    let item = format!("I{}", round % 5);
                    store.upsert(&item, writer * 1_000 + round, Utc::now()).await.unwrap();
                    if let Some(entry) = store.entry(&item).await {
                        assert_eq!(entry.item_id, item);
                        assert!(entry.limit % 1_000 < 200);
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        for i in 0..5 {
            let limit = store.get(&format!("I{i}")).await.unwrap().expect("written");
            assert_eq!(limit % 5, i);
        }
    }

    #[tokio::test]
    async fn missing_item_has_no_limit() {
        let store = InMemoryThresholds::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[test]
    fn batch_payload_decodes() {
        let payload = br#"{"ThresholdList":[
            {"ItemId":"a1","RestockIfBelow":12},
            {"ItemId":"b2","RestockIfBelow":5}
        ]}"#;
        let batch = ThresholdUpdateBatch::from_slice(payload).unwrap();
        assert_eq!(batch.thresholds.len(), 2);
        assert_eq!(batch.thresholds[0], ThresholdUpdate { item_id: "a1".into(), limit: 12 });
    }

    #[test]
    fn batch_without_list_is_rejected() {
        let err = ThresholdUpdateBatch::from_slice(br#"{"Thresholds":[]}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[tokio::test]
    async fn ingest_applies_duplicates_in_order() {
        let store = Arc::new(InMemoryThresholds::new());
        let metrics = Arc::new(StockMetrics::new().unwrap());
        let ingest = ThresholdIngest::new(store.clone(), metrics.clone());
        let batch = ThresholdUpdateBatch {
            thresholds: vec![
                ThresholdUpdate { item_id: "X".into(), limit: 5 },
                ThresholdUpdate { item_id: "Y".into(), limit: 7 },
                ThresholdUpdate { item_id: "X".into(), limit: 9 },
            ],
        };
        let touched = ingest.ingest(&batch).await.unwrap();
        assert_eq!(touched, vec!["X".to_string(), "Y".to_string()]);
        assert_eq!(store.get("X").await.unwrap(), Some(9));
        assert_eq!(metrics.thresholds_upserted.get(), 3);
    }
}
