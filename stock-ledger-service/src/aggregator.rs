use crate::error::ProcessingError;
use crate::ledger::LedgerStore;
use crate::model::{AggregationResult, TransactionRecord};
use crate::thresholds::ThresholdStore;
use async_trait::async_trait;
use chrono::Utc;
use common_observability::StockMetrics;
use std::sync::Arc;
use tracing::debug;

/// Per-record inspection run before the delta is applied. A rejection
/// aborts the surrounding work item.
#[async_trait]
pub trait RecordCheck: Send + Sync {
    async fn check(&self, record: &TransactionRecord) -> Result<(), String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCheck;

#[async_trait]
impl RecordCheck for NoopCheck {
    async fn check(&self, _record: &TransactionRecord) -> Result<(), String> {
        Ok(())
    }
}

/// Applies records to the ledger and evaluates the item's restock limit.
///
/// Duplicate records are not detected here: redelivery safety comes from the
/// drain loop only acknowledging fully processed work items.
#[derive(Clone)]
pub struct Aggregator {
    ledger: Arc<dyn LedgerStore>,
    thresholds: Arc<dyn ThresholdStore>,
    check: Arc<dyn RecordCheck>,
    metrics: Arc<StockMetrics>,
}

impl Aggregator {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        thresholds: Arc<dyn ThresholdStore>,
        metrics: Arc<StockMetrics>,
    ) -> Self {
        Self { ledger, thresholds, check: Arc::new(NoopCheck), metrics }
    }

    pub fn with_check(mut self, check: Arc<dyn RecordCheck>) -> Self {
        self.check = check;
        self
    }

    pub async fn process_record(
        &self,
        record: &TransactionRecord,
    ) -> Result<AggregationResult, ProcessingError> {
        self.check.check(record).await.map_err(|reason| ProcessingError::CheckRejected {
            item_id: record.item_id.clone(),
            warehouse: record.warehouse.clone(),
            reason,
        })?;

        let applied = self.ledger.apply(&record.key(), record.delta, Utc::now()).await?;
        self.metrics.records_applied.inc();

        let limit = self.thresholds.get(&record.item_id).await?;
        let limit_crossed = limit.is_some_and(|l| applied.level < l);
        debug!(
            item_id = %record.item_id,
            warehouse = %record.warehouse,
            delta = record.delta,
            level = applied.level,
            ?limit,
            limit_crossed,
            "Record applied"
        );

        Ok(AggregationResult {
            item_id: record.item_id.clone(),
            item_name: record.item_name.clone(),
            warehouse: record.warehouse.clone(),
            level: applied.level,
            limit,
            limit_crossed,
        })
    }
}
