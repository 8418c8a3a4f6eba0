use crate::dispatcher::{NotificationSink, ALERT_SUBJECT};
use crate::error::PersistenceError;
use crate::ledger::LedgerStore;
use crate::model::StockKey;
use crate::thresholds::ThresholdStore;
use chrono::{NaiveDate, Utc};
use common_observability::StockMetrics;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// An item with at least one warehouse below its restock limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BelowLimit {
    pub item_id: String,
    pub limit: i64,
    /// (warehouse, level), sorted by warehouse.
    pub warehouses: Vec<(String, i64)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestockReport {
    pub below_limit: Vec<BelowLimit>,
    pub notified: bool,
}

/// Outcome of checking a single (item, warehouse).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KeyCheck {
    Below { level: i64, limit: i64, notified: bool },
    Sufficient { level: i64, limit: i64 },
    NoLimit { level: i64 },
}

/// Re-evaluates ledger levels against restock limits outside the drain loop.
#[derive(Clone)]
pub struct RestockChecker {
    ledger: Arc<dyn LedgerStore>,
    thresholds: Arc<dyn ThresholdStore>,
    sink: Arc<dyn NotificationSink>,
    metrics: Arc<StockMetrics>,
}

impl RestockChecker {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        thresholds: Arc<dyn ThresholdStore>,
        sink: Arc<dyn NotificationSink>,
        metrics: Arc<StockMetrics>,
    ) -> Self {
        Self { ledger, thresholds, sink, metrics }
    }

    /// Items among `item_ids` that have a limit and at least one warehouse
    /// strictly below it. Order follows `item_ids`.
    pub async fn below_limit(
        &self,
        item_ids: &[String],
    ) -> Result<Vec<BelowLimit>, PersistenceError> {
        let mut found = Vec::new();
        for item_id in item_ids {
            let Some(limit) = self.thresholds.get(item_id).await? else { continue };
            let warehouses: Vec<(String, i64)> = self
                .ledger
                .levels_for_item(item_id)
                .await?
                .into_iter()
                .filter(|l| l.level < limit)
                .map(|l| (l.warehouse, l.level))
                .collect();
            if !warehouses.is_empty() {
                found.push(BelowLimit { item_id: item_id.clone(), limit, warehouses });
            }
        }
        Ok(found)
    }

    /// Sends one consolidated notification covering every updated item that
    /// is now below its new limit. A send failure is logged, not returned.
    pub async fn notify_after_update(
        &self,
        item_ids: &[String],
    ) -> Result<RestockReport, PersistenceError> {
        let below_limit = self.below_limit(item_ids).await?;
        if below_limit.is_empty() {
            info!(items = item_ids.len(), "No updated item below its restock limit");
            return Ok(RestockReport::default());
        }
        let body = render_update_notice(Utc::now().date_naive(), &below_limit);
        let notified = self.send(&body).await;
        Ok(RestockReport { below_limit, notified })
    }

    pub async fn check_item(
        &self,
        item_id: &str,
        warehouse: &str,
    ) -> Result<KeyCheck, PersistenceError> {
        let level = self.ledger.get(&StockKey::new(item_id, warehouse)).await?;
        let Some(limit) = self.thresholds.get(item_id).await? else {
            return Ok(KeyCheck::NoLimit { level });
        };
        if level >= limit {
            info!(item_id, warehouse, level, limit, "Stock level not below restock limit");
            return Ok(KeyCheck::Sufficient { level, limit });
        }
        let body = format!(
            "Dear Manager,\n\nThe quantity of item {item_id} in {warehouse} ({level}) is below the restock limit ({limit}).\n\nThis is an automated message."
        );
        let notified = self.send(&body).await;
        Ok(KeyCheck::Below { level, limit, notified })
    }

    async fn send(&self, body: &str) -> bool {
        match self.sink.send(ALERT_SUBJECT, body).await {
            Ok(()) => {
                self.metrics.alerts_sent.inc();
                true
            }
            Err(err) => {
                self.metrics.alert_dispatch_failures.inc();
                warn!(?err, "Failed to send restock notification");
                false
            }
        }
    }
}

fn render_update_notice(date: NaiveDate, items: &[BelowLimit]) -> String {
    let mut body = format!(
        "Dear Manager,\n\nAfter the restock threshold update on {}, the following items have stock levels below the threshold and require your attention:\n",
        date.format("%Y/%m/%d")
    );
    for item in items {
        let levels: Vec<String> =
            item.warehouses.iter().map(|(w, l)| format!("{w}: {l}")).collect();
        body.push_str(&format!(
            "- Item ID: {} (limit {}; {})\n",
            item.item_id,
            item.limit,
            levels.join(", ")
        ));
    }
    body.push_str("\nThis is an automated message.");
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_notice_lists_every_item() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        let body = render_update_notice(
            date,
            &[
                BelowLimit {
                    item_id: "A".into(),
                    limit: 5,
                    warehouses: vec![("W1".into(), 2), ("W2".into(), 3)],
                },
                BelowLimit { item_id: "B".into(), limit: 1, warehouses: vec![("W1".into(), 0)] },
            ],
        );
        assert!(body.contains("update on 2024/03/07"), "{body}");
        assert!(body.contains("- Item ID: A (limit 5; W1: 2, W2: 3)"), "{body}");
        assert!(body.contains("- Item ID: B (limit 1; W1: 0)"), "{body}");
    }
}
