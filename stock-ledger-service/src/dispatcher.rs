use crate::error::DispatchError;
use crate::model::{AggregationResult, StockKey};
use async_trait::async_trait;
use common_observability::StockMetrics;
use reqwest::Client;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const ALERT_SUBJECT: &str = "Stock Alert";

/// Outbound channel for restock notifications. Fire-and-forget: the
/// dispatcher reports failures but never retries.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<(), DispatchError>;
}

/// Writes notifications to the service log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(&self, subject: &str, body: &str) -> Result<(), DispatchError> {
        info!(subject, body, "Restock notification");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    text: &'a str,
}

/// Posts `{"subject": .., "text": ..}` to an HTTP endpoint.
#[derive(Clone)]
pub struct WebhookSink {
    client: Client,
    url: String,
    bearer: Option<String>,
}

impl WebhookSink {
    pub fn new(client: Client, url: impl Into<String>, bearer: Option<String>) -> Self {
        Self { client, url: url.into(), bearer }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, subject: &str, body: &str) -> Result<(), DispatchError> {
        let mut req = self.client.post(&self.url).json(&WebhookPayload { subject, text: body });
        if let Some(token) = &self.bearer {
            req = req.bearer_auth(token);
        }
        let response = req
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DispatchError::Rejected(format!(
                "alert webhook returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertPolicy {
    /// Skip (item, warehouse) pairs already alerted in an earlier flush until
    /// they are seen at or above their limit again.
    pub suppress_repeats: bool,
}

/// One coalesced notification: every warehouse of an item below its limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemAlert {
    pub item_id: String,
    pub item_name: String,
    pub limit: i64,
    /// (warehouse, level), sorted by warehouse.
    pub warehouses: Vec<(String, i64)>,
}

impl ItemAlert {
    pub fn render(&self) -> String {
        let mut body = String::from("Dear Manager,\n\n");
        if self.item_name.is_empty() {
            body.push_str(&format!(
                "Item {} is below its restock limit ({}) in:\n",
                self.item_id, self.limit
            ));
        } else {
            body.push_str(&format!(
                "Item {} ({}) is below its restock limit ({}) in:\n",
                self.item_id, self.item_name, self.limit
            ));
        }
        for (warehouse, level) in &self.warehouses {
            body.push_str(&format!("- {warehouse}: {level}\n"));
        }
        body.push_str("\nThis is an automated message.");
        body
    }
}

#[derive(Debug, Default)]
struct PendingItem {
    item_name: String,
    limit: i64,
    warehouses: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub failed: usize,
}

/// Collects threshold crossings for one drain cycle and emits at most one
/// notification per item on flush.
pub struct AlertDispatcher {
    sink: Arc<dyn NotificationSink>,
    metrics: Arc<StockMetrics>,
    policy: AlertPolicy,
    pending: BTreeMap<String, PendingItem>,
    alerted: HashSet<StockKey>,
}

impl AlertDispatcher {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        metrics: Arc<StockMetrics>,
        policy: AlertPolicy,
    ) -> Self {
        Self { sink, metrics, policy, pending: BTreeMap::new(), alerted: HashSet::new() }
    }

    /// Feed every aggregation result; only crossings are kept. A later
    /// non-crossing result for the same key drops it from the pending set.
    pub fn collect(&mut self, result: &AggregationResult) {
        if !result.limit_crossed {
            if self.policy.suppress_repeats {
                self.alerted.remove(&result.key());
            }
            if let Some(item) = self.pending.get_mut(&result.item_id) {
                item.warehouses.remove(&result.warehouse);
                if item.warehouses.is_empty() {
                    self.pending.remove(&result.item_id);
                }
            }
            return;
        }
        let Some(limit) = result.limit else { return };
        if self.policy.suppress_repeats && self.alerted.contains(&result.key()) {
            debug!(
                item_id = %result.item_id,
                warehouse = %result.warehouse,
                "Crossing already alerted; suppressed"
            );
            return;
        }
        let item = self.pending.entry(result.item_id.clone()).or_default();
        if !result.item_name.is_empty() {
            item.item_name = result.item_name.clone();
        }
        item.limit = limit;
        item.warehouses.insert(result.warehouse.clone(), result.level);
    }

    pub fn pending_alerts(&self) -> Vec<ItemAlert> {
        self.pending
            .iter()
            .map(|(item_id, item)| ItemAlert {
                item_id: item_id.clone(),
                item_name: item.item_name.clone(),
                limit: item.limit,
                warehouses: item.warehouses.iter().map(|(w, l)| (w.clone(), *l)).collect(),
            })
            .collect()
    }

    /// Sends one notification per pending item, in item_id order, and clears
    /// the pending set. Nothing is sent when nothing was collected.
    pub async fn flush(&mut self) -> FlushReport {
        let alerts = self.pending_alerts();
        self.pending.clear();
        let mut report = FlushReport::default();
        for alert in alerts {
            let body = alert.render();
            match self.sink.send(ALERT_SUBJECT, &body).await {
                Ok(()) => {
                    report.sent += 1;
                    self.metrics.alerts_sent.inc();
                    info!(
                        item_id = %alert.item_id,
                        warehouses = alert.warehouses.len(),
                        limit = alert.limit,
                        "Restock alert sent"
                    );
                    if self.policy.suppress_repeats {
                        for (warehouse, _) in &alert.warehouses {
                            self.alerted.insert(StockKey::new(&alert.item_id, warehouse));
                        }
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    self.metrics.alert_dispatch_failures.inc();
                    warn!(?err, item_id = %alert.item_id, "Failed to send restock alert");
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct CaptureSink {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl NotificationSink for CaptureSink {
        async fn send(&self, subject: &str, body: &str) -> Result<(), DispatchError> {
            self.sent.lock().await.push((subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    fn crossing(item: &str, warehouse: &str, level: i64, limit: i64) -> AggregationResult {
        AggregationResult {
            item_id: item.into(),
            item_name: String::new(),
            warehouse: warehouse.into(),
            level,
            limit: Some(limit),
            limit_crossed: level < limit,
        }
    }

    fn dispatcher(sink: Arc<CaptureSink>, policy: AlertPolicy) -> AlertDispatcher {
        AlertDispatcher::new(sink, Arc::new(StockMetrics::new().unwrap()), policy)
    }

    #[tokio::test]
    async fn flush_without_crossings_sends_nothing() {
        let sink = Arc::new(CaptureSink::default());
        let mut d = dispatcher(sink.clone(), AlertPolicy::default());
        d.collect(&crossing("A", "W1", 9, 5));
        assert_eq!(d.flush().await, FlushReport { sent: 0, failed: 0 });
        assert!(sink.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn latest_level_wins_within_cycle() {
        let sink = Arc::new(CaptureSink::default());
        let mut d = dispatcher(sink, AlertPolicy::default());
        d.collect(&crossing("A", "W1", 3, 5));
        d.collect(&crossing("A", "W1", 1, 5));
        let alerts = d.pending_alerts();
        assert_eq!(alerts[0].warehouses, vec![("W1".to_string(), 1)]);
    }

    #[tokio::test]
    async fn recovery_within_cycle_drops_pending_key() {
        let sink = Arc::new(CaptureSink::default());
        let mut d = dispatcher(sink, AlertPolicy::default());
        d.collect(&crossing("A", "W1", 3, 5));
        d.collect(&crossing("A", "W1", 8, 5));
        assert!(d.pending_alerts().is_empty());
    }

    #[tokio::test]
    async fn warehouses_listed_in_name_order() {
        let sink = Arc::new(CaptureSink::default());
        let mut d = dispatcher(sink.clone(), AlertPolicy::default());
        d.collect(&crossing("A", "HANNOVER II", 1, 5));
        d.collect(&crossing("A", "BERLIN I", 2, 5));
        d.flush().await;
        let sent = sink.sent.lock().await;
        let body = &sent[0].1;
        let berlin = body.find("BERLIN I").unwrap();
        let hannover = body.find("HANNOVER II").unwrap();
        assert!(berlin < hannover, "{body}");
        assert_eq!(sent[0].0, ALERT_SUBJECT);
    }

    #[tokio::test]
    async fn repeat_suppression_rearms_after_recovery() {
        let sink = Arc::new(CaptureSink::default());
        let mut d = dispatcher(sink.clone(), AlertPolicy { suppress_repeats: true });
        d.collect(&crossing("A", "W1", 1, 5));
        assert_eq!(d.flush().await.sent, 1);

        d.collect(&crossing("A", "W1", 0, 5));
        assert_eq!(d.flush().await.sent, 0);

        d.collect(&crossing("A", "W1", 6, 5));
        d.collect(&crossing("A", "W1", 2, 5));
        assert_eq!(d.flush().await.sent, 1);
        assert_eq!(sink.sent.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn without_suppression_every_cycle_alerts() {
        let sink = Arc::new(CaptureSink::default());
        let mut d = dispatcher(sink, AlertPolicy::default());
        d.collect(&crossing("A", "W1", 1, 5));
        assert_eq!(d.flush().await.sent, 1);
        d.collect(&crossing("A", "W1", 0, 5));
        assert_eq!(d.flush().await.sent, 1);
    }

    #[test]
    fn render_names_item_and_limit() {
        let alert = ItemAlert {
            item_id: "4a27".into(),
            item_name: "Apple Watch Pro".into(),
            limit: 12,
            warehouses: vec![("HAMBURG I".into(), 3)],
        };
        let body = alert.render();
        let headline = "Item 4a27 (Apple Watch Pro) is below its restock limit (12)";
        assert!(body.contains(headline), "{body}");
        assert!(body.contains("- HAMBURG I: 3"), "{body}");
        assert!(body.ends_with("This is an automated message."));
    }
}
