use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Counters shared by the drain loop, the alert dispatcher and the HTTP intake.
#[derive(Clone)]
pub struct StockMetrics {
    pub registry: Registry,
    pub records_applied: IntCounter,
    pub work_items_acked: IntCounter,
    pub work_items_failed: IntCounterVec,
    pub alerts_sent: IntCounter,
    pub alert_dispatch_failures: IntCounter,
    pub thresholds_upserted: IntCounter,
    pub drain_duration_seconds: Histogram,
    pub http_errors_total: IntCounterVec,
}

impl StockMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let records_applied = IntCounter::new(
            "stock_records_applied_total",
            "Transaction records applied to the ledger",
        )?;
        let work_items_acked = IntCounter::new(
            "stock_work_items_acked_total",
            "Work items fully processed and acknowledged",
        )?;
        let work_items_failed = IntCounterVec::new(
            Opts::new(
                "stock_work_items_failed_total",
                "Work items left unacknowledged for redelivery",
            ),
            &["reason"],
        )?;
        let alerts_sent = IntCounter::new(
            "stock_alerts_sent_total",
            "Restock notifications delivered to the sink",
        )?;
        let alert_dispatch_failures = IntCounter::new(
            "stock_alert_dispatch_failures_total",
            "Restock notifications the sink rejected",
        )?;
        let thresholds_upserted = IntCounter::new(
            "stock_thresholds_upserted_total",
            "Restock thresholds written",
        )?;
        let drain_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "stock_drain_duration_seconds",
                "Wall time of one drain pass from first poll to completion summary",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        )?;
        let http_errors_total = IntCounterVec::new(
            Opts::new(
                "http_errors_total",
                "Count of HTTP error responses emitted (status >= 400)",
            ),
            &["service", "code", "status"],
        )?;
        registry.register(Box::new(records_applied.clone()))?;
        registry.register(Box::new(work_items_acked.clone()))?;
        registry.register(Box::new(work_items_failed.clone()))?;
        registry.register(Box::new(alerts_sent.clone()))?;
        registry.register(Box::new(alert_dispatch_failures.clone()))?;
        registry.register(Box::new(thresholds_upserted.clone()))?;
        registry.register(Box::new(drain_duration_seconds.clone()))?;
        registry.register(Box::new(http_errors_total.clone()))?;
        Ok(StockMetrics {
            registry,
            records_applied,
            work_items_acked,
            work_items_failed,
            alerts_sent,
            alert_dispatch_failures,
            thresholds_upserted,
            drain_duration_seconds,
            http_errors_total,
        })
    }

    pub fn record_failed_item(&self, reason: &str) {
        self.work_items_failed.with_label_values(&[reason]).inc();
    }

    /// Prometheus text exposition of every registered family.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).to_string())
    }
}
