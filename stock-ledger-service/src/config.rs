use crate::decoder::PayloadFormat;
use anyhow::{anyhow, Context, Result};
use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct StockConfig {
    pub database_url: Option<String>,
    pub kafka_bootstrap: Option<String>,
    pub work_topic: String,
    pub consumer_group: String,
    pub alert_topic: String,
    pub max_deliveries: u32,
    pub alert_webhook_url: Option<String>,
    pub alert_webhook_bearer: Option<String>,
    pub poll_wait_secs: u64,
    pub visibility_timeout_secs: u64,
    pub drain_interval_secs: u64,
    pub run_once: bool,
    pub drain_deadline_secs: Option<u64>,
    pub suppress_repeat_alerts: bool,
    pub payload_format: PayloadFormat,
    pub host: String,
    pub port: u16,
}

fn flag(name: &str) -> bool {
    env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn secs(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.parse::<u64>().ok())
}

impl StockConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        let kafka_bootstrap = env::var("KAFKA_BOOTSTRAP").ok().filter(|v| !v.is_empty());
        let work_topic =
            env::var("STOCK_WORK_TOPIC").unwrap_or_else(|_| "inventory.transactions".to_string());
        let consumer_group =
            env::var("STOCK_CONSUMER_GROUP").unwrap_or_else(|_| "stock-ledger-service".to_string());
        let alert_topic =
            env::var("STOCK_ALERT_TOPIC").unwrap_or_else(|_| "inventory.low_stock".to_string());
        let max_deliveries = env::var("STOCK_MAX_DELIVERIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(5);
        let payload_format = match env::var("STOCK_PAYLOAD_FORMAT") {
            Ok(raw) => raw
                .parse::<PayloadFormat>()
                .map_err(|e| anyhow!(e))
                .context("invalid STOCK_PAYLOAD_FORMAT")?,
            Err(_) => PayloadFormat::Csv,
        };
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = match env::var("PORT") {
            Ok(raw) => raw.parse::<u16>().context("PORT must be a port number")?,
            Err(_) => 8094,
        };

        Ok(Self {
            database_url,
            kafka_bootstrap,
            work_topic,
            consumer_group,
            alert_topic,
            max_deliveries: max_deliveries.max(1),
            alert_webhook_url: env::var("STOCK_ALERT_WEBHOOK_URL").ok(),
            alert_webhook_bearer: env::var("STOCK_ALERT_WEBHOOK_BEARER").ok(),
            poll_wait_secs: secs("STOCK_POLL_WAIT_SECS").unwrap_or(10).max(1),
            visibility_timeout_secs: secs("STOCK_VISIBILITY_TIMEOUT_SECS").unwrap_or(30).max(1),
            drain_interval_secs: secs("STOCK_DRAIN_INTERVAL_SECS").unwrap_or(60).max(1),
            run_once: flag("STOCK_RUN_ONCE"),
            drain_deadline_secs: secs("STOCK_DRAIN_DEADLINE_SECS"),
            suppress_repeat_alerts: flag("STOCK_SUPPRESS_REPEAT_ALERTS"),
            payload_format,
            host,
            port,
        })
    }

    pub fn poll_wait(&self) -> Duration {
        Duration::from_secs(self.poll_wait_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn drain_deadline(&self) -> Option<Duration> {
        self.drain_deadline_secs.map(Duration::from_secs)
    }
}
