use anyhow::Context;
use common_observability::StockMetrics;
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use stock_ledger_service::{
    app::{router, AppState, SERVICE_NAME},
    pg_store::{run_migrations, PgLedger, PgThresholds},
    Aggregator, AlertDispatcher, AlertPolicy, DrainController, InMemoryLedger, InMemoryQueue,
    InMemoryThresholds, LedgerStore, LogSink, NotificationSink, RestockChecker, StockConfig,
    ThresholdIngest, ThresholdStore, WebhookSink, WorkQueue,
};
use tokio::net::TcpListener;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct Stores {
    ledger: Arc<dyn LedgerStore>,
    thresholds: Arc<dyn ThresholdStore>,
}

async fn build_stores(config: &StockConfig) -> anyhow::Result<Stores> {
    match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url).await.context("failed to connect to DATABASE_URL")?;
            run_migrations(&pool).await.context("failed to run stock ledger migrations")?;
            Ok(Stores {
                ledger: Arc::new(PgLedger::new(pool.clone())),
                thresholds: Arc::new(PgThresholds::new(pool)),
            })
        }
        None => {
            warn!("DATABASE_URL not set; stock levels and thresholds are kept in memory only");
            Ok(Stores {
                ledger: Arc::new(InMemoryLedger::new()),
                thresholds: Arc::new(InMemoryThresholds::new()),
            })
        }
    }
}

fn build_sink(config: &StockConfig) -> anyhow::Result<Arc<dyn NotificationSink>> {
    if let Some(url) = &config.alert_webhook_url {
        info!(url = %url, "Restock alerts go to webhook");
        return Ok(Arc::new(WebhookSink::new(
            reqwest::Client::new(),
            url.clone(),
            config.alert_webhook_bearer.clone(),
        )));
    }
    #[cfg(feature = "kafka-producer")]
    if let Some(bootstrap) = &config.kafka_bootstrap {
        info!(topic = %config.alert_topic, "Restock alerts go to kafka");
        let producer = stock_ledger_service::kafka::producer(bootstrap)
            .context("failed to create kafka producer")?;
        return Ok(Arc::new(stock_ledger_service::kafka::KafkaAlertSink::new(
            producer,
            config.alert_topic.clone(),
        )));
    }
    info!("No alert sink configured; restock alerts are logged");
    Ok(Arc::new(LogSink))
}

/// Returns the queue to drain plus the HTTP intake handle when the queue is
/// process-local.
fn build_queue(
    config: &StockConfig,
) -> anyhow::Result<(Arc<dyn WorkQueue>, Option<Arc<InMemoryQueue>>)> {
    #[cfg(feature = "kafka-producer")]
    if let Some(bootstrap) = &config.kafka_bootstrap {
        let producer = stock_ledger_service::kafka::producer(bootstrap)
            .context("failed to create kafka producer")?;
        let queue = stock_ledger_service::kafka::KafkaWorkQueue::connect(
            bootstrap,
            &config.consumer_group,
            &config.work_topic,
            producer,
            config.max_deliveries,
        )
        .context("failed to create kafka consumer")?;
        info!(
            topic = %config.work_topic,
            group = %config.consumer_group,
            "Draining work items from kafka"
        );
        return Ok((Arc::new(queue), None));
    }
    let queue = Arc::new(InMemoryQueue::new(config.visibility_timeout()));
    info!(
        visibility_timeout_secs = config.visibility_timeout_secs,
        "Draining work items posted to /work-items"
    );
    Ok((queue.clone(), Some(queue)))
}

async fn drain_forever(mut controller: DrainController, config: StockConfig) {
    let mut ticker = interval(config.drain_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let deadline = config.drain_deadline().map(|d| Instant::now() + d);
        controller.run(deadline).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = StockConfig::from_env().context("invalid stock ledger configuration")?;
    let metrics = Arc::new(StockMetrics::new().context("failed to register metrics")?);
    let stores = build_stores(&config).await?;
    let sink = build_sink(&config)?;
    let (queue, intake) = build_queue(&config)?;

    let aggregator =
        Aggregator::new(stores.ledger.clone(), stores.thresholds.clone(), metrics.clone());
    let dispatcher = AlertDispatcher::new(
        sink.clone(),
        metrics.clone(),
        AlertPolicy { suppress_repeats: config.suppress_repeat_alerts },
    );
    let mut controller = DrainController::new(
        queue,
        config.payload_format.decoder(),
        aggregator,
        dispatcher,
        metrics.clone(),
        config.poll_wait(),
    );

    if config.run_once {
        let deadline = config.drain_deadline().map(|d| Instant::now() + d);
        let summary = controller.run(deadline).await;
        info!(
            processed = summary.processed_count,
            failed = summary.failed_count,
            "Single drain pass finished"
        );
        return Ok(());
    }

    let state = AppState {
        metrics: metrics.clone(),
        intake,
        ledger: stores.ledger.clone(),
        thresholds: stores.thresholds.clone(),
        ingest: ThresholdIngest::new(stores.thresholds.clone(), metrics.clone()),
        restock: RestockChecker::new(stores.ledger, stores.thresholds, sink, metrics),
    };
    let app = router(state);

    let ip: std::net::IpAddr = config.host.parse().context("HOST must be an IP address")?;
    let addr = SocketAddr::from((ip, config.port));
    info!(%addr, format = config.payload_format.as_str(), "starting {SERVICE_NAME}");
    let listener = TcpListener::bind(addr).await?;

    tokio::select! {
        served = axum::serve(listener, app) => served?,
        _ = drain_forever(controller, config) => {}
    }
    Ok(())
}
