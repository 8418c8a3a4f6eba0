use crate::error::PersistenceError;
use crate::ledger::LedgerStore;
use crate::model::StockLevel;
use crate::queue::InMemoryQueue;
use crate::restock_check::{KeyCheck, RestockChecker, RestockReport};
use crate::thresholds::{ThresholdIngest, ThresholdStore, ThresholdUpdateBatch};
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use common_http_errors::{ApiError, ApiResult};
use common_observability::StockMetrics;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

pub const SERVICE_NAME: &str = "stock-ledger-service";
const WORK_ITEM_ID_HEADER: &str = "x-work-item-id";

#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<StockMetrics>,
    /// Present only when work arrives over HTTP rather than an external queue.
    pub intake: Option<Arc<InMemoryQueue>>,
    pub ledger: Arc<dyn LedgerStore>,
    pub thresholds: Arc<dyn ThresholdStore>,
    pub ingest: ThresholdIngest,
    pub restock: RestockChecker,
}

#[derive(Debug, Serialize)]
pub struct EnqueuedResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct ThresholdUpdateResponse {
    pub updated: Vec<String>,
    pub restock: RestockReport,
}

#[derive(Debug, Serialize)]
pub struct ItemStockResponse {
    pub item_id: String,
    pub limit: Option<i64>,
    pub levels: Vec<StockLevel>,
}

fn store_unavailable(err: PersistenceError) -> ApiError {
    ApiError::Unavailable { code: "store_unavailable", message: Some(err.to_string()) }
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics_endpoint(State(state): State<AppState>) -> ApiResult<String> {
    state.metrics.render().map_err(ApiError::internal)
}

/// Accepts one raw batch (in the configured payload format) for the next
/// drain pass.
pub async fn enqueue_work_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<EnqueuedResponse>)> {
    let Some(queue) = state.intake.as_ref() else {
        return Err(ApiError::Unavailable {
            code: "intake_disabled",
            message: Some("work items are consumed from an external queue".into()),
        });
    };
    if body.is_empty() {
        return Err(ApiError::bad_request("empty_payload"));
    }
    let requested_id = headers
        .get(WORK_ITEM_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let id = match requested_id {
        Some(id) => {
            queue.enqueue_with_id(id, body.to_vec()).await;
            id.to_string()
        }
        None => queue.enqueue(body.to_vec()).await,
    };
    info!(work_item = %id, bytes = body.len(), "Work item enqueued");
    Ok((StatusCode::ACCEPTED, Json(EnqueuedResponse { id })))
}

/// Applies a `ThresholdList` payload, then notifies once about every updated
/// item already below its new limit.
pub async fn update_thresholds(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<ThresholdUpdateResponse>> {
    let batch = ThresholdUpdateBatch::from_slice(&body)
        .map_err(|e| ApiError::bad_request_with("invalid_threshold_payload", e))?;
    let updated = state.ingest.ingest(&batch).await.map_err(store_unavailable)?;
    let restock = state.restock.notify_after_update(&updated).await.map_err(store_unavailable)?;
    Ok(Json(ThresholdUpdateResponse { updated, restock }))
}

pub async fn item_stock(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
) -> ApiResult<Json<ItemStockResponse>> {
    let levels = state.ledger.levels_for_item(&item_id).await.map_err(store_unavailable)?;
    let limit = state.thresholds.get(&item_id).await.map_err(store_unavailable)?;
    Ok(Json(ItemStockResponse { item_id, limit, levels }))
}

pub async fn check_stock(
    State(state): State<AppState>,
    Path((item_id, warehouse)): Path<(String, String)>,
) -> ApiResult<Json<KeyCheck>> {
    let check = state.restock.check_item(&item_id, &warehouse).await.map_err(store_unavailable)?;
    Ok(Json(check))
}

async fn error_metrics_mw(
    State(metrics): State<Arc<StockMetrics>>,
    req: axum::http::Request<Body>,
    next: middleware::Next,
) -> axum::response::Response {
    let resp = next.run(req).await;
    let status = resp.status();
    if status.as_u16() >= 400 {
        let code = resp
            .headers()
            .get("x-error-code")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");
        metrics
            .http_errors_total
            .with_label_values(&[SERVICE_NAME, code, status.as_str()])
            .inc();
    }
    resp
}

pub fn router(state: AppState) -> Router {
    let metrics = state.metrics.clone();
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/work-items", post(enqueue_work_item))
        .route("/restock-thresholds", post(update_thresholds))
        .route("/stock/:item_id", get(item_stock))
        .route("/stock/:item_id/:warehouse/restock-check", post(check_stock))
        .with_state(state)
        .layer(middleware::from_fn_with_state(metrics, error_metrics_mw))
}
