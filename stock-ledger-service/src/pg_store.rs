//! Postgres-backed stores. Per-key atomicity is delegated to single-row
//! upserts, so any number of worker processes can share the tables.

use crate::error::PersistenceError;
use crate::ledger::LedgerStore;
use crate::model::{StockKey, StockLevel};
use crate::thresholds::ThresholdStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

pub(crate) const APPLY_DELTA_SQL: &str =
    "INSERT INTO stock_levels (item_id, warehouse, level, last_applied) \
     VALUES ($1, $2, $3, $4) \
     ON CONFLICT (item_id, warehouse) DO UPDATE \
     SET level = stock_levels.level + EXCLUDED.level, last_applied = EXCLUDED.last_applied \
     RETURNING item_id, warehouse, level, last_applied";

pub(crate) const GET_LEVEL_SQL: &str =
    "SELECT level FROM stock_levels WHERE item_id = $1 AND warehouse = $2";

pub(crate) const LEVELS_FOR_ITEM_SQL: &str =
    "SELECT item_id, warehouse, level, last_applied FROM stock_levels \
     WHERE item_id = $1 ORDER BY warehouse";

pub(crate) const UPSERT_THRESHOLD_SQL: &str =
    "INSERT INTO restock_thresholds (item_id, restock_if_below, updated_at) \
     VALUES ($1, $2, $3) \
     ON CONFLICT (item_id) DO UPDATE \
     SET restock_if_below = EXCLUDED.restock_if_below, updated_at = EXCLUDED.updated_at";

pub(crate) const GET_THRESHOLD_SQL: &str =
    "SELECT restock_if_below FROM restock_thresholds WHERE item_id = $1";

pub async fn run_migrations(pool: &PgPool) -> Result<(), PersistenceError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| PersistenceError::Backend(format!("migration failed: {e}")))
}

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn apply(
        &self,
        key: &StockKey,
        delta: i64,
        applied_at: DateTime<Utc>,
    ) -> Result<StockLevel, PersistenceError> {
        let level = sqlx::query_as::<_, StockLevel>(APPLY_DELTA_SQL)
            .bind(&key.item_id)
            .bind(&key.warehouse)
            .bind(delta)
            .bind(applied_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(level)
    }

    async fn get(&self, key: &StockKey) -> Result<i64, PersistenceError> {
        let row = sqlx::query(GET_LEVEL_SQL)
            .bind(&key.item_id)
            .bind(&key.warehouse)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("level")).unwrap_or(0))
    }

    async fn levels_for_item(&self, item_id: &str) -> Result<Vec<StockLevel>, PersistenceError> {
        let levels = sqlx::query_as::<_, StockLevel>(LEVELS_FOR_ITEM_SQL)
            .bind(item_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(levels)
    }
}

#[derive(Clone)]
pub struct PgThresholds {
    pool: PgPool,
}

impl PgThresholds {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ThresholdStore for PgThresholds {
    async fn upsert(
        &self,
        item_id: &str,
        limit: i64,
        updated_at: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        sqlx::query(UPSERT_THRESHOLD_SQL)
            .bind(item_id)
            .bind(limit)
            .bind(updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, item_id: &str) -> Result<Option<i64>, PersistenceError> {
        let row = sqlx::query(GET_THRESHOLD_SQL)
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("restock_if_below")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_sql_adds_to_existing_level() {
        assert!(APPLY_DELTA_SQL.contains("stock_levels.level + EXCLUDED.level"));
        assert!(APPLY_DELTA_SQL.contains("ON CONFLICT (item_id, warehouse)"));
    }

    #[test]
    fn threshold_upsert_overwrites() {
        assert!(UPSERT_THRESHOLD_SQL.contains("SET restock_if_below = EXCLUDED.restock_if_below"));
    }
}
