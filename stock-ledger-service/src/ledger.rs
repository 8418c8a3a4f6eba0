use crate::error::PersistenceError;
use crate::model::{StockKey, StockLevel};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Authoritative running stock level per (item, warehouse).
///
/// `apply` is an atomic read-modify-write per key: two callers touching the
/// same key serialize, callers on different keys never wait on each other.
/// Absence of a key is equivalent to a level of 0.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Add `delta` to the key's level and return the updated entry.
    async fn apply(
        &self,
        key: &StockKey,
        delta: i64,
        applied_at: DateTime<Utc>,
    ) -> Result<StockLevel, PersistenceError>;

    async fn get(&self, key: &StockKey) -> Result<i64, PersistenceError>;

    /// Every warehouse entry for one item, sorted by warehouse name.
    async fn levels_for_item(&self, item_id: &str) -> Result<Vec<StockLevel>, PersistenceError>;
}

/// Process-local ledger. The map lock only guards entry lookup/insertion;
/// updates run under the entry's own mutex.
#[derive(Default)]
pub struct InMemoryLedger {
    entries: RwLock<HashMap<StockKey, Arc<Mutex<StockLevel>>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, key: &StockKey, now: DateTime<Utc>) -> Arc<Mutex<StockLevel>> {
        if let Some(existing) = self.entries.read().await.get(key) {
            return existing.clone();
        }
        let mut guard = self.entries.write().await;
        guard
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(StockLevel {
                    item_id: key.item_id.clone(),
                    warehouse: key.warehouse.clone(),
                    level: 0,
                    last_applied: now,
                }))
            })
            .clone()
    }

    /// Point-in-time copy of every entry, sorted by key.
    pub async fn snapshot(&self) -> Vec<StockLevel> {
        let handles: Vec<_> = self.entries.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(handle.lock().await.clone());
        }
        out.sort_by(|a, b| (&a.item_id, &a.warehouse).cmp(&(&b.item_id, &b.warehouse)));
        out
    }

    /// Replace the whole ledger with `levels`.
    pub async fn restore(&self, levels: Vec<StockLevel>) {
        let mut guard = self.entries.write().await;
        guard.clear();
        for level in levels {
            let key = StockKey::new(&level.item_id, &level.warehouse);
            guard.insert(key, Arc::new(Mutex::new(level)));
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn apply(
        &self,
        key: &StockKey,
        delta: i64,
        applied_at: DateTime<Utc>,
    ) -> Result<StockLevel, PersistenceError> {
        let entry = self.entry(key, applied_at).await;
        let mut level = entry.lock().await;
        level.level = level.level.checked_add(delta).ok_or_else(|| {
            PersistenceError::Backend(format!("stock level overflow for {key} applying {delta}"))
        })?;
        level.last_applied = applied_at;
        Ok(level.clone())
    }

    async fn get(&self, key: &StockKey) -> Result<i64, PersistenceError> {
        let handle = self.entries.read().await.get(key).cloned();
        match handle {
            Some(entry) => Ok(entry.lock().await.level),
            None => Ok(0),
        }
    }

    async fn levels_for_item(&self, item_id: &str) -> Result<Vec<StockLevel>, PersistenceError> {
        let handles: Vec<_> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(key, _)| key.item_id == item_id)
            .map(|(_, entry)| entry.clone())
            .collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(handle.lock().await.clone());
        }
        out.sort_by(|a, b| a.warehouse.cmp(&b.warehouse));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_key_reads_as_zero() {
        let ledger = InMemoryLedger::new();
        assert_eq!(ledger.get(&StockKey::new("A", "W1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn first_delta_starts_from_zero() {
        let ledger = InMemoryLedger::new();
        let key = StockKey::new("A", "W1");
        let level = ledger.apply(&key, -3, Utc::now()).await.unwrap();
        assert_eq!(level.level, -3);
        assert_eq!(ledger.get(&key).await.unwrap(), -3);
    }

    #[tokio::test]
    async fn last_applied_tracks_latest_apply() {
        let ledger = InMemoryLedger::new();
        let key = StockKey::new("A", "W1");
        let first = Utc::now();
        let second = first + chrono::Duration::seconds(40);
        ledger.apply(&key, 1, first).await.unwrap();
        let level = ledger.apply(&key, 1, second).await.unwrap();
        assert_eq!(level.last_applied, second);
    }

    #[tokio::test]
    async fn overflow_surfaces_as_persistence_error() {
        let ledger = InMemoryLedger::new();
        let key = StockKey::new("A", "W1");
        ledger.apply(&key, i64::MAX, Utc::now()).await.unwrap();
        let err = ledger.apply(&key, 1, Utc::now()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Backend(_)));
        assert_eq!(ledger.get(&key).await.unwrap(), i64::MAX);
    }

    #[tokio::test]
    async fn levels_for_item_sorted_by_warehouse() {
        let ledger = InMemoryLedger::new();
        let now = Utc::now();
        ledger.apply(&StockKey::new("A", "HAMBURG I"), 2, now).await.unwrap();
        ledger.apply(&StockKey::new("A", "BERLIN I"), 1, now).await.unwrap();
        ledger.apply(&StockKey::new("B", "ANY"), 9, now).await.unwrap();
        let levels = ledger.levels_for_item("A").await.unwrap();
        let names: Vec<_> = levels.iter().map(|l| l.warehouse.as_str()).collect();
        assert_eq!(names, vec!["BERLIN I", "HAMBURG I"]);
    }
}
