use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    backend::{Filter, RecordStore, Row},
    errors::StoreError,
};

/// Number of calls a [`MemoryStore`] has served, per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub inserts: usize,
    pub updates: usize,
    pub fetches: usize,
}

/// In-process [`RecordStore`] for tests and dry runs.
///
/// Inserted rows get a UUID `id` unless they carry one. The store can be
/// switched offline, after which every call fails with
/// [`StoreError::Unreachable`], or slowed down to stand in for a laggy remote.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    tables: HashMap<String, Vec<Row>>,
    offline: bool,
    latency: Duration,
    calls: CallCounts,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Delay every subsequent call by `latency` before it is served.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Snapshot of every row in `table`, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// First row of `table` whose `id` equals `id`.
    pub fn row(&self, table: &str, id: &str) -> Option<Row> {
        self.lock()
            .tables
            .get(table)?
            .iter()
            .find(|row| matches(row, &[("id", id)]))
            .cloned()
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn pause(&self) {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn online(&self) -> Result<MutexGuard<'_, MemoryInner>, StoreError> {
        let inner = self.lock();
        if inner.offline {
            return Err(StoreError::Unreachable("memory store is offline".into()));
        }
        Ok(inner)
    }
}

fn column_eq(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Null => false,
        other => other.to_string() == expected,
    }
}

fn matches(row: &Row, filters: &[Filter<'_>]) -> bool {
    filters.iter().all(|(column, expected)| {
        row.get(*column)
            .is_some_and(|value| column_eq(value, expected))
    })
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert(&self, table: &str, row: Value) -> Result<Option<Row>, StoreError> {
        self.pause().await;
        let mut inner = self.online()?;
        inner.calls.inserts += 1;

        let Value::Object(mut row) = row else {
            return Err(StoreError::InvalidResponse(format!(
                "insert into {table} expects an object"
            )));
        };
        row.entry("id")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));

        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(Some(row))
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter<'_>],
        values: Value,
    ) -> Result<(), StoreError> {
        self.pause().await;
        let mut inner = self.online()?;
        inner.calls.updates += 1;

        let Value::Object(values) = values else {
            return Err(StoreError::InvalidResponse(format!(
                "update of {table} expects an object"
            )));
        };
        if let Some(rows) = inner.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|row| matches(row, filters)) {
                for (column, value) in &values {
                    row.insert(column.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn fetch_one(
        &self,
        table: &str,
        filters: &[Filter<'_>],
    ) -> Result<Option<Row>, StoreError> {
        self.pause().await;
        let mut inner = self.online()?;
        inner.calls.fetches += 1;

        Ok(inner
            .tables
            .get(table)
            .and_then(|rows| rows.iter().find(|row| matches(row, filters)))
            .cloned())
    }
}
