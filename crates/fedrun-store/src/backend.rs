use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::StoreError;

/// One row as returned by the store.
pub type Row = Map<String, Value>;

/// Equality filter on a single column.
pub type Filter<'a> = (&'a str, &'a str);

/// Generic insert / update / fetch-one protocol over a row store.
///
/// Implementations report failures; deciding what a failure means is left
/// to [`crate::StoreClient`].
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Insert `row` into `table`, returning the stored row when the backend echoes it.
    async fn insert(&self, table: &str, row: Value) -> Result<Option<Row>, StoreError>;

    /// Merge `values` into every row of `table` matching all `filters`.
    async fn update(
        &self,
        table: &str,
        filters: &[Filter<'_>],
        values: Value,
    ) -> Result<(), StoreError>;

    /// First row of `table` matching all `filters`.
    async fn fetch_one(&self, table: &str, filters: &[Filter<'_>])
    -> Result<Option<Row>, StoreError>;
}

/// The `id` column of a row, rendered as a string.
pub fn row_id(row: &Row) -> Option<String> {
    match row.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
