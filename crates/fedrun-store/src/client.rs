use std::{fmt, sync::Arc};

use serde_json::Value;

use crate::{
    backend::{Filter, RecordStore, Row},
    errors::StoreError,
    outcome::StoreOutcome,
    rest::{RestConfig, RestStore},
};

/// Shared handle to the optional remote store.
///
/// Cloning is cheap; each call is independently parameterised so the handle
/// can be used from any slot concurrently.
#[derive(Clone, Default)]
pub struct StoreClient {
    backend: Option<Arc<dyn RecordStore>>,
}

impl StoreClient {
    /// A client for which every call yields [`StoreOutcome::Unavailable`].
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn new(backend: Arc<dyn RecordStore>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// Build a REST-backed client, or a disabled one when `cfg` is `None`.
    pub fn from_rest(cfg: Option<RestConfig>) -> Result<Self, StoreError> {
        match cfg {
            Some(cfg) => Ok(Self::new(Arc::new(RestStore::new(cfg)?))),
            None => Ok(Self::disabled()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn insert(&self, table: &str, row: Value) -> StoreOutcome<Row> {
        let Some(backend) = &self.backend else {
            return StoreOutcome::Unavailable;
        };
        match backend.insert(table, row).await {
            Ok(Some(row)) => StoreOutcome::Ok(row),
            Ok(None) => StoreOutcome::Failed(StoreError::InvalidResponse(format!(
                "insert into {table} returned no row"
            ))),
            Err(e) => StoreOutcome::Failed(e),
        }
    }

    pub async fn update(&self, table: &str, filters: &[Filter<'_>], values: Value) -> StoreOutcome<()> {
        let Some(backend) = &self.backend else {
            return StoreOutcome::Unavailable;
        };
        match backend.update(table, filters, values).await {
            Ok(()) => StoreOutcome::Ok(()),
            Err(e) => StoreOutcome::Failed(e),
        }
    }

    pub async fn fetch_one(&self, table: &str, filters: &[Filter<'_>]) -> StoreOutcome<Option<Row>> {
        let Some(backend) = &self.backend else {
            return StoreOutcome::Unavailable;
        };
        match backend.fetch_one(table, filters).await {
            Ok(row) => StoreOutcome::Ok(row),
            Err(e) => StoreOutcome::Failed(e),
        }
    }
}

impl fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreClient")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
