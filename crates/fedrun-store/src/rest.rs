use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde_json::Value;
use tracing::trace;

use crate::{
    backend::{Filter, RecordStore, Row},
    errors::StoreError,
};

/// Connection settings of a PostgREST-compatible endpoint.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Project base URL, e.g. `https://xyz.supabase.co`.
    pub url: String,
    /// Service key sent as `apikey` and bearer token.
    pub key: String,
    pub timeout: Duration,
}

impl RestConfig {
    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: key.into(),
            timeout: Duration::from_secs(5),
        }
    }

    /// Both url and key are required; either missing disables the store.
    pub fn from_parts(url: Option<String>, key: Option<String>) -> Option<Self> {
        match (url, key) {
            (Some(url), Some(key)) if !url.trim().is_empty() && !key.trim().is_empty() => {
                Some(Self::new(url, key))
            }
            _ => None,
        }
    }
}

/// [`RecordStore`] speaking the PostgREST row protocol over HTTP.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: Client,
    base: Url,
    key: String,
}

impl RestStore {
    pub fn new(cfg: RestConfig) -> Result<Self, StoreError> {
        let base = Url::parse(&cfg.url).map_err(|e| StoreError::InvalidUrl(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::InvalidUrl(cfg.url));
        }
        let client = Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self {
            client,
            base,
            key: cfg.key,
        })
    }

    /// `<base>/rest/v1/<table>?<col>=eq.<value>...`
    fn table_url(&self, table: &str, filters: &[Filter<'_>]) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(["rest", "v1", table]);

        if !filters.is_empty() {
            let mut query = url.query_pairs_mut();
            for (column, value) in filters {
                query.append_pair(column, &format!("eq.{value}"));
            }
        }
        Ok(url)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.key).bearer_auth(&self.key)
    }
}

async fn check(table: &str, response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Rejected {
        table: table.to_string(),
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl RecordStore for RestStore {
    async fn insert(&self, table: &str, row: Value) -> Result<Option<Row>, StoreError> {
        let url = self.table_url(table, &[])?;
        trace!(%url, "store insert");

        let response = self
            .authorized(self.client.post(url))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        let rows: Vec<Row> = check(table, response).await?.json().await?;
        Ok(rows.into_iter().next())
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter<'_>],
        values: Value,
    ) -> Result<(), StoreError> {
        if filters.is_empty() {
            return Err(StoreError::InvalidResponse(format!(
                "refusing unfiltered update of {table}"
            )));
        }
        let url = self.table_url(table, filters)?;
        trace!(%url, "store update");

        let response = self
            .authorized(self.client.patch(url))
            .json(&values)
            .send()
            .await?;
        check(table, response).await?;
        Ok(())
    }

    async fn fetch_one(
        &self,
        table: &str,
        filters: &[Filter<'_>],
    ) -> Result<Option<Row>, StoreError> {
        let mut url = self.table_url(table, filters)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("limit", "1");
        trace!(%url, "store fetch");

        let response = self.authorized(self.client.get(url)).send().await?;
        let rows: Vec<Row> = check(table, response).await?.json().await?;
        Ok(rows.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_parts_needs_both_values() {
        assert!(RestConfig::from_parts(Some("http://x".into()), None).is_none());
        assert!(RestConfig::from_parts(None, Some("k".into())).is_none());
        assert!(RestConfig::from_parts(Some(" ".into()), Some("k".into())).is_none());
        assert!(RestConfig::from_parts(Some("http://x".into()), Some("k".into())).is_some());
    }

    #[test]
    fn table_url_encodes_equality_filters() {
        let store = RestStore::new(RestConfig::new("https://db.example.com/", "k")).unwrap();
        let url = store
            .table_url("nodes", &[("external_id", "node a"), ("role", "coordinator")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://db.example.com/rest/v1/nodes?external_id=eq.node+a&role=eq.coordinator"
        );
    }

    #[test]
    fn table_url_without_filters_has_no_query() {
        let store = RestStore::new(RestConfig::new("https://db.example.com", "k")).unwrap();
        let url = store.table_url("projects", &[]).unwrap();
        assert_eq!(url.as_str(), "https://db.example.com/rest/v1/projects");
    }

    #[test]
    fn rejects_unparseable_url() {
        let err = RestStore::new(RestConfig::new("not a url", "k")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidUrl(_)));
    }
}
