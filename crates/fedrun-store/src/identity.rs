use std::collections::HashMap;

use fedrun_model::NodeRole;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    backend::{Filter, row_id},
    client::StoreClient,
    tables,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NodeKey {
    project_id: String,
    external_id: String,
    role: NodeRole,
}

/// Resolves (or lazily creates) the project and node records identifying this
/// deployment. Successful resolutions are memoised for the resolver's lifetime.
///
/// The cache lock is held across the remote fetch-or-create, so concurrent
/// callers for the same identity perform the remote work once.
#[derive(Debug)]
pub struct IdentityResolver {
    store: StoreClient,
    projects: Mutex<HashMap<String, String>>,
    nodes: Mutex<HashMap<NodeKey, String>>,
}

impl IdentityResolver {
    pub fn new(store: StoreClient) -> Self {
        Self {
            store,
            projects: Mutex::new(HashMap::new()),
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// Id of the project with `slug`, creating it with `name` if absent.
    ///
    /// `None` when the store is unconfigured or unreachable; failures are not
    /// memoised, so a later call retries.
    pub async fn resolve_project(&self, slug: &str, name: &str) -> Option<String> {
        let mut cache = self.projects.lock().await;
        if let Some(id) = cache.get(slug) {
            return Some(id.clone());
        }

        let id = self
            .fetch_or_create(
                tables::PROJECTS,
                &[("slug", slug)],
                json!({ "slug": slug, "name": name }),
            )
            .await?;
        debug!(slug, project_id = %id, "project resolved");
        cache.insert(slug.to_string(), id.clone());
        Some(id)
    }

    /// Id of the node `external_id` with `role` inside `project_id`, creating it if absent.
    pub async fn resolve_node(
        &self,
        project_id: &str,
        external_id: &str,
        role: NodeRole,
        display_name: &str,
    ) -> Option<String> {
        let key = NodeKey {
            project_id: project_id.to_string(),
            external_id: external_id.to_string(),
            role,
        };
        let mut cache = self.nodes.lock().await;
        if let Some(id) = cache.get(&key) {
            return Some(id.clone());
        }

        let id = self
            .fetch_or_create(
                tables::NODES,
                &[
                    ("project_id", project_id),
                    ("external_id", external_id),
                    ("role", role.as_str()),
                ],
                json!({
                    "project_id": project_id,
                    "external_id": external_id,
                    "role": role.as_str(),
                    "display_name": display_name,
                }),
            )
            .await?;
        debug!(external_id, %role, node_id = %id, "node resolved");
        cache.insert(key, id.clone());
        Some(id)
    }

    async fn fetch_or_create(
        &self,
        table: &str,
        filters: &[Filter<'_>],
        row: Value,
    ) -> Option<String> {
        if !self.store.is_enabled() {
            return None;
        }

        let existing = self.store.fetch_one(table, filters).await.or_log("fetch", table);
        if let Some(id) = existing.flatten().as_ref().and_then(row_id) {
            return Some(id);
        }

        let inserted = self.store.insert(table, row).await.or_log("insert", table);
        if let Some(id) = inserted.as_ref().and_then(row_id) {
            return Some(id);
        }

        // Another orchestrator may have won a duplicate-insert race.
        self.store
            .fetch_one(table, filters)
            .await
            .or_log("fetch", table)
            .flatten()
            .as_ref()
            .and_then(row_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        backend::{RecordStore, Row},
        errors::StoreError,
        memory::MemoryStore,
    };

    #[tokio::test]
    async fn project_resolution_is_memoised() {
        let store = Arc::new(MemoryStore::new());
        let resolver = IdentityResolver::new(StoreClient::new(store.clone()));

        let first = resolver.resolve_project("fed", "Fed").await.unwrap();
        let calls_after_first = store.calls();
        let second = resolver.resolve_project("fed", "Fed").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.calls(), calls_after_first);
        assert_eq!(calls_after_first.inserts, 1);
        assert_eq!(store.rows(tables::PROJECTS).len(), 1);
    }

    #[tokio::test]
    async fn existing_project_is_reused() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert(tables::PROJECTS, json!({"id": "p-1", "slug": "fed", "name": "Fed"}))
            .await
            .unwrap();
        let resolver = IdentityResolver::new(StoreClient::new(store.clone()));

        assert_eq!(resolver.resolve_project("fed", "ignored").await.as_deref(), Some("p-1"));
        assert_eq!(store.calls().inserts, 1);
    }

    #[tokio::test]
    async fn nodes_are_scoped_by_role() {
        let store = Arc::new(MemoryStore::new());
        let resolver = IdentityResolver::new(StoreClient::new(store.clone()));

        let coord = resolver
            .resolve_node("p", "host-1", NodeRole::Coordinator, "Coordinator")
            .await
            .unwrap();
        let part = resolver
            .resolve_node("p", "host-1", NodeRole::Participant, "host-1")
            .await
            .unwrap();
        let again = resolver
            .resolve_node("p", "host-1", NodeRole::Coordinator, "Coordinator")
            .await
            .unwrap();

        assert_ne!(coord, part);
        assert_eq!(coord, again);
        assert_eq!(store.rows(tables::NODES).len(), 2);
        let row = store.row(tables::NODES, &coord).unwrap();
        assert_eq!(row["role"], "coordinator");
        assert_eq!(row["display_name"], "Coordinator");
    }

    #[tokio::test]
    async fn disabled_store_yields_no_identity() {
        let resolver = IdentityResolver::new(StoreClient::disabled());
        assert!(resolver.resolve_project("fed", "Fed").await.is_none());
        assert!(
            resolver
                .resolve_node("p", "n", NodeRole::Participant, "n")
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn failures_are_not_memoised() {
        let store = Arc::new(MemoryStore::new());
        let resolver = IdentityResolver::new(StoreClient::new(store.clone()));

        store.set_offline(true);
        assert!(resolver.resolve_project("fed", "Fed").await.is_none());

        store.set_offline(false);
        assert!(resolver.resolve_project("fed", "Fed").await.is_some());
    }

    /// Stores the row but reports a conflict, as when a peer inserted it first.
    struct ConflictingStore(MemoryStore);

    #[async_trait]
    impl RecordStore for ConflictingStore {
        async fn insert(&self, table: &str, row: Value) -> Result<Option<Row>, StoreError> {
            self.0.insert(table, row).await?;
            Err(StoreError::Rejected {
                table: table.to_string(),
                status: 409,
                body: "duplicate key".into(),
            })
        }

        async fn update(
            &self,
            table: &str,
            filters: &[Filter<'_>],
            values: Value,
        ) -> Result<(), StoreError> {
            self.0.update(table, filters, values).await
        }

        async fn fetch_one(
            &self,
            table: &str,
            filters: &[Filter<'_>],
        ) -> Result<Option<Row>, StoreError> {
            self.0.fetch_one(table, filters).await
        }
    }

    #[tokio::test]
    async fn duplicate_insert_falls_back_to_refetch() {
        let store = Arc::new(ConflictingStore(MemoryStore::new()));
        let resolver = IdentityResolver::new(StoreClient::new(store.clone()));

        let id = resolver.resolve_project("fed", "Fed").await;
        assert!(id.is_some());
        assert_eq!(store.0.calls().fetches, 2);
    }
}
