use fedrun_model::{RecordStatus, rfc3339};
use serde_json::{Value, json};
use time::OffsetDateTime;

use crate::{backend::row_id, client::StoreClient, tables};

/// Record whose `log_stream` column mirrors a log buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget<'a> {
    Session(&'a str),
    Run(&'a str),
}

impl LogTarget<'_> {
    fn table(&self) -> &'static str {
        match self {
            LogTarget::Session(_) => tables::NODE_SESSIONS,
            LogTarget::Run(_) => tables::FEDERATED_RUNS,
        }
    }

    fn id(&self) -> &str {
        match self {
            LogTarget::Session(id) | LogTarget::Run(id) => id,
        }
    }
}

/// Typed state transitions of `node_sessions` and `federated_runs` rows.
///
/// Every method is best-effort: failures are logged and swallowed.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    store: StoreClient,
}

impl Journal {
    pub fn new(store: StoreClient) -> Self {
        Self { store }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_enabled()
    }

    /// Create a session in `starting` state with an empty log.
    pub async fn open_session(&self, node_id: &str, runtime_config: Value) -> Option<String> {
        let row = json!({
            "node_id": node_id,
            "status": RecordStatus::Starting.as_str(),
            "runtime_config": runtime_config,
            "log_stream": "",
        });
        self.store
            .insert(tables::NODE_SESSIONS, row)
            .await
            .or_log("insert", tables::NODE_SESSIONS)
            .as_ref()
            .and_then(row_id)
    }

    pub async fn session_running(&self, id: &str, pid: u32, at: OffsetDateTime) {
        let values = json!({
            "status": RecordStatus::Running.as_str(),
            "pid": pid,
            "started_at": rfc3339(at),
        });
        self.update(tables::NODE_SESSIONS, id, values).await;
    }

    pub async fn close_session(&self, id: &str, status: RecordStatus, at: OffsetDateTime) {
        let values = json!({ "status": status.as_str(), "ended_at": rfc3339(at) });
        self.update(tables::NODE_SESSIONS, id, values).await;
    }

    /// Create a run in `starting` state with an empty log and no metrics.
    pub async fn open_run(&self, project_id: &str, label: &str, config: Value) -> Option<String> {
        let row = json!({
            "project_id": project_id,
            "status": RecordStatus::Starting.as_str(),
            "label": label,
            "config": config,
            "log_stream": "",
            "metrics": {},
        });
        self.store
            .insert(tables::FEDERATED_RUNS, row)
            .await
            .or_log("insert", tables::FEDERATED_RUNS)
            .as_ref()
            .and_then(row_id)
    }

    pub async fn run_running(
        &self,
        id: &str,
        at: OffsetDateTime,
        coordinator_session_id: Option<&str>,
    ) {
        let values = json!({
            "status": RecordStatus::Running.as_str(),
            "started_at": rfc3339(at),
            "coordinator_session_id": coordinator_session_id,
        });
        self.update(tables::FEDERATED_RUNS, id, values).await;
    }

    pub async fn close_run(&self, id: &str, status: RecordStatus, at: OffsetDateTime) {
        let values = json!({ "status": status.as_str(), "ended_at": rfc3339(at) });
        self.update(tables::FEDERATED_RUNS, id, values).await;
    }

    /// Overwrite the record's `log_stream` with the whole `buffer`.
    pub async fn publish_log(&self, target: LogTarget<'_>, buffer: &str) {
        self.update(target.table(), target.id(), json!({ "log_stream": buffer }))
            .await;
    }

    async fn update(&self, table: &str, id: &str, values: Value) {
        self.store
            .update(table, &[("id", id)], values)
            .await
            .or_log("update", table);
    }
}
