use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    routing::{get, post},
};
use fedrun_model::{
    ActiveRun, Health, RunStartRequest, SlotKind, StartAck, StartRequest, StopAck, SuperlinkStartRequest,
    SupernodeStartRequest,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{error::ApiError, handler::ApiHandler};

/// HTTP API service builder.
pub struct HttpApi<H> {
    handler: Arc<H>,
}

impl<H> HttpApi<H>
where
    H: ApiHandler,
{
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }

    /// Build axum router with mounted endpoints.
    ///
    /// Routes (per managed slot):
    /// - GET  /health
    /// - POST /superlink/start, /superlink/stop
    /// - POST /runs/start, /runs/stop, GET /runs/active
    /// - POST /supernode/start, /supernode/stop
    pub fn router(self) -> Router {
        let mut router: Router<Arc<H>> = Router::new().route("/health", get(health::<H>));

        for kind in self.handler.managed() {
            let base = format!("/{}", kind.route());
            router = match kind {
                SlotKind::Coordinator => router.route(&format!("{base}/start"), post(start_superlink::<H>)),
                SlotKind::Run => router
                    .route(&format!("{base}/start"), post(start_run::<H>))
                    .route(&format!("{base}/active"), get(active_run::<H>)),
                SlotKind::Participant => router.route(&format!("{base}/start"), post(start_supernode::<H>)),
            };
            router = router.route(
                &format!("{base}/stop"),
                post(move |state: State<Arc<H>>| stop_slot(state, kind)),
            );
        }

        router.with_state(self.handler)
    }
}

/// Parse a JSON body; an empty body stands for `{}` so defaulted requests need none.
fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let body: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(body).map_err(|e| ApiError::InvalidRequest(e.to_string()))
}

/// GET /health
async fn health<H>(State(handler): State<Arc<H>>) -> Json<Health>
where
    H: ApiHandler,
{
    Json(handler.health().await)
}

/// POST /superlink/start
async fn start_superlink<H>(State(handler): State<Arc<H>>, body: Bytes) -> Result<Json<StartAck>, ApiError>
where
    H: ApiHandler,
{
    let req: SuperlinkStartRequest = decode(&body)?;
    debug!(insecure = req.insecure, "starting superlink");
    Ok(Json(handler.start(StartRequest::Superlink(req)).await?))
}

/// POST /runs/start
async fn start_run<H>(State(handler): State<Arc<H>>, body: Bytes) -> Result<Json<StartAck>, ApiError>
where
    H: ApiHandler,
{
    let req: RunStartRequest = decode(&body)?;
    debug!(federation = %req.federation_name, "starting run");
    Ok(Json(handler.start(StartRequest::Run(req)).await?))
}

/// POST /supernode/start
async fn start_supernode<H>(State(handler): State<Arc<H>>, body: Bytes) -> Result<Json<StartAck>, ApiError>
where
    H: ApiHandler,
{
    let req: SupernodeStartRequest = decode(&body)?;
    debug!(superlink = %req.superlink_address, partition = req.partition_id, "starting supernode");
    Ok(Json(handler.start(StartRequest::Supernode(req)).await?))
}

/// POST /{route}/stop
async fn stop_slot<H>(State(handler): State<Arc<H>>, kind: SlotKind) -> Result<Json<StopAck>, ApiError>
where
    H: ApiHandler,
{
    debug!(slot = %kind, "stop requested");
    Ok(Json(handler.stop(kind).await?))
}

/// GET /runs/active
async fn active_run<H>(State(handler): State<Arc<H>>) -> Result<Json<ActiveRun>, ApiError>
where
    H: ApiHandler,
{
    Ok(Json(handler.active_run().await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_uses_defaults() {
        let req: RunStartRequest = decode(b"").unwrap();
        assert_eq!(req, RunStartRequest::default());
        let req: SuperlinkStartRequest = decode(b" \n").unwrap();
        assert!(req.insecure);
    }

    #[test]
    fn supernode_requires_address() {
        let err = decode::<SupernodeStartRequest>(b"").unwrap_err();
        assert_eq!(err.kind(), "invalid_request");

        let req: SupernodeStartRequest =
            decode(br#"{"superlink_address":"sl:9092","partition_id":1,"num_partitions":3}"#).unwrap();
        assert_eq!(req.clientappio_api_address, "0.0.0.0:9094");
    }

    #[test]
    fn malformed_json_is_invalid_request() {
        let err = decode::<RunStartRequest>(b"{not json").unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
    }

    #[cfg(unix)]
    mod e2e {
        use std::{path::Path, sync::Arc, time::Duration};

        use fedrun_core::{Programs, Supervisor, SupervisorSettings};
        use fedrun_store::{MemoryStore, StoreClient};
        use reqwest::StatusCode;
        use serde_json::{Value, json};
        use tempfile::TempDir;
        use tokio_util::sync::CancellationToken;

        use crate::{ErrorBody, HttpApi, SupervisorApiAdapter};

        fn sleeper(dir: &Path, name: &str) -> String {
            use std::os::unix::fs::PermissionsExt;

            let path = dir.join(name);
            std::fs::write(&path, "#!/bin/sh\necho \"$0 $*\"\nexec sleep 30\n").unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path.display().to_string()
        }

        struct Server {
            _dir: TempDir,
            base: String,
            client: reqwest::Client,
            supervisor: Arc<Supervisor>,
            shutdown: CancellationToken,
        }

        impl Server {
            async fn spawn(coordinator: bool) -> Self {
                let dir = tempfile::tempdir().unwrap();
                let app = dir.path().join("flower-app");
                std::fs::create_dir_all(&app).unwrap();
                std::fs::write(app.join("pyproject.toml"), "[tool.flwr.app.config]\nrounds = 1\n").unwrap();

                let settings = SupervisorSettings {
                    app_dir: app,
                    logs_dir: dir.path().join("logs"),
                    grace: Duration::from_secs(5),
                    programs: Programs {
                        superlink: sleeper(dir.path(), "superlink"),
                        flwr: sleeper(dir.path(), "flwr"),
                        supernode: sleeper(dir.path(), "supernode"),
                    },
                    ..Default::default()
                };
                let store = StoreClient::new(Arc::new(MemoryStore::new()));
                let supervisor = Arc::new(if coordinator {
                    Supervisor::coordinator(settings, store)
                } else {
                    Supervisor::participant(settings, store)
                });

                let router = HttpApi::new(Arc::new(SupervisorApiAdapter::new(supervisor.clone()))).router();
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap();
                let shutdown = CancellationToken::new();
                let token = shutdown.clone();
                tokio::spawn(async move {
                    axum::serve(listener, router)
                        .with_graceful_shutdown(token.cancelled_owned())
                        .await
                        .unwrap();
                });

                Self {
                    _dir: dir,
                    base: format!("http://{addr}"),
                    client: reqwest::Client::new(),
                    supervisor,
                    shutdown,
                }
            }

            async fn get(&self, path: &str) -> (StatusCode, Value) {
                let resp = self.client.get(format!("{}{path}", self.base)).send().await.unwrap();
                let status = resp.status();
                (status, resp.json().await.unwrap_or(Value::Null))
            }

            async fn post(&self, path: &str, body: Option<Value>) -> (StatusCode, Value) {
                let mut req = self.client.post(format!("{}{path}", self.base));
                if let Some(body) = body {
                    req = req.json(&body);
                }
                let resp = req.send().await.unwrap();
                let status = resp.status();
                (status, resp.json().await.unwrap_or(Value::Null))
            }

            async fn close(self) {
                self.supervisor.shutdown().await;
                self.shutdown.cancel();
            }
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn coordinator_round_trip() {
            let server = Server::spawn(true).await;

            let (status, health) = server.get("/health").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(health["superlink_running"], false);
            assert!(health["started_at"].is_null());

            let (status, ack) = server.post("/superlink/start", None).await;
            assert_eq!(status, StatusCode::OK, "{ack}");
            assert_eq!(ack["status"], "running");

            let (_, health) = server.get("/health").await;
            assert_eq!(health["superlink_running"], true);
            assert!(health["started_at"].is_string());

            let (status, run) = server
                .post("/runs/start", Some(json!({ "federation_name": "local" })))
                .await;
            assert_eq!(status, StatusCode::OK, "{run}");
            assert!(!run["run_id"].as_str().unwrap_or_default().is_empty());

            let (_, active) = server.get("/runs/active").await;
            assert_eq!(active["run"]["federation_name"], "local");
            assert_eq!(active["run"]["run_id"], run["run_id"]);

            let (status, stopped) = server.post("/runs/stop", None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(stopped, json!({ "status": "stopped" }));

            let (_, active) = server.get("/runs/active").await;
            assert_eq!(active, json!({ "run": null }));

            server.post("/superlink/stop", None).await;
            let (_, health) = server.get("/health").await;
            assert_eq!(health["superlink_running"], false);

            server.close().await;
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn errors_carry_kind_and_detail() {
            let server = Server::spawn(true).await;

            let (status, body) = server.post("/runs/start", None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            let body: ErrorBody = serde_json::from_value(body).unwrap();
            assert_eq!(body.kind, "dependency_not_running");
            assert!(!body.detail.is_empty());

            let (status, body) = server.post("/superlink/stop", None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["kind"], "not_running");

            server.post("/superlink/start", None).await;
            let (status, body) = server.post("/superlink/start", None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["kind"], "already_running");

            let (status, _) = server.post("/supernode/start", None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);

            server.close().await;
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn participant_routes() {
            let server = Server::spawn(false).await;

            let (status, body) = server.post("/supernode/start", None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["kind"], "invalid_request");

            let (status, ack) = server
                .post(
                    "/supernode/start",
                    Some(json!({ "superlink_address": "127.0.0.1:9092", "partition_id": 0, "num_partitions": 2 })),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "{ack}");
            assert!(ack.get("run_id").is_none());

            let (_, health) = server.get("/health").await;
            assert_eq!(health["supernode_running"], true);
            assert!(health["log_path"].as_str().unwrap().ends_with("supernode.log"));

            let (status, _) = server.get("/runs/active").await;
            assert_eq!(status, StatusCode::NOT_FOUND);

            let (status, _) = server.post("/supernode/stop", None).await;
            assert_eq!(status, StatusCode::OK);
            let (_, health) = server.get("/health").await;
            assert_eq!(health["supernode_running"], false);

            server.close().await;
        }
    }
}
