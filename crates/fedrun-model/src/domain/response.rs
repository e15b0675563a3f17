use serde::{Deserialize, Serialize};

/// Acknowledgement returned by every successful start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartAck {
    pub status: String,
    pub pid: u32,
    pub log_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl StartAck {
    pub fn running(pid: u32, log_path: impl Into<String>) -> Self {
        Self {
            status: "running".to_string(),
            pid,
            log_path: log_path.into(),
            session_id: None,
            run_id: None,
        }
    }
}

/// Acknowledgement returned by every successful stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopAck {
    pub status: String,
}

impl StopAck {
    pub fn stopped() -> Self {
        Self {
            status: "stopped".to_string(),
        }
    }
}

/// Metadata of the run currently occupying the run slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    pub federation_name: String,
    pub started_at: String,
    pub pid: u32,
    pub log_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Body of `GET /runs/active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRun {
    pub run: Option<RunInfo>,
}

/// `GET /health` on a coordinator instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorHealth {
    pub superlink_running: bool,
    pub run_active: bool,
    pub started_at: Option<String>,
    pub session_id: Option<String>,
    pub run_info: Option<RunInfo>,
}

/// `GET /health` on a participant instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantHealth {
    pub supernode_running: bool,
    pub started_at: Option<String>,
    pub session_id: Option<String>,
    pub log_path: String,
    /// Identity the running supernode reports under; cleared when it stops.
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Health {
    Coordinator(CoordinatorHealth),
    Participant(ParticipantHealth),
}
