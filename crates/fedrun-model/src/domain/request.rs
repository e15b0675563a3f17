use serde::{Deserialize, Serialize};

use crate::SlotKind;

fn default_true() -> bool {
    true
}

fn default_federation() -> String {
    "production".to_string()
}

fn default_clientappio() -> String {
    "0.0.0.0:9094".to_string()
}

/// Body of `POST /superlink/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperlinkStartRequest {
    #[serde(default = "default_true")]
    pub insecure: bool,
    #[serde(default)]
    pub certificates_path: Option<String>,
    /// Recorded in the session runtime config only.
    #[serde(default)]
    pub listen_address: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for SuperlinkStartRequest {
    fn default() -> Self {
        Self {
            insecure: true,
            certificates_path: None,
            listen_address: None,
            extra_args: Vec::new(),
        }
    }
}

/// Body of `POST /runs/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStartRequest {
    #[serde(default = "default_federation")]
    pub federation_name: String,
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for RunStartRequest {
    fn default() -> Self {
        Self {
            federation_name: default_federation(),
            stream: true,
            extra_args: Vec::new(),
        }
    }
}

/// Body of `POST /supernode/start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupernodeStartRequest {
    pub superlink_address: String,
    pub partition_id: u32,
    pub num_partitions: u32,
    #[serde(default = "default_clientappio")]
    pub clientappio_api_address: String,
    #[serde(default = "default_true")]
    pub insecure: bool,
    #[serde(default)]
    pub certificates_path: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Overrides the project resolved from the configured slug.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Overrides the node resolved from the configured external id.
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl SupernodeStartRequest {
    pub fn new(superlink_address: impl Into<String>, partition_id: u32, num_partitions: u32) -> Self {
        Self {
            superlink_address: superlink_address.into(),
            partition_id,
            num_partitions,
            clientappio_api_address: default_clientappio(),
            insecure: true,
            certificates_path: None,
            extra_args: Vec::new(),
            project_id: None,
            node_id: None,
            user_id: None,
        }
    }

    /// Value passed to `--node-config`.
    pub fn node_config(&self) -> String {
        format!(
            "partition-id={} num-partitions={}",
            self.partition_id, self.num_partitions
        )
    }
}

/// A start request for any slot kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartRequest {
    Superlink(SuperlinkStartRequest),
    Run(RunStartRequest),
    Supernode(SupernodeStartRequest),
}

impl StartRequest {
    pub fn kind(&self) -> SlotKind {
        match self {
            StartRequest::Superlink(_) => SlotKind::Coordinator,
            StartRequest::Run(_) => SlotKind::Run,
            StartRequest::Supernode(_) => SlotKind::Participant,
        }
    }
}
