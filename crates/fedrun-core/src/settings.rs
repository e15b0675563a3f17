use std::{
    path::PathBuf,
    time::Duration,
};

use fedrun_model::{ProcessEnv, SlotKind};

/// Executables launched for each slot kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Programs {
    pub superlink: String,
    pub flwr: String,
    pub supernode: String,
}

impl Default for Programs {
    fn default() -> Self {
        Self {
            superlink: "flower-superlink".into(),
            flwr: "flwr".into(),
            supernode: "flower-supernode".into(),
        }
    }
}

/// Static configuration of one supervisor, fixed at startup.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Working directory of every child; must exist when a slot starts.
    pub app_dir: PathBuf,
    pub logs_dir: PathBuf,
    /// App configuration patched with the run id. Defaults to `<app_dir>/pyproject.toml`.
    pub config_file: Option<PathBuf>,
    pub grace: Duration,
    pub project_slug: String,
    pub project_name: String,
    /// External id of this node in the `nodes` table.
    pub node_external_id: String,
    pub node_display_name: String,
    pub programs: Programs,
    /// Extra variables for every child (e.g. store credentials on participants).
    pub child_env: ProcessEnv,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            app_dir: PathBuf::from("flower-app"),
            logs_dir: PathBuf::from("logs"),
            config_file: None,
            grace: Duration::from_secs(10),
            project_slug: "fed-project".into(),
            project_name: "Federated Project".into(),
            node_external_id: "coordinator-node".into(),
            node_display_name: "Coordinator".into(),
            programs: Programs::default(),
            child_env: ProcessEnv::new(),
        }
    }
}

impl SupervisorSettings {
    pub fn config_path(&self) -> PathBuf {
        self.config_file
            .clone()
            .unwrap_or_else(|| self.app_dir.join("pyproject.toml"))
    }

    /// `<logs_dir>/<label>.log`.
    pub fn log_path(&self, kind: SlotKind) -> PathBuf {
        self.logs_dir.join(format!("{}.log", kind.label()))
    }
}
