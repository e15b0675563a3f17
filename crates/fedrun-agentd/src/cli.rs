//! Command-line and environment configuration.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use fedrun_core::{Programs, SupervisorSettings};
use fedrun_model::ProcessEnv;
use fedrun_observe::{LoggerConfig, LoggerFormat};
use fedrun_store::RestConfig;

#[derive(Debug, Parser)]
#[command(
    name = "fedrun-agentd",
    version,
    about = "Supervise federated-learning processes behind a small HTTP control API.",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub role: Role,
}

#[derive(Debug, Subcommand)]
pub enum Role {
    /// Aggregation server and training runs.
    Coordinator(CoordinatorArgs),
    /// One data-holding participant.
    Participant(ParticipantArgs),
}

/// Flags shared by both roles.
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Working directory of every child process.
    #[arg(long, env = "FLOWER_APP_PATH", value_name = "DIR", default_value = "flower-app")]
    pub app_dir: PathBuf,

    #[arg(long, env = "FEDRUN_LOGS_DIR", value_name = "DIR", default_value = "logs")]
    pub logs_dir: PathBuf,

    /// App configuration receiving the current run id. Default: `<app-dir>/pyproject.toml`.
    #[arg(long, env = "FEDRUN_APP_CONFIG", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Seconds between the termination request and the forced kill.
    #[arg(long, env = "FEDRUN_GRACE_SECS", value_name = "SECS", default_value_t = 10)]
    pub grace_secs: u64,

    #[arg(long, env = "SUPABASE_URL", value_name = "URL")]
    pub supabase_url: Option<String>,

    #[arg(long, env = "SUPABASE_KEY", value_name = "KEY", hide_env_values = true)]
    pub supabase_key: Option<String>,

    #[arg(long, env = "PROJECT_SLUG", default_value = "fed-project")]
    pub project_slug: String,

    #[arg(long, env = "PROJECT_NAME", default_value = "Federated Project")]
    pub project_name: String,

    /// `EnvFilter` directive.
    #[arg(long, env = "FEDRUN_LOG", value_name = "FILTER", default_value = "info")]
    pub log_level: String,

    /// text, json or journald.
    #[arg(long, env = "FEDRUN_LOG_FORMAT", value_name = "FORMAT", default_value = "text")]
    pub log_format: LoggerFormat,
}

#[derive(Debug, Clone, Args)]
pub struct CoordinatorArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long, env = "FEDRUN_LISTEN", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    #[arg(long, env = "COORDINATOR_NODE_ID", default_value = "coordinator-node")]
    pub node_id: String,

    #[arg(long, env = "COORDINATOR_NODE_NAME", default_value = "Coordinator")]
    pub node_name: String,

    #[arg(long, value_name = "PROGRAM", default_value = "flower-superlink")]
    pub superlink_bin: String,

    #[arg(long, value_name = "PROGRAM", default_value = "flwr")]
    pub flwr_bin: String,
}

#[derive(Debug, Clone, Args)]
pub struct ParticipantArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long, env = "FEDRUN_LISTEN", default_value = "0.0.0.0:8001")]
    pub listen: SocketAddr,

    /// Default: `participant-<hostname>`.
    #[arg(long, env = "PARTICIPANT_NODE_ID")]
    pub node_id: Option<String>,

    /// Default: the hostname.
    #[arg(long, env = "PARTICIPANT_NODE_NAME")]
    pub node_name: Option<String>,

    #[arg(long, value_name = "PROGRAM", default_value = "flower-supernode")]
    pub supernode_bin: String,
}

impl CommonArgs {
    pub fn logger(&self) -> LoggerConfig {
        LoggerConfig::new(self.log_level.clone(), self.log_format)
    }

    pub fn rest(&self) -> Option<RestConfig> {
        RestConfig::from_parts(self.supabase_url.clone(), self.supabase_key.clone())
    }

    fn settings(&self, node_external_id: String, node_display_name: String, programs: Programs) -> SupervisorSettings {
        SupervisorSettings {
            app_dir: self.app_dir.clone(),
            logs_dir: self.logs_dir.clone(),
            config_file: self.config_file.clone(),
            grace: Duration::from_secs(self.grace_secs),
            project_slug: self.project_slug.clone(),
            project_name: self.project_name.clone(),
            node_external_id,
            node_display_name,
            programs,
            child_env: ProcessEnv::new(),
        }
    }
}

impl CoordinatorArgs {
    pub fn settings(&self) -> SupervisorSettings {
        let programs = Programs {
            superlink: self.superlink_bin.clone(),
            flwr: self.flwr_bin.clone(),
            ..Default::default()
        };
        self.common
            .settings(self.node_id.clone(), self.node_name.clone(), programs)
    }
}

impl ParticipantArgs {
    /// Settings for this host; store credentials are forwarded to the participant child.
    pub fn settings(&self, hostname: &str) -> SupervisorSettings {
        let programs = Programs {
            supernode: self.supernode_bin.clone(),
            ..Default::default()
        };
        let node_id = self
            .node_id
            .clone()
            .unwrap_or_else(|| format!("participant-{hostname}"));
        let node_name = self.node_name.clone().unwrap_or_else(|| hostname.to_string());

        let mut settings = self.common.settings(node_id, node_name, programs);
        if let Some(url) = &self.common.supabase_url {
            settings.child_env.push("SUPABASE_URL", url.as_str());
        }
        if let Some(key) = &self.common.supabase_key {
            settings.child_env.push("SUPABASE_KEY", key.as_str());
        }
        settings
    }
}
