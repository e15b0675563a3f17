//! Command lines and record payloads for the three process kinds.

use fedrun_model::{RunStartRequest, SuperlinkStartRequest, SupernodeStartRequest};
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    fn extend(&mut self, args: &[String]) -> &mut Self {
        self.args.extend(args.iter().cloned());
        self
    }

    /// Space-joined form, as recorded in runtime configs.
    pub fn joined(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// `<superlink> [extra…] (--insecure | --certificates <path>)`
pub fn superlink(program: &str, req: &SuperlinkStartRequest) -> CommandLine {
    let mut cmd = CommandLine::new(program);
    cmd.extend(&req.extra_args);
    if req.insecure {
        cmd.arg("--insecure");
    } else if let Some(path) = &req.certificates_path {
        cmd.arg("--certificates").arg(path);
    }
    cmd
}

/// `<flwr> run . <federation> [extra…] [--stream]`
pub fn run(program: &str, req: &RunStartRequest) -> CommandLine {
    let mut cmd = CommandLine::new(program);
    cmd.arg("run").arg(".").arg(&req.federation_name).extend(&req.extra_args);
    if req.stream {
        cmd.arg("--stream");
    }
    cmd
}

/// `<supernode> --superlink … --clientappio-api-address … --node-config … [extra…] (--insecure | --root-certificates <path>)`
pub fn supernode(program: &str, req: &SupernodeStartRequest) -> CommandLine {
    let mut cmd = CommandLine::new(program);
    cmd.arg("--superlink")
        .arg(&req.superlink_address)
        .arg("--clientappio-api-address")
        .arg(&req.clientappio_api_address)
        .arg("--node-config")
        .arg(req.node_config())
        .extend(&req.extra_args);
    if req.insecure {
        cmd.arg("--insecure");
    } else if let Some(path) = &req.certificates_path {
        cmd.arg("--root-certificates").arg(path);
    }
    cmd
}

pub fn superlink_runtime_config(cmd: &CommandLine, req: &SuperlinkStartRequest) -> Value {
    let mut config = Map::new();
    config.insert("command".into(), Value::String(cmd.joined()));
    if let Some(address) = &req.listen_address {
        config.insert("address".into(), Value::String(address.clone()));
    }
    Value::Object(config)
}

pub fn run_session_config(req: &RunStartRequest) -> Value {
    json!({
        "federation_name": req.federation_name,
        "extra_args": req.extra_args,
    })
}

pub fn run_record_config(req: &RunStartRequest) -> Value {
    json!({
        "federation_name": req.federation_name,
        "stream": req.stream,
    })
}

pub fn supernode_runtime_config(
    req: &SupernodeStartRequest,
    project_id: &str,
    node_id: &str,
    user_id: Option<&str>,
) -> Value {
    let mut config = json!({
        "superlink_address": req.superlink_address,
        "supernode_address": req.clientappio_api_address,
        "partition_id": req.partition_id,
        "num_partitions": req.num_partitions,
        "node_config": req.node_config(),
        "project_id": project_id,
        "node_id": node_id,
    });
    if let (Some(user), Some(map)) = (user_id, config.as_object_mut()) {
        map.insert("user_id".into(), Value::String(user.to_string()));
    }
    config
}
