//! Table names of the remote schema.

pub const PROJECTS: &str = "projects";
pub const NODES: &str = "nodes";
pub const NODE_SESSIONS: &str = "node_sessions";
pub const FEDERATED_RUNS: &str = "federated_runs";
