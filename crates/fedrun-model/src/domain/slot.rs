use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of supervised process. Each kind owns at most one running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    /// Aggregation server (`flower-superlink`).
    Coordinator,
    /// One training run (`flwr run`), requires an occupied coordinator slot.
    Run,
    /// Data-holding participant (`flower-supernode`).
    Participant,
}

impl SlotKind {
    /// Name used in log lines and log file names.
    pub fn label(self) -> &'static str {
        match self {
            SlotKind::Coordinator => "superlink",
            SlotKind::Run => "run",
            SlotKind::Participant => "supernode",
        }
    }

    /// HTTP path segment under which the slot is exposed.
    pub fn route(self) -> &'static str {
        match self {
            SlotKind::Coordinator => "superlink",
            SlotKind::Run => "runs",
            SlotKind::Participant => "supernode",
        }
    }

    /// Role of the node whose session a slot occupancy is recorded under.
    pub fn node_role(self) -> NodeRole {
        match self {
            SlotKind::Coordinator | SlotKind::Run => NodeRole::Coordinator,
            SlotKind::Participant => NodeRole::Participant,
        }
    }
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
#[error("unknown slot: {0}")]
pub struct UnknownSlot(pub String);

impl FromStr for SlotKind {
    type Err = UnknownSlot;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coordinator" | "superlink" => Ok(SlotKind::Coordinator),
            "run" | "runs" => Ok(SlotKind::Run),
            "participant" | "supernode" => Ok(SlotKind::Participant),
            _ => Err(UnknownSlot(s.to_string())),
        }
    }
}

/// Role column of the `nodes` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Coordinator,
    Participant,
}

impl NodeRole {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeRole::Coordinator => "coordinator",
            NodeRole::Participant => "participant",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_route_and_kind_names() {
        assert_eq!("superlink".parse::<SlotKind>().unwrap(), SlotKind::Coordinator);
        assert_eq!("runs".parse::<SlotKind>().unwrap(), SlotKind::Run);
        assert_eq!("Participant".parse::<SlotKind>().unwrap(), SlotKind::Participant);
        assert!("worker".parse::<SlotKind>().is_err());
    }

    #[test]
    fn run_sessions_belong_to_coordinator_node() {
        assert_eq!(SlotKind::Run.node_role(), NodeRole::Coordinator);
        assert_eq!(SlotKind::Participant.node_role(), NodeRole::Participant);
    }
}
