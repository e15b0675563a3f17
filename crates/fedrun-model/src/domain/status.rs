use serde::{Deserialize, Serialize};

/// Status column shared by `node_sessions` and `federated_runs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Record created, process not launched yet.
    Starting,
    /// OS process id is known.
    Running,
    /// Process exited with code 0.
    Completed,
    /// Process exited with any other code, was killed, or never launched.
    Failed,
}

impl RecordStatus {
    /// Classify a process exit code.
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            RecordStatus::Completed
        } else {
            RecordStatus::Failed
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Starting => "starting",
            RecordStatus::Running => "running",
            RecordStatus::Completed => "completed",
            RecordStatus::Failed => "failed",
        }
    }

    /// Returns `true` once the record will not transition further.
    pub fn is_terminal(self) -> bool {
        matches!(self, RecordStatus::Completed | RecordStatus::Failed)
    }
}
