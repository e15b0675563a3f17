use fedrun_exec::SlotError;
use fedrun_model::SlotKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Slot(#[from] SlotError),

    #[error("{dependency} must be running before {slot} can start")]
    DependencyNotRunning { slot: SlotKind, dependency: SlotKind },

    #[error("{0} is not managed by this node")]
    Unmanaged(SlotKind),
}

impl SupervisorError {
    /// Stable machine-readable identifier.
    pub fn kind(&self) -> &'static str {
        match self {
            SupervisorError::Slot(e) => e.kind(),
            SupervisorError::DependencyNotRunning { .. } => "dependency_not_running",
            SupervisorError::Unmanaged(_) => "unmanaged_slot",
        }
    }
}
