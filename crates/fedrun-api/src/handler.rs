use async_trait::async_trait;
use fedrun_model::{ActiveRun, Health, SlotKind, StartAck, StartRequest, StopAck};

use crate::error::ApiError;

/// Process control API handler.
///
/// Abstracts the backend so the HTTP layer can be mounted over the provided
/// [`crate::SupervisorApiAdapter`] or over a custom implementation that adds
/// its own checks.
#[async_trait]
pub trait ApiHandler: Send + Sync + 'static {
    /// Slot kinds for which start/stop routes are mounted.
    fn managed(&self) -> Vec<SlotKind>;

    async fn start(&self, req: StartRequest) -> Result<StartAck, ApiError>;

    async fn stop(&self, kind: SlotKind) -> Result<StopAck, ApiError>;

    async fn health(&self) -> Health;

    /// Metadata of the run currently occupying the run slot.
    async fn active_run(&self) -> Result<ActiveRun, ApiError>;
}
