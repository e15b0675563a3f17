use std::sync::Arc;

use async_trait::async_trait;
use fedrun_core::Supervisor;
use fedrun_model::{ActiveRun, Health, SlotKind, StartAck, StartRequest, StopAck};

use crate::{error::ApiError, handler::ApiHandler};

/// Delegates every call straight to a [`Supervisor`].
pub struct SupervisorApiAdapter {
    supervisor: Arc<Supervisor>,
}

impl SupervisorApiAdapter {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait]
impl ApiHandler for SupervisorApiAdapter {
    fn managed(&self) -> Vec<SlotKind> {
        self.supervisor.managed()
    }

    async fn start(&self, req: StartRequest) -> Result<StartAck, ApiError> {
        self.supervisor.start(req).await.map_err(ApiError::from)
    }

    async fn stop(&self, kind: SlotKind) -> Result<StopAck, ApiError> {
        self.supervisor.stop(kind).await.map_err(ApiError::from)
    }

    async fn health(&self) -> Health {
        self.supervisor.health()
    }

    async fn active_run(&self) -> Result<ActiveRun, ApiError> {
        self.supervisor.active_run().map_err(ApiError::from)
    }
}
