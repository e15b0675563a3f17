mod env;
mod request;
mod response;
mod slot;
mod status;
mod timestamp;

pub use env::{KeyValue, ProcessEnv};
pub use request::{RunStartRequest, StartRequest, SuperlinkStartRequest, SupernodeStartRequest};
pub use response::{
    ActiveRun, CoordinatorHealth, Health, ParticipantHealth, RunInfo, StartAck, StopAck,
};
pub use slot::{NodeRole, SlotKind, UnknownSlot};
pub use status::RecordStatus;
pub use timestamp::rfc3339;
