//! Orchestration façade over the per-kind process slots.
//!
//! A [`Supervisor`] is built for one node role. The coordinator variant owns
//! the aggregation-server slot and the run slot; the participant variant owns
//! the participant slot. Each start resolves identities, opens records and
//! builds the command line before handing a [`fedrun_exec::LaunchSpec`] to the slot.

pub mod command;

mod error;
pub use error::SupervisorError;

mod settings;
pub use settings::{Programs, SupervisorSettings};

mod supervisor;
pub use supervisor::{Context, Supervisor};
