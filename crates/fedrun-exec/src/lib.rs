//! Supervision of one child process per slot.
//!
//! A [`ProcessSlot`] launches its child with both output pipes captured,
//! drains them through [`filter`] into a [`LogSink`], and runs a monitor task
//! that records the exit and releases the slot. [`ConfigPatcher`] keeps the
//! run correlation id in the shared app configuration in step with the run slot.

mod error;
pub use error::{PatchError, SlotError};

pub mod filter;

mod patch;
pub use patch::{ConfigPatcher, Document, PatchOutcome, RUN_CONFIG_SECTION, RUN_ID_KEY};

mod signal;

mod sink;
pub use sink::LogSink;

mod slot;
pub use slot::{LaunchSpec, ProcessSlot, RecordPlan, RunPlan, SessionPlan, SlotConfig, SlotSnapshot, child_env};
