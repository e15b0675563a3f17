//! Remote system of record for node sessions and federated runs.
//!
//! Every call into the store is best-effort: the orchestrator keeps managing
//! its processes whether the store is unconfigured, unreachable or rejecting
//! writes. [`StoreClient`] turns backend results into a [`StoreOutcome`] so
//! callers can log the three cases distinctly without branching on them.

mod backend;
pub use backend::{Filter, RecordStore, Row, row_id};

mod client;
pub use client::StoreClient;

mod errors;
pub use errors::StoreError;

mod identity;
pub use identity::IdentityResolver;

mod journal;
pub use journal::{Journal, LogTarget};

mod memory;
pub use memory::{CallCounts, MemoryStore};

mod outcome;
pub use outcome::StoreOutcome;

mod rest;
pub use rest::{RestConfig, RestStore};

pub mod tables;
