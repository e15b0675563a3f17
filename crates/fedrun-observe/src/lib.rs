//! Process-wide logging setup for fedrun daemons.
mod logger;
pub use logger::*;
