mod config;
mod log;

pub use config::{LoggerConfig, LoggerFormat};
pub use log::LoggerError;

/// Install the global `tracing` subscriber described by `cfg`.
///
/// Fails with [`LoggerError::AlreadyInitialized`] when a subscriber is already set,
/// so tests and embedders can call it unconditionally.
pub fn logger_init(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    log::install(cfg)
}
