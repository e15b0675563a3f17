use std::{io::IsTerminal, str::FromStr};

use crate::logger::log::LoggerError;

/// Where log records go: human-readable lines, one JSON object per line, or the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggerFormat {
    #[default]
    Text,
    Json,
    Journald,
}

impl LoggerFormat {
    /// Journald is only selectable on Linux builds with the `journald` feature.
    pub const fn journald_available() -> bool {
        cfg!(all(target_os = "linux", feature = "journald"))
    }
}

impl FromStr for LoggerFormat {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "journald" | "journal" if Self::journald_available() => Ok(Self::Journald),
            "journald" | "journal" => Err(LoggerError::JournaldNotSupported),
            _ => Err(LoggerError::InvalidFormat(s.to_string())),
        }
    }
}

/// Directives appended to every filter unless `quiet_transport` is off; the
/// store client otherwise floods `debug` with connection-pool chatter.
pub(crate) const TRANSPORT_DIRECTIVES: &[&str] = &["hyper_util=warn", "reqwest=warn", "h2=warn"];

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// `EnvFilter` directive, e.g. `info` or `fedrun_exec=debug,info`.
    pub level: String,
    pub with_targets: bool,
    pub use_color: bool,
    pub quiet_transport: bool,
}

impl LoggerConfig {
    pub fn new(level: impl Into<String>, format: LoggerFormat) -> Self {
        Self {
            format,
            level: level.into(),
            ..Default::default()
        }
    }

    /// Full filter directive: the configured level followed by transport overrides.
    pub(crate) fn directive(&self) -> String {
        let level = self.level.trim();
        if !self.quiet_transport {
            return level.to_string();
        }
        std::iter::once(level)
            .chain(TRANSPORT_DIRECTIVES.iter().copied())
            .filter(|d| !d.is_empty())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LoggerFormat::default(),
            level: "info".to_string(),
            with_targets: true,
            use_color: std::io::stdout().is_terminal(),
            quiet_transport: true,
        }
    }
}
