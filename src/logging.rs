//! Purpose: Logging bridge from plugins (Rust or foreign) into `tracing`.
//! Exports: `LogLevel`, `log`, `init_tracing`.
//! Role: Plugins report under their own logger name without owning a backend.
//! Invariants: Logging never fails the caller; the logger name travels as a structured field.

use std::fmt;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn name(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn log(level: LogLevel, logger: &str, message: &str) {
    match level {
        LogLevel::Debug => tracing::debug!(logger, "{message}"),
        LogLevel::Info => tracing::info!(logger, "{message}"),
        LogLevel::Warning => tracing::warn!(logger, "{message}"),
        LogLevel::Error => tracing::error!(logger, "{message}"),
    }
}

/// Install a stderr subscriber; `RUST_LOG` wins over `default_directive`.
pub fn init_tracing(default_directive: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
