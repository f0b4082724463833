//! Structured logging utilities for shunt components.
//!
//! Every diagnostic the proxy emits is a `tracing` event carrying a `component`
//! field, so an operator can filter loader noise from stub reports.
//!
//! # Usage
//!
//! ```ignore
//! use shunt_config::logging::*;
//!
//! log_loader_info!("Loading genuine library", library = "version");
//! log_resolve_warn!("Symbol not found", library = "version", symbol = "Foo");
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::ConfigError;

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const LOADER: &'static str = "LOADER";
    pub const RESOLVE: &'static str = "RESOLVE";
    pub const STUB: &'static str = "STUB";
    pub const ATTACH: &'static str = "ATTACH";
    pub const HOOK: &'static str = "HOOK";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(ConfigError::InvalidValue {
                key: "log.level",
                value: s.to_string(),
            }),
        }
    }
}

// === LOADER logging macros ===

#[macro_export]
macro_rules! log_loader_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::LOADER, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_loader_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::LOADER, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_loader_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = $crate::logging::Component::LOADER, $($key = $value,)* $msg)
    };
}

// === RESOLVE logging macros ===

#[macro_export]
macro_rules! log_resolve_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = $crate::logging::Component::RESOLVE, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_resolve_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::RESOLVE, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_resolve_trace {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::trace!(component = $crate::logging::Component::RESOLVE, $($key = $value,)* $msg)
    };
}

// === STUB logging macros ===

#[macro_export]
macro_rules! log_stub_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = $crate::logging::Component::STUB, $($key = $value,)* $msg)
    };
}

// === ATTACH logging macros ===

#[macro_export]
macro_rules! log_attach_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = $crate::logging::Component::ATTACH, $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_attach_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::ATTACH, $($key = $value,)* $msg)
    };
}

// === HOOK logging macros ===

#[macro_export]
macro_rules! log_hook_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = $crate::logging::Component::HOOK, $($key = $value,)* $msg)
    };
}

/// Keeps the non-blocking file writer flushing; dropping it stops the writer thread.
pub struct LoggingGuard {
    _file: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize logging with the given level filter, optionally teeing into `file`.
///
/// `SHUNT_LOG` and then `RUST_LOG` take precedence over `level`. Calling this when a
/// global subscriber already exists is a no-op apart from the returned guard.
pub fn init_logging(level: LogLevel, file: Option<&Path>) -> LoggingGuard {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_env("SHUNT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let (file_layer, guard) = match file.and_then(|p| Some((p.parent()?, p.file_name()?))) {
        Some((dir, name)) => {
            let dir = if dir.as_os_str().is_empty() {
                Path::new(".")
            } else {
                dir
            };
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    LoggingGuard { _file: guard }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_constants() {
        assert_eq!(Component::LOADER, "LOADER");
        assert_eq!(Component::RESOLVE, "RESOLVE");
        assert_eq!(Component::STUB, "STUB");
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(" debug ".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_init_logging_twice_is_harmless() {
        let _a = init_logging(LogLevel::Warn, None);
        let _b = init_logging(LogLevel::Debug, None);
        log_loader_info!("logging initialised", attempt = 2u64);
    }
}
