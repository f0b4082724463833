//! # shunt-config
//!
//! Configuration management for the shunt proxy.
//!
//! Loads configuration from:
//! 1. `<config_dir>/shunt/config.toml` (global)
//! 2. `shunt.toml` next to the host executable (overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

pub use logging::LogLevel;

/// File name of the per-application config, looked up next to the host executable.
pub const LOCAL_CONFIG_NAME: &str = "shunt.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error in {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub loader: LoaderConfig,
    pub stub: StubConfig,
    pub attach: AttachConfig,
    pub log: LogConfig,
    pub companion: CompanionConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let local = Self::local_config_path();
        let mut config = Self::load_from(global.as_deref(), local.as_deref())?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load and layer the given files. Missing files are skipped; tables in the
    /// local file are merged key by key over the global one.
    pub fn load_from(global: Option<&Path>, local: Option<&Path>) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();

        for path in [global, local].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)?;
            let table: toml::Table =
                toml::from_str(&contents).map_err(|source| ConfigError::Toml {
                    path: path.to_path_buf(),
                    source,
                })?;
            merge_tables(&mut merged, table);
        }

        toml::Value::Table(merged)
            .try_into()
            .map_err(|source| ConfigError::Toml {
                path: local.or(global).map(Path::to_path_buf).unwrap_or_default(),
                source,
            })
    }

    /// Global config path: `<config_dir>/shunt/config.toml`
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("shunt").join("config.toml"))
    }

    /// Per-application config path: `shunt.toml` beside the host executable.
    pub fn local_config_path() -> Option<PathBuf> {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(LOCAL_CONFIG_NAME)))
    }

    /// Apply environment variable overrides.
    ///
    /// `lookup` is `std::env::var` in production; tests pass a map.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("SHUNT_SYSTEM_DIR") {
            self.loader.system_dir = Some(PathBuf::from(dir));
        }
        if let Some(policy) = lookup("SHUNT_STUB_POLICY") {
            self.stub.policy = policy.parse()?;
        }
        if let Some(level) = lookup("SHUNT_LOG_LEVEL") {
            self.log.level = level.parse()?;
        }
        if let Some(file) = lookup("SHUNT_LOG_FILE") {
            self.log.file = Some(PathBuf::from(file));
        }
        if let Some(pause) = lookup("SHUNT_PAUSE") {
            self.attach.pause_after_init = parse_flag("SHUNT_PAUSE", &pause)?;
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        Config::default().to_toml()
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

/// Genuine-library loader configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Replaces the OS-reported system directory. Leave unset in production.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_dir: Option<PathBuf>,
}

/// What the stub does once an unresolved symbol is actually called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StubPolicy {
    /// Report, wait for the operator, then terminate.
    #[default]
    Pause,
    /// Launch a just-in-time debugger against this process and break.
    Debugger,
    /// Report and terminate immediately.
    Exit,
}

impl FromStr for StubPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pause" => Ok(Self::Pause),
            "debugger" => Ok(Self::Debugger),
            "exit" => Ok(Self::Exit),
            _ => Err(ConfigError::InvalidValue {
                key: "stub.policy",
                value: s.to_string(),
            }),
        }
    }
}

/// Stub configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StubConfig {
    pub policy: StubPolicy,
    /// Exit code used by the `exit` policy and after an operator pause
    pub exit_code: i32,
    /// Debugger command line; `{pid}` is replaced with the current process id.
    /// Unset means the platform default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debugger_command: Option<String>,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            policy: StubPolicy::Pause,
            exit_code: 3,
            debugger_command: None,
        }
    }
}

/// Attach-time behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachConfig {
    /// Allocate a console window for diagnostics (Windows only)
    pub alloc_console: bool,
    /// Wait for Enter after the extension ran, before the host continues
    pub pause_after_init: bool,
    /// Print the load banner
    pub banner: bool,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            alloc_console: false,
            pause_after_init: false,
            banner: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Additional log file, written through a non-blocking appender
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Companion library started on a worker thread after attach
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    /// Library path, relative paths resolve against the host executable's directory.
    /// Unset disables the companion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<PathBuf>,
    /// Exported `int entry(int argc, const char **argv)` to call
    pub entry: String,
    /// Arguments passed as argv[1..]; argv[0] is the thread name
    pub args: Vec<String>,
    pub thread_name: String,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            library: None,
            entry: "main".to_string(),
            args: Vec::new(),
            thread_name: "shunt-companion".to_string(),
        }
    }
}
