use std::fmt;

/// Errors raised by the configuration store.
///
/// Startup errors (`missing`/`invalid JSON`) are fatal; accessor errors
/// (`missing setting with no default`) are only raised by the strict
/// accessors, never by the `_or` convenience accessors the detectors use.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
    MissingSetting { section: String, key: String },
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config I/O error: {}", e),
            ConfigError::Json(e) => write!(f, "config JSON error: {}", e),
            ConfigError::MissingSetting { section, key } => {
                write!(f, "missing config setting: {}.{}", section, key)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}
